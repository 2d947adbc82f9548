//! Registry mapping definition type tags to executable implementations
//!
//! Populated once at startup; no runtime type scanning.

use std::collections::HashMap;
use std::sync::Arc;

use super::base::JobExecutor;

type JobFactory = Box<dyn Fn() -> Arc<dyn JobExecutor> + Send + Sync>;

#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<i32, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a constructor for a definition type tag. A later
    /// registration for the same tag replaces the earlier one.
    pub fn register<F>(&mut self, type_id: i32, factory: F)
    where
        F: Fn() -> Arc<dyn JobExecutor> + Send + Sync + 'static,
    {
        self.factories.insert(type_id, Box::new(factory));
    }

    pub fn resolve(&self, type_id: i32) -> Option<Arc<dyn JobExecutor>> {
        self.factories.get(&type_id).map(|factory| factory())
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn registered_type_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
