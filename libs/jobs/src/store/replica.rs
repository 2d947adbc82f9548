//! Deterministic read-replica traffic routing
//!
//! Routes read-only store calls between the primary and a replica so the
//! observed replica fraction converges exactly to the configured ratio,
//! without randomness: ratios in (0.5, 0.99] send one call per period
//! `round(1 / (1 - ratio))` to the primary and the rest to the replica.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTarget {
    Primary,
    Replica,
}

impl ConnectionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionTarget::Primary => "primary",
            ConnectionTarget::Replica => "replica",
        }
    }
}

type RatioProvider = Arc<dyn Fn() -> f64 + Send + Sync>;

struct CachedRatio {
    ratio: f64,
    refreshed_at: Instant,
}

pub struct ReplicaRouter {
    provider: RatioProvider,
    cache_window: Duration,
    cached: Mutex<CachedRatio>,
    counter: AtomicU64,
}

impl ReplicaRouter {
    /// Router with a fixed traffic ratio.
    pub fn new(ratio: f64, cache_window: Duration) -> Self {
        Self::with_provider(move || ratio, cache_window)
    }

    /// Router whose ratio is re-read from `provider` at most once per
    /// `cache_window`.
    pub fn with_provider<F>(provider: F, cache_window: Duration) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let ratio = provider().clamp(0.0, 1.0);
        Self {
            provider: Arc::new(provider),
            cache_window,
            cached: Mutex::new(CachedRatio {
                ratio,
                refreshed_at: Instant::now(),
            }),
            counter: AtomicU64::new(0),
        }
    }

    /// Pick the connection target for one read-only call.
    pub fn route(&self) -> ConnectionTarget {
        let target = self.pick();
        metrics::STORE_READS_ROUTED_TOTAL
            .with_label_values(&[target.as_str()])
            .inc();
        target
    }

    fn pick(&self) -> ConnectionTarget {
        let ratio = self.current_ratio();
        if ratio < 0.5 {
            return ConnectionTarget::Primary;
        }
        if ratio > 0.99 {
            return ConnectionTarget::Replica;
        }
        let period = (1.0 / (1.0 - ratio)).round() as u64;
        let call = self.counter.fetch_add(1, Ordering::Relaxed);
        if call % period == 0 {
            ConnectionTarget::Primary
        } else {
            ConnectionTarget::Replica
        }
    }

    fn current_ratio(&self) -> f64 {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if cached.refreshed_at.elapsed() >= self.cache_window {
            cached.ratio = (self.provider)().clamp(0.0, 1.0);
            cached.refreshed_at = Instant::now();
        }
        cached.ratio
    }
}
