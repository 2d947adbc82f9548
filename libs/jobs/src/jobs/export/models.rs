//! Export job wire payloads and the partition planner

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Definition payload shared by the orchestrator and its processing
/// children. For a processing job, `since`/`till` bound the partition's
/// time window and `resource_types` holds at most one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobDefinition {
    pub type_id: i32,
    /// Comma-joined resource type filter; absent exports every type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<String>,
    /// Lower bound of the export window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Upper bound of a processing partition's window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub till: Option<DateTime<Utc>>,
    /// Group resource scope of the export request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Requested degree of parallelism for the fan-out.
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

fn default_parallel() -> u32 {
    1
}

impl Default for ExportJobDefinition {
    fn default() -> Self {
        Self {
            type_id: 0,
            resource_types: None,
            since: None,
            till: None,
            group_id: None,
            parallel: 1,
        }
    }
}

/// One produced export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFileInfo {
    pub url: String,
    pub sequence: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFailureDetails {
    pub failure_reason: String,
    pub failure_status_code: u16,
}

/// Result payload of an export job: the output manifest keyed by resource
/// type, or a structured failure record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobResult {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, Vec<ExportFileInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<ExportFailureDetails>,
}

impl ExportJobResult {
    /// Fold another fragment into this manifest, keeping per-type files in
    /// sequence order.
    pub fn merge(&mut self, other: ExportJobResult) {
        for (resource_type, mut files) in other.output {
            let entry = self.output.entry(resource_type).or_default();
            entry.append(&mut files);
            entry.sort_by_key(|file| file.sequence);
        }
        if self.failure_details.is_none() {
            self.failure_details = other.failure_details;
        }
    }
}

/// Structured failure record in result-payload form.
pub fn failure_details_payload(reason: &str, status_code: u16) -> serde_json::Value {
    json!({
        "failureDetails": {
            "failureReason": reason,
            "failureStatusCode": status_code,
        }
    })
}

/// Split an orchestrator definition into independently executable
/// partitions: one child per requested resource type (or a single
/// type-less partition) per time window, with `[since, now)` cut into
/// `parallel` equal windows.
pub fn plan_partitions(
    definition: &ExportJobDefinition,
    now: DateTime<Utc>,
) -> Vec<ExportJobDefinition> {
    let types: Vec<Option<String>> = match &definition.resource_types {
        Some(filter) => filter
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Some(t.to_string()))
            .collect(),
        None => vec![None],
    };
    let types = if types.is_empty() { vec![None] } else { types };

    let since = definition.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    // Windows narrower than a second would collapse to duplicate
    // definitions under idempotent enqueue, so the fan-out degrades first.
    let parallel = definition.parallel.max(1) as i64;
    let parallel = if since >= now {
        1
    } else {
        parallel.min((now - since).num_seconds().max(1))
    } as i32;
    let span = now - since;
    let per_window = span / parallel;

    let mut partitions = Vec::with_capacity(types.len() * parallel as usize);
    for resource_type in &types {
        for window in 0..parallel {
            let start = since + per_window * window;
            let end = if window + 1 == parallel {
                now
            } else {
                since + per_window * (window + 1)
            };
            partitions.push(ExportJobDefinition {
                type_id: super::PROCESSING_TYPE_ID,
                resource_types: resource_type.clone(),
                since: Some(start),
                till: Some(end),
                group_id: definition.group_id.clone(),
                parallel: 1,
            });
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(types: Option<&str>, parallel: u32) -> ExportJobDefinition {
        ExportJobDefinition {
            type_id: super::super::ORCHESTRATOR_TYPE_ID,
            resource_types: types.map(str::to_string),
            since: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            parallel,
            ..ExportJobDefinition::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap()
    }

    #[test]
    fn fan_out_is_types_times_parallel() {
        let partitions = plan_partitions(&request(Some("Patient,Observation"), 10), now());
        assert_eq!(partitions.len(), 20);
        assert!(partitions
            .iter()
            .all(|p| p.type_id == super::super::PROCESSING_TYPE_ID));
    }

    #[test]
    fn unfiltered_single_parallel_yields_one_partition() {
        let partitions = plan_partitions(&request(None, 1), now());
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].resource_types, None);
    }

    #[test]
    fn windows_tile_the_export_range() {
        let partitions = plan_partitions(&request(Some("Patient"), 5), now());
        assert_eq!(partitions.len(), 5);
        assert_eq!(partitions[0].since, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(partitions[4].till, Some(now()));
        for pair in partitions.windows(2) {
            assert_eq!(pair[0].till, pair[1].since);
        }
    }

    #[test]
    fn future_since_collapses_to_one_window() {
        let mut definition = request(Some("Patient"), 8);
        definition.since = Some(now() + chrono::Duration::hours(1));
        let partitions = plan_partitions(&definition, now());
        assert_eq!(partitions.len(), 1);
    }

    #[test]
    fn absent_since_exports_from_the_epoch() {
        let mut definition = request(None, 1);
        definition.since = None;
        let partitions = plan_partitions(&definition, now());
        assert_eq!(partitions[0].since, Some(DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn definition_wire_format_uses_the_documented_field_names() {
        let definition = ExportJobDefinition {
            type_id: 1,
            resource_types: Some("Patient".to_string()),
            since: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            till: None,
            group_id: Some("cohort-7".to_string()),
            parallel: 4,
        };
        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(value["typeId"], 1);
        assert_eq!(value["type"], "Patient");
        assert_eq!(value["groupId"], "cohort-7");
        assert_eq!(value["parallel"], 4);
    }

    #[test]
    fn result_wire_format_uses_the_documented_field_names() {
        let mut result = ExportJobResult::default();
        result.output.insert(
            "Patient".to_string(),
            vec![ExportFileInfo {
                url: "file:///export/patient-1.ndjson".to_string(),
                sequence: 1,
            }],
        );
        result.failure_details = Some(ExportFailureDetails {
            failure_reason: "Job failed.".to_string(),
            failure_status_code: 500,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["output"]["Patient"][0]["url"], "file:///export/patient-1.ndjson");
        assert_eq!(value["output"]["Patient"][0]["sequence"], 1);
        assert_eq!(value["failureDetails"]["failureReason"], "Job failed.");
        assert_eq!(value["failureDetails"]["failureStatusCode"], 500);
    }

    #[test]
    fn merge_orders_files_by_sequence_within_a_type() {
        let mut merged = ExportJobResult::default();
        let mut first = ExportJobResult::default();
        first.output.insert(
            "Patient".to_string(),
            vec![ExportFileInfo {
                url: "file:///export/patient-2.ndjson".to_string(),
                sequence: 2,
            }],
        );
        let mut second = ExportJobResult::default();
        second.output.insert(
            "Patient".to_string(),
            vec![ExportFileInfo {
                url: "file:///export/patient-1.ndjson".to_string(),
                sequence: 1,
            }],
        );
        merged.merge(first);
        merged.merge(second);
        let files = &merged.output["Patient"];
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sequence, 1);
        assert_eq!(files[1].sequence, 2);
    }
}
