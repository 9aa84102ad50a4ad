//! Result aggregation
//!
//! Folds an ordered sequence of fetch outcomes into a deduplicated record set.
//! Each response body may be a paged envelope, a bare list or a single object;
//! every item is validated on its own so one malformed item never discards its
//! siblings.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::fetcher::FetchOutcome;
use crate::app::models::{
    DeviceDetailPayload, DeviceRecord, DeviceRef, PatchTitle, PolicyPayload, SummaryPayload,
};

/// A record with a stable identifier used for deduplication
pub trait Record {
    fn record_id(&self) -> &str;
}

/// Typed payload that converts into a record
pub trait RecordPayload: DeserializeOwned {
    type Record: Record;

    /// Convert a validated payload, rejecting semantically invalid items
    fn into_record(self) -> Result<Self::Record, String>;
}

/// An item left out of the record set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    /// Request the item came from
    pub source: String,
    pub reason: String,
}

/// Aggregated records plus everything that did not make it in
#[derive(Debug, Clone)]
pub struct AggregateReport<R> {
    pub records: Vec<R>,
    pub skipped: Vec<SkippedItem>,
    /// Items dropped because an earlier item had the same identifier
    pub duplicates: usize,
}

impl<R> Default for AggregateReport<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: Vec::new(),
            duplicates: 0,
        }
    }
}

impl<R> AggregateReport<R> {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadShape {
    Paged {
        #[serde(rename = "totalCount")]
        total_count: u64,
        results: Vec<Value>,
    },
    List(Vec<Value>),
    Single(Value),
}

impl PayloadShape {
    fn into_items(self) -> Vec<Value> {
        match self {
            PayloadShape::Paged {
                total_count,
                results,
            } => {
                debug!("Paged payload with {} of {} items", results.len(), total_count);
                results
            }
            PayloadShape::List(items) => items,
            PayloadShape::Single(item) => vec![item],
        }
    }
}

/// Aggregate outcomes into records of `P::Record`, first-seen order
pub fn aggregate<P: RecordPayload>(outcomes: &[FetchOutcome]) -> AggregateReport<P::Record> {
    let mut report = AggregateReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for outcome in outcomes {
        let response = match outcome {
            FetchOutcome::Success(response) => response,
            FetchOutcome::Failure(failure) => {
                warn!("Skipping {}: {}", failure.request, failure.kind);
                report.skipped.push(SkippedItem {
                    source: failure.request.to_string(),
                    reason: failure.kind.to_string(),
                });
                continue;
            }
        };

        let source = response.request.to_string();
        let items = match serde_json::from_slice::<PayloadShape>(&response.body) {
            Ok(shape) => shape.into_items(),
            Err(e) => {
                warn!("Skipping {}: unparseable body: {}", source, e);
                report.skipped.push(SkippedItem {
                    source,
                    reason: format!("invalid JSON: {}", e),
                });
                continue;
            }
        };

        for item in items {
            let record = serde_json::from_value::<P>(item)
                .map_err(|e| e.to_string())
                .and_then(P::into_record);

            match record {
                Ok(record) => {
                    if seen.insert(record.record_id().to_string()) {
                        report.records.push(record);
                    } else {
                        debug!("Dropping duplicate record {} from {}", record.record_id(), source);
                        report.duplicates += 1;
                    }
                }
                Err(reason) => {
                    warn!("Skipping item from {}: {}", source, reason);
                    report.skipped.push(SkippedItem {
                        source: source.clone(),
                        reason,
                    });
                }
            }
        }
    }

    report
}

impl Record for PatchTitle {
    fn record_id(&self) -> &str {
        &self.title_id
    }
}

impl RecordPayload for SummaryPayload {
    type Record = PatchTitle;

    fn into_record(self) -> Result<PatchTitle, String> {
        if self.title.trim().is_empty() {
            return Err(format!("title {} has an empty name", self.software_title_id));
        }
        Ok(PatchTitle::from(self))
    }
}

impl Record for PolicyPayload {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl RecordPayload for PolicyPayload {
    type Record = PolicyPayload;

    fn into_record(self) -> Result<PolicyPayload, String> {
        Ok(self)
    }
}

impl Record for DeviceRef {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl RecordPayload for DeviceRef {
    type Record = DeviceRef;

    fn into_record(self) -> Result<DeviceRef, String> {
        Ok(self)
    }
}

impl Record for DeviceRecord {
    fn record_id(&self) -> &str {
        &self.device_id
    }
}

impl RecordPayload for DeviceDetailPayload {
    type Record = DeviceRecord;

    fn into_record(self) -> Result<DeviceRecord, String> {
        if self.os_version.trim().is_empty() {
            return Err(format!("device {} reports no OS version", self.id));
        }
        Ok(DeviceRecord::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fetcher::{FailureKind, FetchFailure, FetchRequest, RawResponse};

    fn success(path: &str, body: &str) -> FetchOutcome {
        FetchOutcome::Success(RawResponse {
            request: FetchRequest::api(path),
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }

    fn summary(id: &str, title: &str) -> String {
        format!(
            r#"{{"softwareTitleId":"{}","title":"{}","latestVersion":"1.0","releaseDate":"2024-01-15T18:47:58Z","upToDate":3,"outOfDate":1}}"#,
            id, title
        )
    }

    #[test]
    fn test_single_objects_in_order() {
        let outcomes = vec![
            success("/a", &summary("2", "Zoom")),
            success("/b", &summary("1", "Chrome")),
        ];

        let report = aggregate::<SummaryPayload>(&outcomes);

        let ids: Vec<&str> = report.records.iter().map(|r| r.title_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let outcomes = vec![
            success("/a", &summary("1", "Chrome")),
            success("/b", &summary("1", "Chrome Beta")),
        ];

        let report = aggregate::<SummaryPayload>(&outcomes);

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].title, "Chrome");
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.skipped_count(), 0);
    }

    #[test]
    fn test_paged_and_list_shapes() {
        let page = r#"{"totalCount": 3, "results": [{"id": "1"}, {"id": 2}]}"#;
        let list = r#"[{"id": "3"}, {"id": "1"}]"#;
        let outcomes = vec![success("/devices", page), success("/more", list)];

        let report = aggregate::<DeviceRef>(&outcomes);

        let ids: Vec<&str> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_invalid_item_does_not_discard_siblings() {
        let list = format!(
            r#"[{}, {{"softwareTitleId":"9","title":"Broken"}}, {}]"#,
            summary("1", "Chrome"),
            summary("2", "Zoom")
        );

        let report = aggregate::<SummaryPayload>(&[success("/list", &list)]);

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].source, "/list");
    }

    #[test]
    fn test_failures_and_bad_bodies_are_skipped() {
        let outcomes = vec![
            FetchOutcome::Failure(FetchFailure {
                request: FetchRequest::api("/gone"),
                kind: FailureKind::HttpStatus(404),
                attempts: 1,
            }),
            success("/garbled", "<html>"),
            success("/ok", &summary("1", "Chrome")),
            success("/blank", &summary("2", " ")),
        ];

        let report = aggregate::<SummaryPayload>(&outcomes);

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.skipped[0].reason, "HTTP 404");
        assert!(report.skipped[1].reason.starts_with("invalid JSON"));
    }

    #[test]
    fn test_missing_packages_default_empty() {
        let report =
            aggregate::<PolicyPayload>(&[success("/policies", r#"[{"id":"1","displayName":"Chrome"}]"#)]);
        assert_eq!(report.records.len(), 1);
        assert!(report.records[0].packages.is_empty());
    }
}
