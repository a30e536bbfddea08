//! Diagnostic aggregator: the authoritative per-resource record set.
//!
//! Every added record is forwarded immediately on the streamed lane; the
//! snapshot lane carries full per-resource lists on [`flush`](DiagnosticAggregator::flush)
//! and empty lists on clear. The lanes have no ordering contract between
//! them; the only guarantee is that a record added before a `flush()` is
//! part of that flush's snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use lintbridge_types::{DiagnosticRecord, ResourceId, ResourceSnapshot, StreamedRecord};
use regex::Regex;

/// A snapshot-lane delivery that did not reach the consumer.
#[derive(Debug, thiserror::Error)]
#[error("delivery for {resource_id} failed: {reason}")]
pub struct DeliveryError {
    resource_id: ResourceId,
    reason: String,
}

impl DeliveryError {
    #[must_use]
    pub fn new(resource_id: ResourceId, reason: impl Into<String>) -> Self {
        Self {
            resource_id,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }
}

/// The two delivery lanes.
pub trait DiagnosticSink {
    /// Streamed lane. Must return without waiting for delivery.
    fn stream(&self, update: StreamedRecord);

    /// Snapshot lane. One best-effort attempt.
    fn snapshot(&self, snapshot: ResourceSnapshot) -> Result<(), DeliveryError>;
}

/// Owns the records found so far, grouped by resource.
#[derive(Debug)]
pub struct DiagnosticAggregator<S> {
    by_resource: BTreeMap<ResourceId, Vec<DiagnosticRecord>>,
    sink: S,
}

impl<S: DiagnosticSink> DiagnosticAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            by_resource: BTreeMap::new(),
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Record a finding and stream it to the consumer.
    ///
    /// Relative paths resolve against `root`. A path that cannot become a
    /// file URI is logged and dropped; the return value says whether the
    /// record was kept.
    pub fn add_issue(&mut self, record: DiagnosticRecord, root: &Path) -> bool {
        let resource_id = match ResourceId::resolve(record.resource_path(), root) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Dropping diagnostic: {e}");
                return false;
            }
        };

        let wire = record.to_wire();
        self.by_resource
            .entry(resource_id.clone())
            .or_default()
            .push(record);

        tracing::debug!(uri = %resource_id, "Diagnostic added");
        self.sink.stream(StreamedRecord {
            resource_id,
            record: wire,
        });
        true
    }

    /// Positively clear every tracked resource on the consumer, then forget them.
    pub fn clear(&mut self) {
        for resource_id in std::mem::take(&mut self.by_resource).into_keys() {
            self.send_empty(resource_id);
        }
    }

    /// Clear only resources whose identifier matches `pattern`.
    pub fn clear_uri_match(&mut self, pattern: &Regex) {
        let matching: Vec<ResourceId> = self
            .by_resource
            .keys()
            .filter(|id| pattern.is_match(id.as_str()))
            .cloned()
            .collect();
        for resource_id in matching {
            self.by_resource.remove(&resource_id);
            self.send_empty(resource_id);
        }
    }

    /// Re-send every resource's full list (resynchronization).
    pub fn flush(&self) {
        for (resource_id, records) in &self.by_resource {
            let snapshot = ResourceSnapshot {
                resource_id: resource_id.clone(),
                records: records.iter().map(DiagnosticRecord::to_wire).collect(),
            };
            if let Err(e) = self.sink.snapshot(snapshot) {
                tracing::warn!("Snapshot flush failed: {e}");
            }
        }
    }

    /// Drop local state without telling the consumer.
    pub fn dispose(&mut self) {
        self.by_resource.clear();
    }

    #[must_use]
    pub fn records(&self, resource_id: &ResourceId) -> &[DiagnosticRecord] {
        self.by_resource.get(resource_id).map_or(&[], Vec::as_slice)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceId> {
        self.by_resource.keys()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.by_resource.len()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.by_resource.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }

    fn send_empty(&self, resource_id: ResourceId) {
        if let Err(e) = self.sink.snapshot(ResourceSnapshot::empty(resource_id)) {
            tracing::warn!("Clear notification failed: {e}");
        }
    }
}
