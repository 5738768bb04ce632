//! Dispatch journal for debugging listener wiring
//!
//! When enabled through [`Config::journal_capacity`](crate::Config), every node
//! of a bubbling walk that invokes at least one listener leaves a
//! [`DispatchRecord`]. The journal keeps the most recent records only.

use crate::error::Result;
use crate::listener::EventKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One node visit of a bubbling walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Event that was bubbling
    pub kind: EventKind,
    /// Operation the event originated from
    pub origin: Uuid,
    /// Operation whose listeners were invoked
    pub node: Uuid,
    /// Concrete payload type name
    pub payload_type: String,
    /// Number of listeners invoked on `node`
    pub listeners: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded, thread-safe store of dispatch records
pub struct DispatchJournal {
    capacity: usize,
    records: Mutex<VecDeque<DispatchRecord>>,
}

impl DispatchJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest once full
    pub fn record(&self, record: DispatchRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// All retained records, oldest first
    pub fn records(&self) -> Vec<DispatchRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// The last `n` records, oldest first
    pub fn last_n(&self, n: usize) -> Vec<DispatchRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(n);
        records.iter().skip(start).cloned().collect()
    }

    pub fn count_by_kind(&self, kind: EventKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }

    /// Records whose event originated from `origin`
    pub fn records_for(&self, origin: Uuid) -> Vec<DispatchRecord> {
        self.records.lock().iter().filter(|r| r.origin == origin).cloned().collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Serialize the retained records as a JSON array
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.records())?)
    }
}

impl std::fmt::Debug for DispatchJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchJournal")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
