//! In-memory ledger for tests and development.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::core::ledger::{LedgerCounts, TaskLedger, TaskRecord, TaskStatus};
use crate::core::LedgerError;
use crate::util::clock::TimestampMs;
use crate::util::serde::{Payload, TaskId};

struct LedgerInner {
    records: HashMap<TaskId, TaskRecord>,
    /// Submission order, oldest first.
    order: VecDeque<TaskId>,
}

/// Bounded in-memory ledger. Once full, the oldest record is dropped.
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
    max_records: usize,
}

impl InMemoryLedger {
    /// Create a ledger holding at most `max_records` tasks.
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                records: HashMap::new(),
                order: VecDeque::with_capacity(max_records.min(1024)),
            }),
            max_records,
        }
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskLedger for InMemoryLedger {
    fn record(&self, task: &TaskRecord) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        if inner.records.len() >= self.max_records {
            if let Some(oldest) = inner.order.pop_front() {
                inner.records.remove(&oldest);
            }
        }
        if inner.records.insert(task.id, task.clone()).is_none() {
            inner.order.push_back(task.id);
        }
        Ok(())
    }

    fn mark_dispatched(&self, ids: &[TaskId], at_ms: TimestampMs) -> Result<usize, LedgerError> {
        let mut inner = self.inner.lock();
        let mut changed = 0;
        for id in ids {
            if let Some(rec) = inner.records.get_mut(id) {
                if rec.apply_dispatch(at_ms) {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn mark_finished(
        &self,
        id: &TaskId,
        success: bool,
        result: &Payload,
        at_ms: TimestampMs,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock();
        Ok(inner.records.get_mut(id).is_some_and(|rec| {
            rec.apply_finish(success, result.clone(), at_ms);
            true
        }))
    }

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, LedgerError> {
        Ok(self.inner.lock().records.get(id).cloned())
    }

    fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<TaskRecord>, LedgerError> {
        let inner = self.inner.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| status.is_none_or(|s| rec.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    fn counts(&self) -> Result<LedgerCounts, LedgerError> {
        let inner = self.inner.lock();
        let mut counts = LedgerCounts::default();
        for rec in inner.records.values() {
            counts.bump(rec.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(n: u64) -> TaskRecord {
        TaskRecord::pending(TaskId::generate(), "w1", "download", json!({ "n": n }), n)
    }

    #[test]
    fn lifecycle_updates_status() {
        let ledger = InMemoryLedger::new(10);
        let rec = pending(1);
        ledger.record(&rec).unwrap();

        assert_eq!(ledger.mark_dispatched(&[rec.id], 5).unwrap(), 1);
        assert_eq!(ledger.mark_dispatched(&[rec.id], 6).unwrap(), 0);
        assert!(ledger.mark_finished(&rec.id, true, &json!({ "path": "/tmp/1" }), 9).unwrap());

        let stored = ledger.get(&rec.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.assigned_at_ms, Some(5));
        assert_eq!(stored.completed_at_ms, Some(9));
        assert_eq!(stored.result, Some(json!({ "path": "/tmp/1" })));
    }

    #[test]
    fn unknown_task_is_reported() {
        let ledger = InMemoryLedger::new(10);
        assert!(!ledger.mark_finished(&TaskId::generate(), true, &json!(null), 1).unwrap());
    }

    #[test]
    fn oldest_record_evicted_when_full() {
        let ledger = InMemoryLedger::new(2);
        let (a, b, c) = (pending(1), pending(2), pending(3));
        for rec in [&a, &b, &c] {
            ledger.record(rec).unwrap();
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(&a.id).unwrap().is_none());

        let listed: Vec<_> = ledger.list(None, 10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![b.id, c.id]);
    }

    #[test]
    fn list_filters_and_counts() {
        let ledger = InMemoryLedger::new(10);
        let recs: Vec<_> = (0..4).map(pending).collect();
        for rec in &recs {
            ledger.record(rec).unwrap();
        }
        ledger.mark_finished(&recs[1].id, false, &json!("boom"), 10).unwrap();

        assert_eq!(ledger.list(Some(TaskStatus::Failed), 10).unwrap().len(), 1);
        assert_eq!(ledger.list(Some(TaskStatus::Pending), 2).unwrap().len(), 2);

        let counts = ledger.counts().unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.failed, 1);
    }
}
