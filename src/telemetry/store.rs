//! Persisted execution records.
//!
//! All records live in one JSON [`Envelope`] under [`EXECUTIONS_KEY`]. Every
//! mutation reads the whole envelope, changes it and writes it back under
//! the area's write lock, so writers in one process never lose each other's
//! records. Across processes there is no such lock: when two processes
//! write at once, the last writer wins.
//!
//! The public operations never fail. Storage and parse errors are logged and
//! degrade to an empty read or a skipped write, so telemetry problems cannot
//! take a caller down. The `try_*` variants expose the error for callers that
//! want it.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::notifier::ChangeNotifier;
use super::{Envelope, ExecutionRecord, ExecutionStatus, EXECUTIONS_KEY};
use crate::storage::{StorageContext, StorageError, Subscription, WriteBatch};

#[derive(Clone)]
pub struct ExecutionStore {
    ctx: StorageContext,
}

impl ExecutionStore {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Every record in insertion order. Empty when nothing is stored or the
    /// stored blob cannot be read.
    pub fn get_all(&self) -> Vec<ExecutionRecord> {
        match self.try_load() {
            Ok(Some(envelope)) => envelope.executions,
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(key = EXECUTIONS_KEY, error = %e, "failed to read test executions");
                Vec::new()
            }
        }
    }

    /// Insert or replace `record` by id.
    pub fn upsert(&self, record: ExecutionRecord) {
        let id = record.id.clone();
        if let Err(e) = self.try_upsert_batch(vec![record]) {
            error!(%id, error = %e, "failed to save test execution");
        }
    }

    /// Upsert every record in order with a single storage write.
    pub fn upsert_batch(&self, records: Vec<ExecutionRecord>) {
        let count = records.len();
        if let Err(e) = self.try_upsert_batch(records) {
            error!(count, error = %e, "failed to save test executions");
        }
    }

    /// Remove the record with `id`, if any.
    pub fn delete_by_id(&self, id: &str) {
        if let Err(e) = self.try_delete_by_id(id) {
            error!(%id, error = %e, "failed to delete test execution");
        }
    }

    /// Drop the whole envelope.
    pub fn clear(&self) {
        if let Err(e) = self.ctx.remove_item(EXECUTIONS_KEY) {
            error!(error = %e, "failed to clear test executions");
        }
    }

    /// When the envelope was last written, if it exists and parses.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.try_load().ok().flatten().and_then(|e| e.last_update_time)
    }

    /// Be told when another context changes the stored records.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        ChangeNotifier::new(self.ctx.clone()).subscribe(callback)
    }

    pub fn try_load(&self) -> Result<Option<Envelope>, StorageError> {
        parse(self.ctx.get_item(EXECUTIONS_KEY)?)
    }

    pub fn try_upsert_batch(&self, records: Vec<ExecutionRecord>) -> Result<(), StorageError> {
        self.ctx.update(|batch| {
            let mut envelope = parse(batch.get_item(EXECUTIONS_KEY)?)?.unwrap_or_else(Envelope::empty);
            for record in records {
                envelope.upsert(normalize(record));
            }
            save(batch, envelope)
        })
    }

    /// Returns whether a record was removed.
    pub fn try_delete_by_id(&self, id: &str) -> Result<bool, StorageError> {
        let removed = self.ctx.update(|batch| {
            let Some(mut envelope) = parse(batch.get_item(EXECUTIONS_KEY)?)? else {
                return Ok(false);
            };
            let removed = envelope.remove(id);
            save(batch, envelope)?;
            Ok(removed)
        })?;
        debug!(%id, removed, "deleted test execution");
        Ok(removed)
    }
}

fn parse(raw: Option<String>) -> Result<Option<Envelope>, StorageError> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn save(batch: &mut WriteBatch<'_>, mut envelope: Envelope) -> Result<(), StorageError> {
    envelope.last_update_time = Some(Utc::now());
    let raw = serde_json::to_string(&envelope)?;
    batch.set_item(EXECUTIONS_KEY, &raw)
}

/// A running record never carries an end time.
fn normalize(mut record: ExecutionRecord) -> ExecutionRecord {
    if record.status == ExecutionStatus::Running && record.end_time.is_some() {
        warn!(id = %record.id, "dropping endTime from running execution");
        record.end_time = None;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore, StorageArea};
    use crate::telemetry::TestType;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, StorageArea, ExecutionStore) {
        let backend = Arc::new(MemoryStore::new());
        let area = StorageArea::new(backend.clone());
        let store = ExecutionStore::new(area.context());
        (backend, area, store)
    }

    fn record(id: &str, status: ExecutionStatus) -> ExecutionRecord {
        let start = Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();
        let mut r = ExecutionRecord::running(id, TestType::Api, format!("test {}", id), start);
        r.status = status;
        if status.is_terminal() {
            r.end_time = Some(start + Duration::milliseconds(150));
            r.execution_time = 150;
        }
        r
    }

    fn ids(store: &ExecutionStore) -> Vec<String> {
        store.get_all().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_empty_store_reads_empty() {
        let (_, _, store) = setup();
        assert!(store.get_all().is_empty());
        assert!(store.last_update_time().is_none());
    }

    #[test]
    fn test_upsert_appends_in_order() {
        let (_, _, store) = setup();
        store.upsert(record("1", ExecutionStatus::Passed));
        store.upsert(record("2", ExecutionStatus::Failed));
        store.upsert(record("3", ExecutionStatus::Running));
        assert_eq!(ids(&store), vec!["1", "2", "3"]);
        assert!(store.last_update_time().is_some());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let (_, _, store) = setup();
        store.upsert(record("1", ExecutionStatus::Passed));
        store.upsert(record("2", ExecutionStatus::Running));
        store.upsert(record("3", ExecutionStatus::Passed));

        store.upsert(record("2", ExecutionStatus::Failed));

        let all = store.get_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].id, "2");
        assert_eq!(all[1].status, ExecutionStatus::Failed);
        assert_eq!(ids(&store), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (backend, _, store) = setup();
        let r = record("1", ExecutionStatus::Passed);
        store.upsert(r.clone());
        let first = store.get_all();

        store.upsert(r);
        assert_eq!(store.get_all(), first);
        assert_eq!(store.get_all().len(), 1);
        // Only the marker moves between the two writes
        let raw = backend.get_item(EXECUTIONS_KEY).unwrap().unwrap();
        let envelope: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope.executions, first);
    }

    #[test]
    fn test_batch_matches_sequential_upserts_with_one_write() {
        let (backend_a, _, batched) = setup();
        let (backend_b, _, sequential) = setup();

        let x = record("x", ExecutionStatus::Passed);
        let y = record("y", ExecutionStatus::Failed);
        let z = record("z", ExecutionStatus::Skipped);
        let y2 = record("y", ExecutionStatus::Passed);

        batched.upsert_batch(vec![x.clone(), y.clone(), z.clone(), y2.clone()]);
        for r in [x, y, z, y2] {
            sequential.upsert(r);
        }

        assert_eq!(batched.get_all(), sequential.get_all());
        assert_eq!(backend_a.write_count(), 1);
        assert_eq!(backend_b.write_count(), 4);
    }

    #[test]
    fn test_delete_by_id() {
        let (_, _, store) = setup();
        store.upsert_batch(vec![
            record("1", ExecutionStatus::Passed),
            record("2", ExecutionStatus::Passed),
        ]);

        store.delete_by_id("1");
        assert_eq!(ids(&store), vec!["2"]);

        // Absent id is a no-op
        store.delete_by_id("nope");
        assert_eq!(ids(&store), vec!["2"]);
    }

    #[test]
    fn test_delete_on_empty_store_writes_nothing() {
        let (backend, _, store) = setup();
        assert!(!store.try_delete_by_id("1").unwrap());
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn test_corrupt_blob_reads_empty_and_blocks_writes() {
        let (backend, _, store) = setup();
        backend.set_item(EXECUTIONS_KEY, "{not json").unwrap();

        assert!(store.get_all().is_empty());
        assert!(store.try_load().is_err());

        // Soft-fail: no panic, corrupt blob left untouched
        store.upsert(record("1", ExecutionStatus::Passed));
        assert_eq!(
            backend.get_item(EXECUTIONS_KEY).unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn test_missing_executions_field_reads_empty() {
        let (backend, _, store) = setup();
        backend
            .set_item(EXECUTIONS_KEY, r#"{"lastUpdateTime":"2026-10-17T00:00:00Z"}"#)
            .unwrap();
        assert!(store.get_all().is_empty());

        store.upsert(record("1", ExecutionStatus::Passed));
        assert_eq!(ids(&store), vec!["1"]);
    }

    #[test]
    fn test_envelope_without_marker_stays_writable() {
        let (backend, _, store) = setup();
        let existing = serde_json::to_string(&record("old", ExecutionStatus::Passed)).unwrap();
        backend
            .set_item(EXECUTIONS_KEY, &format!(r#"{{"executions":[{}]}}"#, existing))
            .unwrap();
        assert_eq!(ids(&store), vec!["old"]);
        assert!(store.last_update_time().is_none());

        store.upsert(record("new", ExecutionStatus::Passed));
        assert_eq!(ids(&store), vec!["old", "new"]);
        assert!(store.last_update_time().is_some());
    }

    #[test]
    fn test_fractional_execution_time_does_not_hide_records() {
        let (backend, _, store) = setup();
        let mut odd = serde_json::to_value(record("odd", ExecutionStatus::Passed)).unwrap();
        odd["executionTime"] = serde_json::json!(3000.5);
        let ok = serde_json::to_value(record("ok", ExecutionStatus::Failed)).unwrap();
        let raw = serde_json::json!({ "executions": [odd, ok] }).to_string();
        backend.set_item(EXECUTIONS_KEY, &raw).unwrap();

        let all = store.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].execution_time, 3001);
    }

    #[test]
    fn test_concurrent_upserts_keep_every_record() {
        let (_, _, store) = setup();
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.upsert(record(&format!("{}-{}", t, i), ExecutionStatus::Passed));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.get_all().len(), 400);
    }

    #[test]
    fn test_concurrent_writers_on_separate_contexts() {
        let (_, area, store) = setup();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let other = ExecutionStore::new(area.context());
                std::thread::spawn(move || {
                    for i in 0..25 {
                        other.upsert(record(&format!("{}-{}", t, i), ExecutionStatus::Running));
                        other.upsert(record(&format!("{}-{}", t, i), ExecutionStatus::Passed));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let all = store.get_all();
        assert_eq!(all.len(), 100);
        assert!(all.iter().all(|r| r.status == ExecutionStatus::Passed));
    }

    #[test]
    fn test_quota_exceeded_is_swallowed() {
        let backend = Arc::new(MemoryStore::with_quota(600));
        let store = ExecutionStore::new(StorageArea::new(backend.clone()).context());

        store.upsert(record("1", ExecutionStatus::Passed));
        assert_eq!(ids(&store), vec!["1"]);

        let mut big = record("2", ExecutionStatus::Failed);
        big.error_message = Some("e".repeat(1024));
        store.upsert(big.clone());
        assert_eq!(ids(&store), vec!["1"]);

        let err = store.try_upsert_batch(vec![big]).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_running_record_drops_end_time() {
        let (_, _, store) = setup();
        let mut r = record("1", ExecutionStatus::Running);
        r.end_time = Some(r.start_time);
        store.upsert(r);
        assert_eq!(store.get_all()[0].end_time, None);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (_, _, store) = setup();
        store.upsert(record("1", ExecutionStatus::Passed));
        store.clear();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_contexts_see_each_others_records() {
        let (_, area, a) = setup();
        let b = ExecutionStore::new(area.context());

        a.upsert(record("1", ExecutionStatus::Running));
        b.upsert(record("1", ExecutionStatus::Passed));
        let all = a.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ExecutionStatus::Passed);
    }

    #[test]
    fn test_last_writer_wins_on_stale_blob() {
        // Known race: a writer holding a stale copy of the envelope
        // overwrites records another context added in between.
        let (_, area, a) = setup();
        let b = ExecutionStore::new(area.context());
        a.upsert(record("base", ExecutionStatus::Passed));

        let mut stale = a.try_load().unwrap().unwrap();
        b.upsert(record("from-b", ExecutionStatus::Passed));

        stale.upsert(record("from-a", ExecutionStatus::Passed));
        let raw = serde_json::to_string(&stale).unwrap();
        a.context().set_item(EXECUTIONS_KEY, &raw).unwrap();

        assert_eq!(ids(&b), vec!["base", "from-a"]);
    }
}
