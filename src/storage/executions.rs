//! Execution log
//!
//! Append-only audit of pipeline and monitoring runs. The primary key is
//! `start-millis (BE) + id`, so iteration order is chronological and recent
//! history is a reverse scan; a small id index supports point lookups.
//! A record is written once and afterwards only its terminal fields
//! (status, end, duration, error) may change.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{ts_key_segment, Store, StoreError, KEY_SEP};
use crate::types::{ExecutionRecord, ExecutionStatistics, ExecutionStatus};

fn execution_key(record: &ExecutionRecord) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 1 + record.id.len());
    key.extend_from_slice(&ts_key_segment(record.start));
    key.push(KEY_SEP);
    key.extend_from_slice(record.id.as_bytes());
    key
}

impl Store {
    /// Append a new execution record. Fails on id reuse.
    pub fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        if self.execution_index.contains_key(record.id.as_bytes())? {
            return Err(StoreError::Conflict(format!(
                "execution {} already recorded",
                record.id
            )));
        }
        let key = execution_key(record);
        Self::put(&self.executions, &key, record)?;
        self.execution_index.insert(record.id.as_bytes(), key)?;
        Ok(())
    }

    /// Overwrite an existing record with its finished form. Only terminal
    /// fields and per-step results are expected to differ from the appended
    /// row.
    pub fn finish_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let key = self
            .execution_index
            .get(record.id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", record.id)))?;
        Self::put(&self.executions, &key, record)
    }

    pub fn load_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        match self.execution_index.get(id.as_bytes())? {
            Some(key) => Self::get(&self.executions, &key),
            None => Ok(None),
        }
    }

    /// Most recent executions, newest first.
    pub fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(64));
        for item in self.executions.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            match serde_json::from_slice(&value) {
                Ok(record) => out.push(record),
                Err(e) => warn!(error = %e, "Skipping undecodable execution row"),
            }
        }
        Ok(out)
    }

    pub fn running_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(Self::scan::<ExecutionRecord>(&self.executions)?
            .into_iter()
            .filter(|r| r.status == ExecutionStatus::Running)
            .collect())
    }

    /// Boot-time sweep: every record still `running` was orphaned by the
    /// previous process and is marked failed. Returns the number swept.
    pub fn sweep_orphaned_executions(&self) -> Result<usize, StoreError> {
        let mut swept = 0;
        for item in self.executions.iter() {
            let (key, value) = item?;
            let mut record: ExecutionRecord = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.status != ExecutionStatus::Running {
                continue;
            }
            record.finish(
                ExecutionStatus::Failed,
                Some("orphaned_by_restart".to_string()),
            );
            Self::put(&self.executions, &key, &record)?;
            swept += 1;
        }
        Ok(swept)
    }

    pub fn execution_statistics(&self) -> Result<ExecutionStatistics, StoreError> {
        let mut stats = ExecutionStatistics::default();
        let mut duration_sum: u64 = 0;
        let mut duration_count: u64 = 0;
        for record in Self::scan::<ExecutionRecord>(&self.executions)? {
            stats.total += 1;
            match record.status {
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Succeeded => stats.succeeded += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
            }
            if let Some(ms) = record.duration_ms {
                duration_sum += ms;
                duration_count += 1;
            }
        }
        if duration_count > 0 {
            stats.average_duration_ms = duration_sum as f64 / duration_count as f64;
        }
        Ok(stats)
    }

    /// Drop finished executions that started before `cutoff`. Running rows
    /// are kept regardless of age.
    pub fn purge_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let boundary = ts_key_segment(cutoff);
        let mut purged = 0;
        let keys: Vec<_> = self
            .executions
            .range(..boundary.to_vec())
            .collect::<Result<Vec<_>, _>>()?;
        for (key, value) in keys {
            let record: ExecutionRecord = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.status == ExecutionStatus::Running {
                continue;
            }
            self.executions.remove(&key)?;
            self.execution_index.remove(record.id.as_bytes())?;
            purged += 1;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggeredBy;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_append_and_load() {
        let (_dir, store) = open_temp();
        let record = ExecutionRecord::started("p1", None, TriggeredBy::Api);
        store.append_execution(&record).unwrap();

        let loaded = store.load_execution(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.pipeline_ref, "p1");
    }

    #[test]
    fn test_append_twice_conflicts() {
        let (_dir, store) = open_temp();
        let record = ExecutionRecord::started("p1", None, TriggeredBy::Api);
        store.append_execution(&record).unwrap();
        match store.append_execution(&record) {
            Err(StoreError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_updates_terminal_fields() {
        let (_dir, store) = open_temp();
        let mut record = ExecutionRecord::started("p1", None, TriggeredBy::Api);
        store.append_execution(&record).unwrap();

        record.finish(ExecutionStatus::Succeeded, None);
        store.finish_execution(&record).unwrap();

        let loaded = store.load_execution(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Succeeded);
        assert!(loaded.duration_ms.is_some());
    }

    #[test]
    fn test_sweep_marks_running_as_orphaned() {
        let (_dir, store) = open_temp();
        let running = ExecutionRecord::started("p1", Some("J1".to_string()), TriggeredBy::Api);
        let mut finished = ExecutionRecord::started("p2", None, TriggeredBy::Api);
        finished.finish(ExecutionStatus::Succeeded, None);
        store.append_execution(&running).unwrap();
        store.append_execution(&finished).unwrap();

        let swept = store.sweep_orphaned_executions().unwrap();
        assert_eq!(swept, 1);

        let loaded = store.load_execution(&running.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("orphaned_by_restart"));

        // the finished record is untouched
        let untouched = store.load_execution(&finished.id).unwrap().unwrap();
        assert_eq!(untouched.status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let (_dir, store) = open_temp();
        for i in 0..5 {
            let mut record = ExecutionRecord::started(format!("p{i}"), None, TriggeredBy::Api);
            record.start = Utc::now() + chrono::Duration::milliseconds(i);
            store.append_execution(&record).unwrap();
        }
        let recent = store.recent_executions(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].pipeline_ref, "p4");
        assert_eq!(recent[2].pipeline_ref, "p2");
    }

    #[test]
    fn test_statistics_counts() {
        let (_dir, store) = open_temp();
        let mut ok = ExecutionRecord::started("p", None, TriggeredBy::Api);
        ok.finish(ExecutionStatus::Succeeded, None);
        let mut failed = ExecutionRecord::started("p", None, TriggeredBy::Api);
        failed.finish(ExecutionStatus::Failed, Some("boom".to_string()));
        store.append_execution(&ok).unwrap();
        store.append_execution(&failed).unwrap();

        let stats = store.execution_statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_purge_respects_running() {
        let (_dir, store) = open_temp();
        let mut old_done = ExecutionRecord::started("old", None, TriggeredBy::Api);
        old_done.start = Utc::now() - chrono::Duration::days(90);
        old_done.finish(ExecutionStatus::Succeeded, None);
        let mut old_running = ExecutionRecord::started("stuck", None, TriggeredBy::Api);
        old_running.start = Utc::now() - chrono::Duration::days(90);
        store.append_execution(&old_done).unwrap();
        store.append_execution(&old_running).unwrap();

        let purged = store
            .purge_executions_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.load_execution(&old_done.id).unwrap().is_none());
        assert!(store.load_execution(&old_running.id).unwrap().is_some());
    }
}
