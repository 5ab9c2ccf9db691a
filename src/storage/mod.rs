//! Durable store — single source of truth for jobs, pipelines, executions,
//! monitoring rules, alerts, time series, twins and simulation artifacts.
//!
//! Backed by one sled database with a named tree per table. Values are JSON;
//! time-ordered tables use big-endian timestamp key segments so iteration
//! order is chronological. Sled gives write-ahead durability with background
//! flushing; `checkpoint` forces a flush and `backup_to` takes an atomic
//! export on graceful shutdown.
//!
//! Every operation either fully commits or fails with a typed error; sled
//! I/O failures surface as `StoreError::Unavailable` and the caller decides
//! whether to retry or surface.

mod executions;
mod jobs;
mod monitoring;
mod pipelines;
mod timeseries;
mod twins;

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Separator between key segments (entity, metric, id) inside composite keys.
/// IDs are UUIDs and URIs in practice; the unit separator never collides.
pub(crate) const KEY_SEP: u8 = 0x1f;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying sled I/O failed; the operation did not commit
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness or state-transition constraint was violated
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Handle to the durable store. Cheap to clone; all clones share the same
/// underlying database.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    pub(crate) jobs: sled::Tree,
    pub(crate) pipelines: sled::Tree,
    pub(crate) executions: sled::Tree,
    pub(crate) execution_index: sled::Tree,
    pub(crate) monitoring_jobs: sled::Tree,
    pub(crate) rules: sled::Tree,
    pub(crate) alerts: sled::Tree,
    pub(crate) alert_fingerprints: sled::Tree,
    pub(crate) time_series: sled::Tree,
    pub(crate) twins: sled::Tree,
    pub(crate) scenarios: sled::Tree,
    pub(crate) runs: sled::Tree,
    pub(crate) snapshots: sled::Tree,
    pub(crate) models: sled::Tree,
}

impl Store {
    /// Open or create the store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, StoreError> {
        let db = sled::open(path)?;
        let store = Self {
            jobs: db.open_tree("scheduled_jobs")?,
            pipelines: db.open_tree("pipelines")?,
            executions: db.open_tree("job_executions")?,
            execution_index: db.open_tree("job_execution_index")?,
            monitoring_jobs: db.open_tree("monitoring_jobs")?,
            rules: db.open_tree("monitoring_rules")?,
            alerts: db.open_tree("alerts")?,
            alert_fingerprints: db.open_tree("alert_fingerprints")?,
            time_series: db.open_tree("time_series")?,
            twins: db.open_tree("digital_twins")?,
            scenarios: db.open_tree("simulation_scenarios")?,
            runs: db.open_tree("simulation_runs")?,
            snapshots: db.open_tree("simulation_snapshots")?,
            models: db.open_tree("twin_state_models")?,
            db,
        };
        info!(size_bytes = store.size_on_disk(), "Store opened");
        Ok(Arc::new(store))
    }

    /// Force all pending writes to disk.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let flushed = self.db.flush()?;
        debug!(bytes = flushed, "Store checkpoint complete");
        Ok(())
    }

    /// Atomic backup: export every tree into a fresh database at `path`.
    /// Any previous backup at that path is replaced.
    pub fn backup_to<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_dir_all(path)
                .map_err(|e| StoreError::Unavailable(format!("clearing old backup: {e}")))?;
        }
        self.checkpoint()?;
        let export = self.db.export();
        let backup = sled::open(path)?;
        backup.import(export);
        backup.flush()?;
        info!(path = %path.display(), "Store backup written");
        Ok(())
    }

    /// Purge history older than the retention window: finished executions,
    /// time-series points and resolved alerts. Returns the purged row count.
    pub fn purge_retained(&self, retention_days: u32) -> Result<usize, StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut purged = 0;
        purged += self.purge_executions_before(cutoff)?;
        purged += self.purge_time_series_before(cutoff)?;
        purged += self.purge_resolved_alerts_before(cutoff)?;
        if purged > 0 {
            info!(purged, retention_days, "Retention purge complete");
        }
        Ok(purged)
    }

    pub fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Shared JSON helpers
    // ------------------------------------------------------------------

    pub(crate) fn put<T: Serialize>(
        tree: &sled::Tree,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        tree.insert(key.as_ref(), bytes)?;
        Ok(())
    }

    pub(crate) fn get<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>, StoreError> {
        match tree.get(key.as_ref())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan a whole tree, skipping rows that no longer deserialize (a
    /// schema-drift row is logged and ignored rather than poisoning reads).
    pub(crate) fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, value) = item?;
            match serde_json::from_slice(&value) {
                Ok(parsed) => out.push(parsed),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "Skipping undecodable row");
                }
            }
        }
        Ok(out)
    }
}

/// Big-endian millisecond key segment for a timestamp; sorts chronologically.
pub(crate) fn ts_key_segment(ts: chrono::DateTime<chrono::Utc>) -> [u8; 8] {
    // Clamp pre-epoch to zero so ordering still holds for degenerate input.
    (ts.timestamp_millis().max(0) as u64).to_be_bytes()
}
