//! Time-series table
//!
//! Key layout: `entity \x1f metric \x1f millis(BE)`, so a (entity, metric)
//! window is one contiguous range scan in timestamp order.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::warn;

use super::{ts_key_segment, Store, StoreError, KEY_SEP};
use crate::types::TimeSeriesPoint;

fn series_prefix(entity_id: &str, metric_name: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(entity_id.len() + metric_name.len() + 2);
    prefix.extend_from_slice(entity_id.as_bytes());
    prefix.push(KEY_SEP);
    prefix.extend_from_slice(metric_name.as_bytes());
    prefix.push(KEY_SEP);
    prefix
}

fn point_key(point: &TimeSeriesPoint) -> Vec<u8> {
    let mut key = series_prefix(&point.entity_id, &point.metric_name);
    key.extend_from_slice(&ts_key_segment(point.timestamp));
    key
}

impl Store {
    /// Append one observation. A point at an existing (entity, metric,
    /// timestamp) overwrites — the series holds one value per instant.
    pub fn append_point(&self, point: &TimeSeriesPoint) -> Result<(), StoreError> {
        Self::put(&self.time_series, point_key(point), point)
    }

    pub fn append_points(&self, points: &[TimeSeriesPoint]) -> Result<(), StoreError> {
        for point in points {
            self.append_point(point)?;
        }
        Ok(())
    }

    /// Window query, ascending by timestamp. May return empty.
    pub fn query_time_series(
        &self,
        entity_id: &str,
        metric_name: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let prefix = series_prefix(entity_id, metric_name);
        let mut lo = prefix.clone();
        lo.extend_from_slice(&ts_key_segment(since));
        let mut hi = prefix;
        hi.extend_from_slice(&ts_key_segment(until));

        let mut out = Vec::new();
        for item in self.time_series.range(lo..=hi) {
            let (_key, value) = item?;
            match serde_json::from_slice(&value) {
                Ok(point) => out.push(point),
                Err(e) => warn!(error = %e, "Skipping undecodable time-series row"),
            }
        }
        Ok(out)
    }

    /// Most recent `n` points of a series, ascending by timestamp.
    pub fn latest_points(
        &self,
        entity_id: &str,
        metric_name: &str,
        n: usize,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let prefix = series_prefix(entity_id, metric_name);
        let mut out: Vec<TimeSeriesPoint> = Vec::with_capacity(n);
        for item in self.time_series.scan_prefix(&prefix).rev() {
            if out.len() >= n {
                break;
            }
            let (_key, value) = item?;
            match serde_json::from_slice(&value) {
                Ok(point) => out.push(point),
                Err(e) => warn!(error = %e, "Skipping undecodable time-series row"),
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Distinct entity ids that have at least one observation of `metric`.
    /// Used by rules without an explicit target entity.
    pub fn entities_with_metric(&self, metric_name: &str) -> Result<Vec<String>, StoreError> {
        let mut entities = BTreeSet::new();
        for item in self.time_series.iter() {
            let (key, _value) = item?;
            let mut parts = key.split(|b| *b == KEY_SEP);
            let (Some(entity), Some(metric)) = (parts.next(), parts.next()) else {
                continue;
            };
            if metric == metric_name.as_bytes() {
                entities.insert(String::from_utf8_lossy(entity).into_owned());
            }
        }
        Ok(entities.into_iter().collect())
    }

    /// Retention sweep across all series.
    pub fn purge_time_series_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let boundary = ts_key_segment(cutoff);
        let mut purged = 0;
        let keys: Vec<_> = self
            .time_series
            .iter()
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            // timestamp is the trailing 8 bytes of every series key
            if key.len() < 8 {
                continue;
            }
            if key[key.len() - 8..] < boundary[..] {
                self.time_series.remove(&key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    fn point(entity: &str, metric: &str, offset_secs: i64, value: f64) -> TimeSeriesPoint {
        TimeSeriesPoint {
            entity_id: entity.to_string(),
            metric_name: metric.to_string(),
            timestamp: Utc::now() + chrono::Duration::seconds(offset_secs),
            value,
        }
    }

    #[test]
    fn test_window_query_ascending() {
        let (_dir, store) = open_temp();
        for i in 0..5 {
            store.append_point(&point("E1", "stock", i, i as f64)).unwrap();
        }
        // a different series must not leak into the window
        store.append_point(&point("E2", "stock", 2, 99.0)).unwrap();
        store.append_point(&point("E1", "temp", 2, 99.0)).unwrap();

        let window = store
            .query_time_series(
                "E1",
                "stock",
                Utc::now() - chrono::Duration::seconds(60),
                Utc::now() + chrono::Duration::seconds(60),
            )
            .unwrap();
        assert_eq!(window.len(), 5);
        assert!(window.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(window[4].value, 4.0);
    }

    #[test]
    fn test_latest_points_tail() {
        let (_dir, store) = open_temp();
        for i in 0..10 {
            store.append_point(&point("E1", "stock", i, i as f64)).unwrap();
        }
        let tail = store.latest_points("E1", "stock", 3).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].value, 7.0);
        assert_eq!(tail[2].value, 9.0);
    }

    #[test]
    fn test_empty_series_is_empty() {
        let (_dir, store) = open_temp();
        let window = store
            .query_time_series(
                "nobody",
                "nothing",
                Utc::now() - chrono::Duration::hours(1),
                Utc::now(),
            )
            .unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn test_entities_with_metric() {
        let (_dir, store) = open_temp();
        store.append_point(&point("E1", "stock", 0, 1.0)).unwrap();
        store.append_point(&point("E2", "stock", 0, 2.0)).unwrap();
        store.append_point(&point("E3", "temp", 0, 3.0)).unwrap();

        let entities = store.entities_with_metric("stock").unwrap();
        assert_eq!(entities, vec!["E1".to_string(), "E2".to_string()]);
    }

    #[test]
    fn test_purge_old_points() {
        let (_dir, store) = open_temp();
        store.append_point(&point("E1", "stock", -86_400 * 60, 1.0)).unwrap();
        store.append_point(&point("E1", "stock", 0, 2.0)).unwrap();

        let purged = store
            .purge_time_series_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(purged, 1);
        let remaining = store.latest_points("E1", "stock", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 2.0);
    }
}
