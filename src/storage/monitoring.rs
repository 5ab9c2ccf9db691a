//! Monitoring tables: jobs, rules and alerts
//!
//! Alert deduplication is enforced here, not in the executor: the
//! `alert_fingerprints` tree maps each fingerprint to its single active
//! alert id, and `upsert_active_alert` updates both trees in one sled
//! transaction so concurrent evaluations cannot race a duplicate in.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use super::{Store, StoreError};
use crate::types::{Alert, AlertStatus, MonitoringJob, MonitoringRule};

impl Store {
    // ------------------------------------------------------------------
    // Monitoring jobs
    // ------------------------------------------------------------------

    pub fn save_monitoring_job(&self, job: &MonitoringJob) -> Result<(), StoreError> {
        Self::put(&self.monitoring_jobs, job.id.as_bytes(), job)
    }

    pub fn load_monitoring_job(&self, id: &str) -> Result<Option<MonitoringJob>, StoreError> {
        Self::get(&self.monitoring_jobs, id.as_bytes())
    }

    pub fn list_monitoring_jobs(&self) -> Result<Vec<MonitoringJob>, StoreError> {
        Self::scan(&self.monitoring_jobs)
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub fn save_rule(&self, rule: &MonitoringRule) -> Result<(), StoreError> {
        Self::put(&self.rules, rule.id.as_bytes(), rule)
    }

    pub fn load_rule(&self, id: &str) -> Result<Option<MonitoringRule>, StoreError> {
        Self::get(&self.rules, id.as_bytes())
    }

    pub fn list_rules(&self) -> Result<Vec<MonitoringRule>, StoreError> {
        Self::scan(&self.rules)
    }

    /// Enabled rules scoped to one ontology — the monitoring executor's
    /// working set.
    pub fn rules_for_ontology(&self, ontology_id: &str) -> Result<Vec<MonitoringRule>, StoreError> {
        Ok(Self::scan::<MonitoringRule>(&self.rules)?
            .into_iter()
            .filter(|r| r.enabled && r.ontology_id == ontology_id)
            .collect())
    }

    pub fn delete_rule(&self, id: &str) -> Result<(), StoreError> {
        self.rules
            .remove(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("rule {id}")))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    pub fn load_alert(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        Self::get(&self.alerts, id.as_bytes())
    }

    pub fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = Self::scan::<Alert>(&self.alerts)?
            .into_iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .collect();
        alerts.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(alerts)
    }

    /// Create-or-touch through the fingerprint index. If an active alert
    /// with the candidate's fingerprint exists, its `updated_at` advances
    /// and it is returned; otherwise the candidate is inserted and indexed.
    /// Returns `(alert, created)`.
    pub fn upsert_active_alert(&self, candidate: &Alert) -> Result<(Alert, bool), StoreError> {
        let candidate_bytes = serde_json::to_vec(candidate)?;
        let fingerprint = candidate.fingerprint.as_bytes().to_vec();
        let now = Utc::now();

        let result = (&self.alerts, &self.alert_fingerprints).transaction(
            move |(alerts, fingerprints)| {
                if let Some(existing_id) = fingerprints.get(&fingerprint)? {
                    let existing_bytes = alerts.get(&existing_id)?.ok_or_else(|| {
                        ConflictableTransactionError::Abort(StoreError::Conflict(
                            "fingerprint index points at a missing alert".to_string(),
                        ))
                    })?;
                    let mut existing: Alert =
                        serde_json::from_slice(&existing_bytes).map_err(|e| {
                            ConflictableTransactionError::Abort(StoreError::Serialization(
                                e.to_string(),
                            ))
                        })?;
                    existing.updated_at = now;
                    let updated = serde_json::to_vec(&existing).map_err(|e| {
                        ConflictableTransactionError::Abort(StoreError::Serialization(
                            e.to_string(),
                        ))
                    })?;
                    alerts.insert(existing_id, updated)?;
                    Ok((existing, false))
                } else {
                    alerts.insert(candidate.id.as_bytes(), candidate_bytes.clone())?;
                    fingerprints
                        .insert(fingerprint.clone(), candidate.id.as_bytes())?;
                    Ok((candidate.clone(), true))
                }
            },
        );

        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StoreError::from(err),
        })
    }

    /// Explicit lifecycle transition. Leaving `Active` removes the
    /// fingerprint index entry so the next firing opens a fresh alert.
    pub fn set_alert_status(&self, id: &str, status: AlertStatus) -> Result<Alert, StoreError> {
        let mut alert = self
            .load_alert(id)?
            .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;
        let was_active = alert.status == AlertStatus::Active;
        alert.status = status;
        alert.updated_at = Utc::now();

        Self::put(&self.alerts, alert.id.as_bytes(), &alert)?;
        if was_active && status != AlertStatus::Active {
            self.alert_fingerprints
                .remove(alert.fingerprint.as_bytes())?;
        }
        Ok(alert)
    }

    /// Retention sweep over resolved alerts.
    pub fn purge_resolved_alerts_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut purged = 0;
        for alert in Self::scan::<Alert>(&self.alerts)? {
            if alert.status == AlertStatus::Resolved && alert.updated_at < cutoff {
                self.alerts.remove(alert.id.as_bytes())?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
