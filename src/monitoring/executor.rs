//! Monitoring job executor

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rules::evaluate_window;
use crate::error::CoreError;
use crate::storage::Store;
use crate::types::{Alert, MonitoringJob, MonitoringRule};

/// How far back each rule family reaches when pulling its window.
fn fetch_count(rule: &MonitoringRule) -> usize {
    // generous fetch; evaluators trim and enforce their own minimums
    rule.condition.min_points().max(20)
}

/// Evaluates monitoring rules against stored time series and maintains the
/// active-alert set.
pub struct MonitoringExecutor {
    store: Arc<Store>,
}

impl MonitoringExecutor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Run one monitoring job. Returns the alerts that fired this pass
    /// (created or re-touched). Per-rule failures are logged and skipped;
    /// the call fails only when rules existed and every evaluation errored.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        job: &MonitoringJob,
    ) -> Result<Vec<Alert>, CoreError> {
        let mut rules = self.store.rules_for_ontology(&job.ontology_id)?;
        if !job.analysis_types.is_empty() {
            rules.retain(|r| job.analysis_types.contains(&r.condition.analysis_type()));
        }
        info!(
            job = %job.name,
            ontology = %job.ontology_id,
            rules = rules.len(),
            "Monitoring execution started"
        );

        let mut alerts = Vec::new();
        let mut attempted: usize = 0;
        let mut failed: usize = 0;

        for rule in &rules {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let entities = match &rule.entity_id {
                Some(entity) => vec![entity.clone()],
                None => self.store.entities_with_metric(&rule.metric_name)?,
            };
            if entities.is_empty() {
                debug!(rule = %rule.id, metric = %rule.metric_name, "No entities carry this metric");
                continue;
            }

            for entity in entities {
                attempted += 1;
                match self.evaluate_rule(rule, &entity) {
                    Ok(Some(alert)) => alerts.push(alert),
                    Ok(None) => {}
                    Err(e) => {
                        failed += 1;
                        warn!(
                            rule = %rule.id,
                            entity = %entity,
                            metric = %rule.metric_name,
                            error = %e,
                            "Rule evaluation failed — continuing"
                        );
                    }
                }
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(CoreError::Validation(format!(
                "all {attempted} rule evaluations failed"
            )));
        }

        info!(
            job = %job.name,
            evaluated = attempted,
            failed,
            alerts = alerts.len(),
            "Monitoring execution finished"
        );
        Ok(alerts)
    }

    /// Evaluate one (rule, entity) pair and upsert the alert if it fires.
    fn evaluate_rule(
        &self,
        rule: &MonitoringRule,
        entity_id: &str,
    ) -> Result<Option<Alert>, CoreError> {
        let points =
            self.store
                .latest_points(entity_id, &rule.metric_name, fetch_count(rule))?;
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();

        let Some(message) = evaluate_window(&rule.condition, &rule.metric_name, &values)? else {
            return Ok(None);
        };

        let candidate = Alert::open(rule, entity_id, message);
        let (alert, created) = self.store.upsert_active_alert(&candidate)?;
        if created {
            info!(
                alert = %alert.id,
                entity = %entity_id,
                metric = %rule.metric_name,
                severity = %alert.severity,
                "Alert opened"
            );
        } else {
            debug!(alert = %alert.id, "Active alert refreshed");
        }
        Ok(Some(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AlertStatus, AnalysisType, RuleCondition, Severity, ThresholdOp, TimeSeriesPoint,
    };
    use chrono::Utc;

    fn setup() -> (tempfile::TempDir, MonitoringExecutor, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        let executor = MonitoringExecutor::new(Arc::clone(&store));
        (dir, executor, store)
    }

    fn insert_points(store: &Store, entity: &str, metric: &str, values: &[f64]) {
        for (i, value) in values.iter().enumerate() {
            store
                .append_point(&TimeSeriesPoint {
                    entity_id: entity.to_string(),
                    metric_name: metric.to_string(),
                    timestamp: Utc::now() + chrono::Duration::seconds(i as i64),
                    value: *value,
                })
                .unwrap();
        }
    }

    fn stock_rule(store: &Store) -> MonitoringRule {
        let rule = MonitoringRule::new(
            "onto-1",
            "stock",
            RuleCondition::Threshold {
                op: ThresholdOp::Lt,
                value: 5.0,
            },
            Severity::High,
        );
        store.save_rule(&rule).unwrap();
        rule
    }

    #[tokio::test]
    async fn test_threshold_alert_lifecycle() {
        let (_dir, executor, store) = setup();
        let rule = stock_rule(&store);
        insert_points(&store, "E1", "stock", &[10.0, 3.0]);

        let job = MonitoringJob::new("inventory", "onto-1", "*/5 * * * *");
        let cancel = CancellationToken::new();

        let alerts = executor.execute(&cancel, &job).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity_id, "E1");
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(
            alerts[0].fingerprint,
            Alert::fingerprint_of(&rule.id, "E1", "stock")
        );

        // re-execute without new data: same alert, touched not duplicated
        let first_update = alerts[0].updated_at;
        let again = executor.execute(&cancel, &job).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, alerts[0].id);
        assert!(again[0].updated_at >= first_update);
        assert_eq!(
            store.list_alerts(Some(AlertStatus::Active)).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rule_without_entity_targets_all_carriers() {
        let (_dir, executor, store) = setup();
        stock_rule(&store);
        insert_points(&store, "E1", "stock", &[3.0]);
        insert_points(&store, "E2", "stock", &[2.0]);
        insert_points(&store, "E3", "stock", &[100.0]);

        let job = MonitoringJob::new("inventory", "onto-1", "*/5 * * * *");
        let alerts = executor
            .execute(&CancellationToken::new(), &job)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_rule_does_not_sink_the_run() {
        let (_dir, executor, store) = setup();
        // anomaly rule with too little data errors per-evaluation
        let anomaly = MonitoringRule::new(
            "onto-1",
            "stock",
            RuleCondition::Anomaly { z_threshold: 3.0 },
            Severity::Medium,
        );
        store.save_rule(&anomaly).unwrap();
        stock_rule(&store);
        insert_points(&store, "E1", "stock", &[3.0]);

        let job = MonitoringJob::new("inventory", "onto-1", "*/5 * * * *");
        let alerts = executor
            .execute(&CancellationToken::new(), &job)
            .await
            .unwrap();
        // the threshold rule still fired
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_all_rules_failing_fails_the_run() {
        let (_dir, executor, store) = setup();
        let anomaly = MonitoringRule::new(
            "onto-1",
            "stock",
            RuleCondition::Anomaly { z_threshold: 3.0 },
            Severity::Medium,
        );
        store.save_rule(&anomaly).unwrap();
        insert_points(&store, "E1", "stock", &[3.0]);

        let job = MonitoringJob::new("inventory", "onto-1", "*/5 * * * *");
        let result = executor.execute(&CancellationToken::new(), &job).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_analysis_type_filter() {
        let (_dir, executor, store) = setup();
        stock_rule(&store);
        insert_points(&store, "E1", "stock", &[3.0]);

        let mut job = MonitoringJob::new("trend-only", "onto-1", "*/5 * * * *");
        job.analysis_types = vec![AnalysisType::Trend];

        let alerts = executor
            .execute(&CancellationToken::new(), &job)
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }
}
