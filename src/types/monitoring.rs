//! Monitoring data model: jobs, rules, alerts and time-series points

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Monitoring Jobs
// ============================================================================

/// Analysis families a monitoring job may run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Threshold,
    Trend,
    Anomaly,
    Forecast,
}

/// A scheduled job whose target is rule evaluation rather than a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringJob {
    pub id: String,
    pub name: String,
    pub ontology_id: String,
    pub cron_expr: String,
    pub enabled: bool,
    /// Which rule families this job evaluates; empty means all
    #[serde(default)]
    pub analysis_types: Vec<AnalysisType>,
}

impl MonitoringJob {
    pub fn new(
        name: impl Into<String>,
        ontology_id: impl Into<String>,
        cron_expr: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            ontology_id: ontology_id.into(),
            cron_expr: cron_expr.into(),
            enabled: true,
            analysis_types: Vec::new(),
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Comparison operator for threshold rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThresholdOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl ThresholdOp {
    /// Apply the comparison. `=` is exact float equality by design; callers
    /// monitoring continuous metrics should prefer a band via two rules.
    pub fn holds(&self, observed: f64, value: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < value,
            ThresholdOp::Le => observed <= value,
            ThresholdOp::Eq => observed == value,
            ThresholdOp::Ge => observed >= value,
            ThresholdOp::Gt => observed > value,
        }
    }
}

/// Expected direction for trend rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Which side of the forecast threshold raises an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForecastBound {
    Below,
    Above,
}

/// Typed rule condition; the wire shape keeps the original
/// `{"rule_type": ..., "condition": {...}}` split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule_type", content = "condition", rename_all = "snake_case")]
pub enum RuleCondition {
    Threshold {
        op: ThresholdOp,
        value: f64,
    },
    Trend {
        expected: TrendDirection,
        min_change_percent: f64,
        /// Number of most-recent points fitted
        window: usize,
    },
    Anomaly {
        z_threshold: f64,
    },
    Forecast {
        horizon_steps: usize,
        alert_if: ForecastBound,
        value: f64,
    },
}

impl RuleCondition {
    /// Analysis family this condition belongs to.
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            RuleCondition::Threshold { .. } => AnalysisType::Threshold,
            RuleCondition::Trend { .. } => AnalysisType::Trend,
            RuleCondition::Anomaly { .. } => AnalysisType::Anomaly,
            RuleCondition::Forecast { .. } => AnalysisType::Forecast,
        }
    }

    /// Minimum window length the evaluator needs for this condition.
    pub fn min_points(&self) -> usize {
        match self {
            RuleCondition::Threshold { .. } => 1,
            RuleCondition::Trend { window, .. } => (*window).max(3),
            RuleCondition::Anomaly { .. } => 10,
            RuleCondition::Forecast { .. } => 2,
        }
    }
}

/// Alert severity ladder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Declarative condition over an (entity, metric) series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: String,
    pub ontology_id: String,
    /// Explicit target entity; `None` targets every entity carrying the metric
    #[serde(default)]
    pub entity_id: Option<String>,
    pub metric_name: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl MonitoringRule {
    pub fn new(
        ontology_id: impl Into<String>,
        metric_name: impl Into<String>,
        condition: RuleCondition,
        severity: Severity,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ontology_id: ontology_id.into(),
            entity_id: None,
            metric_name: metric_name.into(),
            condition,
            severity,
            enabled: true,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert lifecycle. Resolution is always an explicit user action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// User-visible signal produced by a firing rule.
///
/// `fingerprint` identifies the (rule, entity, metric) tuple; the store
/// guarantees at most one `Active` alert per fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub entity_id: String,
    pub metric: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl Alert {
    /// Dedup key over the identifying tuple.
    pub fn fingerprint_of(rule_id: &str, entity_id: &str, metric: &str) -> String {
        format!("{:x}", md5::compute(format!("{rule_id}|{entity_id}|{metric}")))
    }

    /// Fresh active alert for a firing rule.
    pub fn open(
        rule: &MonitoringRule,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let entity_id = entity_id.into();
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            entity_id: entity_id.clone(),
            metric: rule.metric_name.clone(),
            severity: rule.severity,
            message: message.into(),
            status: AlertStatus::Active,
            opened_at: now,
            updated_at: now,
            fingerprint: Self::fingerprint_of(&rule.id, &entity_id, &rule.metric_name),
        }
    }
}

// ============================================================================
// Time Series
// ============================================================================

/// One observation of a metric on an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub entity_id: String,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
