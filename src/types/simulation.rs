//! Simulation model: scenarios, events, runs, snapshots and metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::twin::{EntityState, EntityStatus};

// ============================================================================
// Scenarios & Events
// ============================================================================

/// Scenario archetypes offered by the API; `Custom` carries arbitrary events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    Baseline,
    DataQualityIssue,
    CapacityTest,
    Custom,
}

/// Effects an event can apply to its target entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EntityUnavailable,
    EntityRestored,
    CapacityChange,
    DemandSurge,
    QualityDegradation,
    OptimizationApplied,
    ExternalShift,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::EntityUnavailable => "entity_unavailable",
            EventKind::EntityRestored => "entity_restored",
            EventKind::CapacityChange => "capacity_change",
            EventKind::DemandSurge => "demand_surge",
            EventKind::QualityDegradation => "quality_degradation",
            EventKind::OptimizationApplied => "optimization_applied",
            EventKind::ExternalShift => "external_shift",
        };
        write!(f, "{s}")
    }
}

/// Secondary-event attenuation attached to a primary event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Propagation {
    /// Multiplied into relationship strength; chain stops below the
    /// significance threshold
    pub factor: f64,
    #[serde(default)]
    pub delay_steps: u64,
}

/// One scheduled occurrence inside a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationEvent {
    /// 1-based step at which the event applies
    pub step: u64,
    #[serde(default)]
    pub target_uri: Option<String>,
    pub kind: EventKind,
    /// Kind-specific parameters (`magnitude`, `capacity`, ...)
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub propagation: Option<Propagation>,
}

/// A named bundle of events run against a twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationScenario {
    pub id: String,
    pub twin_id: String,
    pub name: String,
    pub scenario_type: ScenarioType,
    pub duration_steps: u64,
    #[serde(default)]
    pub events: Vec<SimulationEvent>,
}

impl SimulationScenario {
    pub fn new(
        twin_id: impl Into<String>,
        name: impl Into<String>,
        scenario_type: ScenarioType,
        duration_steps: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            twin_id: twin_id.into(),
            name: name.into(),
            scenario_type,
            duration_steps,
            events: Vec::new(),
        }
    }
}

// ============================================================================
// Runs & Snapshots
// ============================================================================

/// Simulation run lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Global gauges captured with each snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub average_utilization: f64,
    pub active_entities: usize,
    pub degraded_entities: usize,
    pub failed_entities: usize,
}

/// Point-in-time capture of the working state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub entity_states: HashMap<String, EntityState>,
    pub metrics: SnapshotMetrics,
    /// Events applied at this step
    #[serde(default)]
    pub active_events: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// An applied event as recorded in the run log. Derived entries come from
/// propagation rather than the scenario itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub step: u64,
    pub target_uri: String,
    pub kind: EventKind,
    pub derived: bool,
    /// Signed utilization impact actually applied
    pub magnitude: f64,
}

/// Final metrics of a run. `sanitize` must be called before the run is
/// serialized: the JSON envelope cannot represent NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub total_steps: u64,
    pub events_processed: u64,
    pub entities_affected: usize,
    pub average_utilization: f64,
    pub peak_utilization: f64,
    /// `1 - fraction of entities ending degraded or failed`
    pub system_stability: f64,
    pub impact_summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SimulationMetrics {
    /// Replace NaN values with safe defaults: stability 1.0, others 0.0.
    pub fn sanitize(&mut self) {
        if self.system_stability.is_nan() {
            self.system_stability = 1.0;
        }
        if self.average_utilization.is_nan() {
            self.average_utilization = 0.0;
        }
        if self.peak_utilization.is_nan() {
            self.peak_utilization = 0.0;
        }
    }

    /// True when every float field is representable in JSON.
    pub fn is_finite(&self) -> bool {
        !self.average_utilization.is_nan()
            && !self.peak_utilization.is_nan()
            && !self.system_stability.is_nan()
    }
}

/// Time-stepped execution of a scenario against a twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: String,
    pub scenario_id: String,
    pub twin_id: String,
    pub status: RunStatus,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Whether the evolve step used a trained twin-state model
    pub ml_enhanced: bool,
    pub initial_state: HashMap<String, EntityState>,
    pub final_state: HashMap<String, EntityState>,
    #[serde(default)]
    pub snapshots: Vec<SimulationSnapshot>,
    #[serde(default)]
    pub events_log: Vec<LoggedEvent>,
    pub metrics: SimulationMetrics,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Impact Analysis
// ============================================================================

/// Per-entity delta between initial and final state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityImpact {
    pub uri: String,
    pub initial_status: EntityStatus,
    pub final_status: EntityStatus,
    pub utilization_delta: f64,
    /// True when the entity was touched by any event or status change
    pub affected: bool,
}

/// Post-hoc analysis of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub run_id: String,
    pub entity_impacts: Vec<EntityImpact>,
    /// URIs ordered by descending absolute utilization delta
    pub most_affected: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_nan() {
        let mut metrics = SimulationMetrics {
            system_stability: f64::NAN,
            average_utilization: f64::NAN,
            peak_utilization: 0.7,
            ..Default::default()
        };
        assert!(!metrics.is_finite());
        metrics.sanitize();
        assert!(metrics.is_finite());
        assert_eq!(metrics.system_stability, 1.0);
        assert_eq!(metrics.average_utilization, 0.0);
        assert_eq!(metrics.peak_utilization, 0.7);
    }

    #[test]
    fn test_event_kind_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&EventKind::EntityUnavailable).unwrap(),
            "\"entity_unavailable\""
        );
        assert_eq!(EventKind::DemandSurge.to_string(), "demand_surge");
    }

    #[test]
    fn test_scenario_event_deserialization() {
        let event: SimulationEvent = serde_json::from_value(serde_json::json!({
            "step": 2,
            "target_uri": "urn:a",
            "kind": "entity_unavailable",
            "propagation": {"factor": 0.7, "delay_steps": 1}
        }))
        .unwrap();
        assert_eq!(event.step, 2);
        let prop = event.propagation.unwrap();
        assert_eq!(prop.factor, 0.7);
        assert_eq!(prop.delay_steps, 1);
    }
}
