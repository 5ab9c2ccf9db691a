//! Digital twin model: entities, relationships and per-entity state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operational status of a twin entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Active,
    Degraded,
    Failed,
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityStatus::Active => write!(f, "active"),
            EntityStatus::Degraded => write!(f, "degraded"),
            EntityStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable simulation state of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub status: EntityStatus,
    pub capacity: f64,
    /// Always clamped to [0, 1]
    pub utilization: f64,
    pub available: bool,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            status: EntityStatus::Active,
            capacity: 1.0,
            utilization: 0.5,
            available: true,
            metrics: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl EntityState {
    /// Adjust utilization by `delta`, clamping to [0, 1].
    pub fn shift_utilization(&mut self, delta: f64) {
        self.utilization = (self.utilization + delta).clamp(0.0, 1.0);
        self.last_updated = Utc::now();
    }
}

/// A node in the twin graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinEntity {
    /// Ontology URI, unique within the twin
    pub uri: String,
    pub entity_type: String,
    pub label: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub state: EntityState,
}

/// A directed edge between twin entities. `strength` in [0, 1] attenuates
/// propagated impact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinRelationship {
    pub id: String,
    pub source_uri: String,
    pub target_uri: String,
    pub predicate: String,
    pub strength: f64,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Structured representation of a domain against which simulations run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalTwin {
    pub id: String,
    pub ontology_id: String,
    pub name: String,
    pub model_type: String,
    /// Baseline utilization entities drift toward between events
    #[serde(default)]
    pub base_state: serde_json::Value,
    #[serde(default)]
    pub entities: Vec<TwinEntity>,
    #[serde(default)]
    pub relationships: Vec<TwinRelationship>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DigitalTwin {
    pub fn new(
        ontology_id: impl Into<String>,
        name: impl Into<String>,
        model_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ontology_id: ontology_id.into(),
            name: name.into(),
            model_type: model_type.into(),
            base_state: serde_json::Value::Object(serde_json::Map::new()),
            entities: Vec::new(),
            relationships: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate structural invariants: unique URIs, edges reference known
    /// entities, strengths in range.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.uri.as_str()) {
                return Err(format!("duplicate entity uri '{}'", entity.uri));
            }
            if !(0.0..=1.0).contains(&entity.state.utilization) {
                return Err(format!(
                    "entity '{}' utilization {} outside [0,1]",
                    entity.uri, entity.state.utilization
                ));
            }
        }
        for rel in &self.relationships {
            if !seen.contains(rel.source_uri.as_str()) {
                return Err(format!("relationship '{}' has unknown source '{}'", rel.id, rel.source_uri));
            }
            if !seen.contains(rel.target_uri.as_str()) {
                return Err(format!("relationship '{}' has unknown target '{}'", rel.id, rel.target_uri));
            }
            if !(0.0..=1.0).contains(&rel.strength) {
                return Err(format!("relationship '{}' strength {} outside [0,1]", rel.id, rel.strength));
            }
        }
        Ok(())
    }
}

/// Lightweight trained model used by the ML-enhanced simulation evolve step.
///
/// A damped linear predictor: the next utilization is a weighted blend of the
/// entity's own utilization and the mean utilization of its upstream
/// neighbors, pulled toward `bias`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinStateModel {
    pub id: String,
    pub ontology_id: String,
    pub name: String,
    pub self_weight: f64,
    pub neighbor_weight: f64,
    pub bias: f64,
    pub trained_at: DateTime<Utc>,
}

impl TwinStateModel {
    /// Predict the next utilization from the current one and the mean of
    /// upstream neighbors. Output clamped to [0, 1].
    pub fn predict(&self, own: f64, neighbor_mean: f64) -> f64 {
        (self.self_weight * own + self.neighbor_weight * neighbor_mean + self.bias).clamp(0.0, 1.0)
    }
}
