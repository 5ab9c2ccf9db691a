//! Twin stepping engine

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{build_recommendations, impact_summary};
use crate::llm::LlmClient;
use crate::storage::Store;
use crate::types::{
    DigitalTwin, EntityState, EntityStatus, EventKind, LoggedEvent, Propagation, RunStatus,
    SimulationEvent, SimulationMetrics, SimulationRun, SimulationScenario, SimulationSnapshot,
    SnapshotMetrics, TwinStateModel,
};

/// Propagated magnitudes below this are insignificant; the chain stops.
const MIN_PROPAGATION_MAGNITUDE: f64 = 0.05;
/// Fraction of the gap to baseline closed per evolve tick.
const DAMPING: f64 = 0.15;
/// Utilization above this marks an entity degraded.
const DEGRADED_THRESHOLD: f64 = 0.95;
/// Utilization below this on an unavailable entity marks it failed.
const FAILED_THRESHOLD: f64 = 0.05;
/// A non-active, available entity within this band of baseline recovers.
const RECOVERY_BAND: f64 = 0.1;
/// Baseline when neither the twin's base state nor the entity supplies one.
const DEFAULT_BASELINE: f64 = 0.5;

/// Engine-level limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub max_steps: u64,
    pub snapshot_interval: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            snapshot_interval: 10,
        }
    }
}

/// An event waiting in the queue: a scenario event or a propagated one.
#[derive(Debug, Clone)]
struct QueuedEvent {
    target_uri: String,
    kind: EventKind,
    /// Signed utilization impact for derived events; primary events derive
    /// their effect from kind and params instead
    magnitude: f64,
    derived: bool,
    params: Value,
    propagation: Option<Propagation>,
}

/// Discrete-event stepper over one twin.
pub struct SimulationEngine {
    twin: DigitalTwin,
    options: SimulationOptions,
    model: Option<TwinStateModel>,
    llm: Option<Arc<dyn LlmClient>>,
    /// source uri → (target uri, strength)
    outgoing: HashMap<String, Vec<(String, f64)>>,
    /// target uri → source uris (for neighbor-aware ML prediction)
    incoming: HashMap<String, Vec<String>>,
    /// per-entity drift target
    baselines: HashMap<String, f64>,
}

impl SimulationEngine {
    /// Build an engine with an explicit model choice.
    pub fn new(
        twin: DigitalTwin,
        options: SimulationOptions,
        model: Option<TwinStateModel>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let mut outgoing: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        for rel in &twin.relationships {
            outgoing
                .entry(rel.source_uri.clone())
                .or_default()
                .push((rel.target_uri.clone(), rel.strength.clamp(0.0, 1.0)));
            incoming
                .entry(rel.target_uri.clone())
                .or_default()
                .push(rel.source_uri.clone());
        }

        let global_baseline = twin
            .base_state
            .get("baseline_utilization")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_BASELINE);
        let baselines = twin
            .entities
            .iter()
            .map(|e| {
                let per_entity = twin
                    .base_state
                    .get("entities")
                    .and_then(|m| m.get(&e.uri))
                    .and_then(Value::as_f64);
                (e.uri.clone(), per_entity.unwrap_or(global_baseline).clamp(0.0, 1.0))
            })
            .collect();

        Self {
            twin,
            options,
            model,
            llm,
            outgoing,
            incoming,
            baselines,
        }
    }

    /// Build an engine, selecting ML mode automatically: if a trained
    /// twin-state model exists for the twin's ontology it drives the evolve
    /// step, otherwise the damping heuristic does.
    pub fn with_store_selection(
        store: &Store,
        twin: DigitalTwin,
        options: SimulationOptions,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let model = match store.model_for_ontology(&twin.ontology_id) {
            Ok(model) => model,
            Err(e) => {
                warn!(ontology = %twin.ontology_id, error = %e, "Model lookup failed — using heuristic evolve");
                None
            }
        };
        Self::new(twin, options, model, llm)
    }

    /// Whether the evolve step uses the trained model.
    pub fn ml_enhanced(&self) -> bool {
        self.model.is_some()
    }

    /// Run a scenario to completion (or cancellation), returning the full
    /// run with snapshots, event log and NaN-free metrics.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        scenario: &SimulationScenario,
    ) -> SimulationRun {
        let mut states: HashMap<String, EntityState> = self
            .twin
            .entities
            .iter()
            .map(|e| (e.uri.clone(), e.state.clone()))
            .collect();
        let initial_state = states.clone();

        let mut queue: BTreeMap<u64, Vec<QueuedEvent>> = BTreeMap::new();
        for event in &scenario.events {
            for queued in self.expand_scenario_event(event, &states) {
                queue.entry(event.step.max(1)).or_default().push(queued);
            }
        }

        let duration = scenario.duration_steps.min(self.options.max_steps);
        let snapshot_interval = self.options.snapshot_interval.max(1);

        info!(
            twin = %self.twin.name,
            scenario = %scenario.name,
            duration,
            ml_enhanced = self.ml_enhanced(),
            "Simulation started"
        );

        let mut run = SimulationRun {
            id: uuid::Uuid::new_v4().to_string(),
            scenario_id: scenario.id.clone(),
            twin_id: self.twin.id.clone(),
            status: RunStatus::Running,
            start: Utc::now(),
            end: None,
            ml_enhanced: self.ml_enhanced(),
            initial_state,
            final_state: HashMap::new(),
            snapshots: Vec::new(),
            events_log: Vec::new(),
            metrics: SimulationMetrics::default(),
            error: None,
        };

        let mut affected: HashSet<String> = HashSet::new();
        let mut step_mean_sum = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut steps_run = 0_u64;
        let mut events_processed = 0_u64;
        let mut cancelled = false;

        for step in 1..=duration {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            steps_run = step;

            let due = queue.remove(&step).unwrap_or_default();
            let mut applied_labels = Vec::with_capacity(due.len());
            for queued in due {
                let Some(impact) = self.apply_event(&mut states, &queued) else {
                    continue;
                };
                events_processed += 1;
                affected.insert(queued.target_uri.clone());
                applied_labels.push(format!("{}@{}", queued.kind, queued.target_uri));
                run.events_log.push(LoggedEvent {
                    step,
                    target_uri: queued.target_uri.clone(),
                    kind: queued.kind,
                    derived: queued.derived,
                    magnitude: impact,
                });

                if let Some(propagation) = queued.propagation {
                    self.enqueue_propagation(&mut queue, step, &queued, impact, propagation);
                }
            }

            // peak is read where events pushed it, before damping
            peak = states
                .values()
                .map(|s| s.utilization)
                .fold(peak, f64::max);

            self.evolve(&mut states, &mut affected);

            let step_mean = mean_utilization(&states);
            step_mean_sum += step_mean;
            peak = states
                .values()
                .map(|s| s.utilization)
                .fold(peak, f64::max);

            if step % snapshot_interval == 0 {
                run.snapshots
                    .push(self.snapshot(step, &states, applied_labels, !queue.is_empty()));
            }

            let any_active = states.values().any(|s| s.status == EntityStatus::Active);
            if !any_active && queue.is_empty() {
                debug!(step, "Dead state — no active entities and no pending events");
                break;
            }
        }

        run.status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        run.final_state = states;
        run.end = Some(Utc::now());

        run.metrics = self
            .finalize_metrics(
                &run,
                steps_run,
                events_processed,
                affected.len(),
                step_mean_sum,
                peak,
            )
            .await;
        run.metrics.sanitize();

        info!(
            run = %run.id,
            status = ?run.status,
            steps = steps_run,
            events = events_processed,
            stability = run.metrics.system_stability,
            "Simulation finished"
        );
        run
    }

    /// Turn a scenario event into queued form. Events without a target
    /// apply to every entity (an external shift across the twin); those
    /// carry no propagation of their own.
    fn expand_scenario_event(
        &self,
        event: &SimulationEvent,
        states: &HashMap<String, EntityState>,
    ) -> Vec<QueuedEvent> {
        match &event.target_uri {
            Some(target) => {
                if !states.contains_key(target) {
                    warn!(target = %target, "Scenario event targets unknown entity — skipping");
                    return Vec::new();
                }
                vec![QueuedEvent {
                    target_uri: target.clone(),
                    kind: event.kind,
                    magnitude: 0.0,
                    derived: false,
                    params: event.params.clone(),
                    propagation: event.propagation,
                }]
            }
            None => states
                .keys()
                .map(|uri| QueuedEvent {
                    target_uri: uri.clone(),
                    kind: event.kind,
                    magnitude: 0.0,
                    derived: false,
                    params: event.params.clone(),
                    propagation: None,
                })
                .collect(),
        }
    }

    /// Apply one event to its target. Returns the signed utilization-scale
    /// impact actually applied (the propagation seed), or `None` if the
    /// target vanished.
    fn apply_event(
        &self,
        states: &mut HashMap<String, EntityState>,
        queued: &QueuedEvent,
    ) -> Option<f64> {
        let baseline = self.baseline_of(&queued.target_uri);
        let state = states.get_mut(&queued.target_uri)?;

        if queued.derived {
            // propagated events arrive as a pre-attenuated utilization shift
            if queued.kind == EventKind::QualityDegradation {
                let quality = state.metrics.get("quality").copied().unwrap_or(1.0);
                state
                    .metrics
                    .insert("quality".to_string(), (quality + queued.magnitude).clamp(0.0, 1.0));
            } else {
                state.shift_utilization(queued.magnitude);
            }
            return Some(queued.magnitude);
        }

        let magnitude_param = queued
            .params
            .get("magnitude")
            .and_then(Value::as_f64);

        let impact = match queued.kind {
            EventKind::EntityUnavailable => {
                state.available = false;
                state.status = EntityStatus::Failed;
                state.utilization = 0.0;
                state.last_updated = Utc::now();
                -magnitude_param.unwrap_or(1.0).abs()
            }
            EventKind::EntityRestored => {
                state.available = true;
                state.status = EntityStatus::Active;
                state.utilization = baseline;
                state.last_updated = Utc::now();
                magnitude_param.unwrap_or(0.5).abs()
            }
            EventKind::CapacityChange => {
                let old = state.capacity.max(f64::EPSILON);
                let new = queued
                    .params
                    .get("capacity")
                    .and_then(Value::as_f64)
                    .unwrap_or(state.capacity);
                state.capacity = new.max(0.0);
                if state.capacity > f64::EPSILON {
                    // same load on a different capacity
                    state.utilization = (state.utilization * old / state.capacity).clamp(0.0, 1.0);
                }
                let delta_ratio = (new - old) / old;
                // capacity loss starves downstream, gain relieves it
                -delta_ratio.clamp(-1.0, 1.0)
            }
            EventKind::DemandSurge => {
                let m = magnitude_param.unwrap_or(0.3).abs();
                state.shift_utilization(m);
                m
            }
            EventKind::QualityDegradation => {
                let m = magnitude_param.unwrap_or(0.2).abs();
                let quality = state.metrics.get("quality").copied().unwrap_or(1.0);
                state
                    .metrics
                    .insert("quality".to_string(), (quality - m).clamp(0.0, 1.0));
                -m
            }
            EventKind::OptimizationApplied => {
                let m = magnitude_param.unwrap_or(0.2).abs();
                state.shift_utilization(-m);
                -m
            }
            EventKind::ExternalShift => {
                let m = magnitude_param.unwrap_or(0.1);
                state.shift_utilization(m);
                m
            }
        };
        Some(impact)
    }

    /// Schedule derived events along outgoing relationships, attenuated by
    /// `strength × factor`, no earlier than the next step. Magnitudes below
    /// the significance threshold stop the chain.
    fn enqueue_propagation(
        &self,
        queue: &mut BTreeMap<u64, Vec<QueuedEvent>>,
        step: u64,
        source: &QueuedEvent,
        impact: f64,
        propagation: Propagation,
    ) {
        let factor = propagation.factor.clamp(0.0, 1.0);
        let Some(edges) = self.outgoing.get(&source.target_uri) else {
            return;
        };
        let fire_at = step + propagation.delay_steps.max(1);
        for (target, strength) in edges {
            let magnitude = impact * strength * factor;
            if magnitude.abs() < MIN_PROPAGATION_MAGNITUDE {
                continue;
            }
            debug!(
                from = %source.target_uri,
                to = %target,
                magnitude,
                fire_at,
                "Propagating event"
            );
            queue.entry(fire_at).or_default().push(QueuedEvent {
                target_uri: target.clone(),
                kind: source.kind,
                magnitude,
                derived: true,
                params: Value::Null,
                propagation: Some(propagation),
            });
        }
    }

    /// One evolve tick: drift toward baseline (or the model's prediction)
    /// and apply status transitions.
    fn evolve(&self, states: &mut HashMap<String, EntityState>, affected: &mut HashSet<String>) {
        let utilizations: HashMap<String, f64> = states
            .iter()
            .map(|(uri, s)| (uri.clone(), s.utilization))
            .collect();

        for (uri, state) in states.iter_mut() {
            let baseline = self.baselines.get(uri).copied().unwrap_or(DEFAULT_BASELINE);

            // transitions react to where events pushed the entity, before
            // damping pulls it back toward baseline
            let previous = state.status;
            if state.utilization > DEGRADED_THRESHOLD {
                state.status = EntityStatus::Degraded;
            } else if state.utilization < FAILED_THRESHOLD && !state.available {
                state.status = EntityStatus::Failed;
            } else if state.available
                && state.status != EntityStatus::Active
                && (state.utilization - baseline).abs() <= RECOVERY_BAND
            {
                state.status = EntityStatus::Active;
            }
            if state.status != previous {
                affected.insert(uri.clone());
            }

            if state.available {
                state.utilization = match &self.model {
                    Some(model) => {
                        let neighbor_mean = self
                            .incoming
                            .get(uri)
                            .map(|sources| {
                                let values: Vec<f64> = sources
                                    .iter()
                                    .filter_map(|s| utilizations.get(s).copied())
                                    .collect();
                                if values.is_empty() {
                                    baseline
                                } else {
                                    values.iter().sum::<f64>() / values.len() as f64
                                }
                            })
                            .unwrap_or(baseline);
                        model.predict(state.utilization, neighbor_mean)
                    }
                    None => {
                        (state.utilization + (baseline - state.utilization) * DAMPING)
                            .clamp(0.0, 1.0)
                    }
                };
            }
        }
    }

    fn snapshot(
        &self,
        step: u64,
        states: &HashMap<String, EntityState>,
        active_events: Vec<String>,
        propagation_pending: bool,
    ) -> SimulationSnapshot {
        let mut flags = Vec::new();
        if self.ml_enhanced() {
            flags.push("ml_enhanced".to_string());
        }
        if propagation_pending {
            flags.push("propagation_pending".to_string());
        }
        SimulationSnapshot {
            step,
            timestamp: Utc::now(),
            entity_states: states.clone(),
            metrics: SnapshotMetrics {
                average_utilization: mean_utilization(states),
                active_entities: count_status(states, EntityStatus::Active),
                degraded_entities: count_status(states, EntityStatus::Degraded),
                failed_entities: count_status(states, EntityStatus::Failed),
            },
            active_events,
            flags,
        }
    }

    async fn finalize_metrics(
        &self,
        run: &SimulationRun,
        steps_run: u64,
        events_processed: u64,
        entities_affected: usize,
        step_mean_sum: f64,
        peak: f64,
    ) -> SimulationMetrics {
        let entity_count = run.final_state.len();
        let unhealthy = run
            .final_state
            .values()
            .filter(|s| s.status != EntityStatus::Active)
            .count();
        let system_stability = if entity_count == 0 {
            1.0
        } else {
            1.0 - unhealthy as f64 / entity_count as f64
        };
        let average_utilization = if steps_run == 0 {
            mean_utilization(&run.final_state)
        } else {
            step_mean_sum / steps_run as f64
        };

        let recommendations =
            build_recommendations(&run.final_state, &self.outgoing);
        let impact_summary = impact_summary(
            self.llm.as_deref(),
            &self.twin.name,
            run,
            entities_affected,
            system_stability,
        )
        .await;

        SimulationMetrics {
            total_steps: steps_run,
            events_processed,
            entities_affected,
            average_utilization,
            peak_utilization: peak,
            system_stability,
            impact_summary,
            recommendations,
        }
    }

    fn baseline_of(&self, uri: &str) -> f64 {
        self.baselines.get(uri).copied().unwrap_or(DEFAULT_BASELINE)
    }
}

fn mean_utilization(states: &HashMap<String, EntityState>) -> f64 {
    if states.is_empty() {
        return 0.0;
    }
    states.values().map(|s| s.utilization).sum::<f64>() / states.len() as f64
}

fn count_status(states: &HashMap<String, EntityState>, status: EntityStatus) -> usize {
    states.values().filter(|s| s.status == status).count()
}
