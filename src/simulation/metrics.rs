//! Run metrics: recommendations, impact narrative and post-hoc analysis

use std::collections::HashMap;

use tracing::warn;

use crate::llm::{CompletionRequest, LlmClient};
use crate::types::{
    EntityImpact, EntityState, EntityStatus, ImpactAnalysis, SimulationRun,
};

/// Ordered recommendations driven by which entities ended degraded or
/// failed, ranked by their out-degree in the relationship graph — a failure
/// with many dependents outranks a leaf.
pub(crate) fn build_recommendations(
    final_state: &HashMap<String, EntityState>,
    outgoing: &HashMap<String, Vec<(String, f64)>>,
) -> Vec<String> {
    let mut troubled: Vec<(&String, &EntityState, usize)> = final_state
        .iter()
        .filter(|(_, s)| s.status != EntityStatus::Active)
        .map(|(uri, s)| (uri, s, outgoing.get(uri).map_or(0, Vec::len)))
        .collect();
    troubled.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));

    let mut recommendations = Vec::with_capacity(troubled.len() + 1);
    for (uri, state, dependents) in troubled {
        let rec = match state.status {
            EntityStatus::Failed if dependents > 0 => format!(
                "Restore '{uri}' first: it is down and {dependents} downstream entities depend on it"
            ),
            EntityStatus::Failed => format!("Restore '{uri}': it ended the scenario down"),
            EntityStatus::Degraded => format!(
                "Relieve load on '{uri}': utilization {:.0}% at scenario end",
                state.utilization * 100.0
            ),
            EntityStatus::Active => continue,
        };
        recommendations.push(rec);
    }
    if recommendations.is_empty() && !final_state.is_empty() {
        recommendations
            .push("System absorbed the scenario; no remediation required".to_string());
    }
    recommendations
}

/// Short impact narrative. Authored by the LLM client when one is wired in;
/// LLM failure falls back to the rule-based summary rather than failing the
/// run.
pub(crate) async fn impact_summary(
    llm: Option<&dyn LlmClient>,
    twin_name: &str,
    run: &SimulationRun,
    entities_affected: usize,
    system_stability: f64,
) -> String {
    let fallback = rule_based_summary(run, entities_affected, system_stability);
    let Some(client) = llm else {
        return fallback;
    };

    let prompt = format!(
        "Summarize this digital-twin simulation in two sentences.\n\
         Twin: {twin_name}\n\
         Entities: {} ({} affected)\n\
         Events applied: {}\n\
         Final stability: {:.2}\n\
         Degraded: {}, failed: {}",
        run.final_state.len(),
        entities_affected,
        run.events_log.len(),
        system_stability,
        count(&run.final_state, EntityStatus::Degraded),
        count(&run.final_state, EntityStatus::Failed),
    );
    match client.complete(CompletionRequest::narrative(prompt)).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => fallback,
        Err(e) => {
            warn!(provider = %client.provider(), error = %e, "LLM summary failed — using rule-based fallback");
            fallback
        }
    }
}

fn rule_based_summary(
    run: &SimulationRun,
    entities_affected: usize,
    system_stability: f64,
) -> String {
    let failed = count(&run.final_state, EntityStatus::Failed);
    let degraded = count(&run.final_state, EntityStatus::Degraded);
    if failed == 0 && degraded == 0 {
        format!(
            "Scenario completed with no lasting impact: {} events touched {} entities and the system returned to stable operation (stability {:.2}).",
            run.events_log.len(),
            entities_affected,
            system_stability
        )
    } else {
        format!(
            "Scenario left {failed} entities failed and {degraded} degraded out of {}; {} events touched {entities_affected} entities (stability {:.2}).",
            run.final_state.len(),
            run.events_log.len(),
            system_stability
        )
    }
}

fn count(states: &HashMap<String, EntityState>, status: EntityStatus) -> usize {
    states.values().filter(|s| s.status == status).count()
}

/// Compare initial and final state of a finished run: per-entity status
/// change and utilization delta, with the most-affected entities first.
pub fn analyze_impact(run: &SimulationRun) -> ImpactAnalysis {
    let mut impacts: Vec<EntityImpact> = run
        .initial_state
        .iter()
        .map(|(uri, initial)| {
            let final_state = run.final_state.get(uri);
            let final_status = final_state.map_or(initial.status, |s| s.status);
            let utilization_delta =
                final_state.map_or(0.0, |s| s.utilization - initial.utilization);
            let touched_by_event = run.events_log.iter().any(|e| &e.target_uri == uri);
            EntityImpact {
                uri: uri.clone(),
                initial_status: initial.status,
                final_status,
                utilization_delta,
                affected: touched_by_event || final_status != initial.status,
            }
        })
        .collect();

    impacts.sort_by(|a, b| {
        b.utilization_delta
            .abs()
            .partial_cmp(&a.utilization_delta.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.uri.cmp(&b.uri))
    });

    let most_affected = impacts
        .iter()
        .filter(|i| i.affected)
        .map(|i| i.uri.clone())
        .collect();

    ImpactAnalysis {
        run_id: run.id.clone(),
        entity_impacts: impacts,
        most_affected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunStatus, SimulationMetrics};
    use chrono::Utc;

    fn state(status: EntityStatus, utilization: f64) -> EntityState {
        EntityState {
            status,
            utilization,
            ..EntityState::default()
        }
    }

    fn run_with(
        initial: &[(&str, EntityStatus, f64)],
        fin: &[(&str, EntityStatus, f64)],
    ) -> SimulationRun {
        SimulationRun {
            id: "run".to_string(),
            scenario_id: "scen".to_string(),
            twin_id: "twin".to_string(),
            status: RunStatus::Completed,
            start: Utc::now(),
            end: Some(Utc::now()),
            ml_enhanced: false,
            initial_state: initial
                .iter()
                .map(|(u, s, v)| (u.to_string(), state(*s, *v)))
                .collect(),
            final_state: fin
                .iter()
                .map(|(u, s, v)| (u.to_string(), state(*s, *v)))
                .collect(),
            snapshots: Vec::new(),
            events_log: Vec::new(),
            metrics: SimulationMetrics::default(),
            error: None,
        }
    }

    #[test]
    fn test_recommendations_rank_by_out_degree() {
        let final_state: HashMap<String, EntityState> = [
            ("hub".to_string(), state(EntityStatus::Failed, 0.0)),
            ("leaf".to_string(), state(EntityStatus::Failed, 0.0)),
            ("ok".to_string(), state(EntityStatus::Active, 0.5)),
        ]
        .into_iter()
        .collect();
        let mut outgoing = HashMap::new();
        outgoing.insert(
            "hub".to_string(),
            vec![("a".to_string(), 0.5), ("b".to_string(), 0.5)],
        );

        let recs = build_recommendations(&final_state, &outgoing);
        assert_eq!(recs.len(), 2);
        assert!(recs[0].contains("hub"));
        assert!(recs[0].contains("2 downstream"));
        assert!(recs[1].contains("leaf"));
    }

    #[test]
    fn test_healthy_system_gets_no_op_recommendation() {
        let final_state: HashMap<String, EntityState> =
            [("a".to_string(), state(EntityStatus::Active, 0.5))]
                .into_iter()
                .collect();
        let recs = build_recommendations(&final_state, &HashMap::new());
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("no remediation"));
    }

    #[test]
    fn test_analyze_impact_ranks_by_delta() {
        let run = run_with(
            &[
                ("a", EntityStatus::Active, 0.5),
                ("b", EntityStatus::Active, 0.5),
            ],
            &[
                ("a", EntityStatus::Failed, 0.0),
                ("b", EntityStatus::Active, 0.45),
            ],
        );
        let analysis = analyze_impact(&run);
        assert_eq!(analysis.entity_impacts.len(), 2);
        assert_eq!(analysis.entity_impacts[0].uri, "a");
        assert!((analysis.entity_impacts[0].utilization_delta + 0.5).abs() < 1e-9);
        // only the status-changed entity counts as affected
        assert_eq!(analysis.most_affected, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_summary_without_llm_is_rule_based() {
        let run = run_with(
            &[("a", EntityStatus::Active, 0.5)],
            &[("a", EntityStatus::Failed, 0.0)],
        );
        let summary = impact_summary(None, "plant", &run, 1, 0.0).await;
        assert!(summary.contains("1 entities failed"));
    }
}
