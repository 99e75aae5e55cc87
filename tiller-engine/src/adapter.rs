//! Context adapter - maps observations and plan changes to layer updates
//!
//! Glue between the adaptation pipeline and the context store: the same
//! observation batch that drove trigger detection is folded into the
//! layered store, along with the accepted plan diff.

use tiller_core::{
    ContextLayer, ContextUpdate, ContextUpdateKind, Observation, ObservationPayload, PlanChange,
    short_hash,
};

/// Layer updates implied by one observation.
pub fn updates_for_observation(observation: &Observation) -> Vec<(ContextLayer, ContextUpdate)> {
    let at = observation.observed_at;
    match &observation.payload {
        ObservationPayload::FileAdded { path, content_hash } => vec![(
            ContextLayer::Technical,
            ContextUpdate::new(
                format!("file:{}", path),
                serde_json::json!({"change": "added", "hash": short_hash(content_hash)}),
                ContextUpdateKind::FileTouched,
            )
            .with_recorded_at(at),
        )],
        ObservationPayload::FileModified { path, content_hash } => vec![(
            ContextLayer::Technical,
            ContextUpdate::new(
                format!("file:{}", path),
                serde_json::json!({"change": "modified", "hash": short_hash(content_hash)}),
                ContextUpdateKind::FileTouched,
            )
            .with_recorded_at(at),
        )],
        ObservationPayload::FileDeleted { path } => vec![(
            ContextLayer::Technical,
            ContextUpdate::new(
                format!("file:{}", path),
                serde_json::json!({"change": "deleted"}),
                ContextUpdateKind::FileTouched,
            )
            .with_recorded_at(at),
        )],
        ObservationPayload::DependencyChanged {
            name,
            version,
            removed,
        } => {
            let value = if *removed {
                serde_json::json!("removed")
            } else {
                serde_json::json!(version.clone().unwrap_or_else(|| "unknown".to_string()))
            };
            vec![(
                ContextLayer::Technical,
                ContextUpdate::new(
                    format!("dep:{}", name),
                    value,
                    ContextUpdateKind::DependencyObserved,
                )
                .with_recorded_at(at),
            )]
        }
        ObservationPayload::ConfigChanged { key, value } => vec![(
            ContextLayer::Technical,
            ContextUpdate::new(
                format!("config:{}", key),
                serde_json::json!(value.clone().unwrap_or_else(|| "unset".to_string())),
                ContextUpdateKind::ConfigChanged,
            )
            .with_recorded_at(at),
        )],
        ObservationPayload::ServiceChanged { name, available } => vec![(
            ContextLayer::Technical,
            ContextUpdate::new(
                format!("service:{}", name),
                serde_json::json!({"available": available}),
                ContextUpdateKind::ServiceObserved,
            )
            .with_recorded_at(at),
        )],
        ObservationPayload::UserMessage {
            content,
            asserted_facts,
            requirements,
            ..
        } => {
            let mut updates = vec![(
                ContextLayer::Conversational,
                ContextUpdate::new(
                    "message:latest",
                    serde_json::json!(content),
                    ContextUpdateKind::Clarification,
                )
                .with_recorded_at(at),
            )];
            for fact in asserted_facts {
                updates.push((
                    ContextLayer::Conversational,
                    ContextUpdate::new(
                        format!("fact:{}", fact.subject),
                        serde_json::json!(fact.claim),
                        ContextUpdateKind::FactAsserted,
                    )
                    .with_recorded_at(at),
                ));
            }
            for requirement in requirements {
                updates.push((
                    ContextLayer::Conversational,
                    ContextUpdate::new(
                        format!("requirement:{}", requirement),
                        serde_json::json!(requirement),
                        ContextUpdateKind::FactAsserted,
                    )
                    .with_recorded_at(at),
                ));
            }
            updates
        }
        ObservationPayload::ProgressReport {
            expected_rate,
            actual_rate,
            task_id,
            ..
        } => vec![(
            ContextLayer::Execution,
            ContextUpdate::new(
                "progress:latest",
                serde_json::json!({
                    "expected_rate": expected_rate,
                    "actual_rate": actual_rate,
                    "task_id": task_id.map(|id| id.to_string()),
                }),
                ContextUpdateKind::TaskProgress,
            )
            .with_recorded_at(at),
        )],
    }
}

/// Project-layer update recording an accepted plan change.
pub fn update_for_plan_change(change: &PlanChange) -> (ContextLayer, ContextUpdate) {
    (
        ContextLayer::Project,
        ContextUpdate::new(
            "plan:current",
            serde_json::json!({
                "from_version": change.from_version,
                "to_version": change.to_version,
                "strategy": change.strategy.to_string(),
                "triggers": change.trigger_labels,
            }),
            ContextUpdateKind::Decision,
        )
        .with_recorded_at(change.occurred_at),
    )
}

// ============================================================================
// TESTS
// ============================================================================
