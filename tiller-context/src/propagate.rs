//! Cross-layer propagation rules
//!
//! A fixed table maps update kinds in one layer to derived updates in
//! other layers. Derived updates never themselves propagate - a single
//! hop keeps the update pass terminating and the table auditable.

use tiller_core::{ContextLayer, ContextUpdate, ContextUpdateKind};

/// One derived update: the target layer and the update to apply there.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedUpdate {
    pub layer: ContextLayer,
    pub update: ContextUpdate,
    /// Layer the originating update was applied to.
    pub source_layer: ContextLayer,
}

/// Compute the derived updates implied by applying `update` to `layer`.
pub fn derived_updates(layer: ContextLayer, update: &ContextUpdate) -> Vec<DerivedUpdate> {
    match (layer, update.kind) {
        // A new dependency in the technical layer suggests a project
        // convention worth tracking.
        (ContextLayer::Technical, ContextUpdateKind::DependencyObserved) => {
            vec![DerivedUpdate {
                layer: ContextLayer::Project,
                update: ContextUpdate::new(
                    format!("convention:{}", update.key),
                    update.value.clone(),
                    ContextUpdateKind::ConventionCandidate,
                )
                .with_recorded_at(update.recorded_at),
                source_layer: layer,
            }]
        }
        // Execution progress rolls up into the project status digest.
        (ContextLayer::Execution, ContextUpdateKind::TaskProgress) => {
            vec![DerivedUpdate {
                layer: ContextLayer::Project,
                update: ContextUpdate::new(
                    "status:latest",
                    update.value.clone(),
                    ContextUpdateKind::StatusDigest,
                )
                .with_recorded_at(update.recorded_at),
                source_layer: layer,
            }]
        }
        // Decisions made in conversation become project knowledge.
        (ContextLayer::Conversational, ContextUpdateKind::Decision) => {
            vec![DerivedUpdate {
                layer: ContextLayer::Project,
                update: ContextUpdate::new(
                    format!("decision:{}", update.key),
                    update.value.clone(),
                    ContextUpdateKind::Decision,
                )
                .with_recorded_at(update.recorded_at),
                source_layer: layer,
            }]
        }
        // Service availability observed technically matters to execution.
        (ContextLayer::Technical, ContextUpdateKind::ServiceObserved) => {
            vec![DerivedUpdate {
                layer: ContextLayer::Execution,
                update: ContextUpdate::new(
                    update.key.clone(),
                    update.value.clone(),
                    ContextUpdateKind::ServiceObserved,
                )
                .with_recorded_at(update.recorded_at),
                source_layer: layer,
            }]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_observed_derives_convention_candidate() {
        let update = ContextUpdate::new(
            "dep:serde",
            serde_json::json!("1.0"),
            ContextUpdateKind::DependencyObserved,
        );
        let derived = derived_updates(ContextLayer::Technical, &update);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].layer, ContextLayer::Project);
        assert_eq!(derived[0].update.kind, ContextUpdateKind::ConventionCandidate);
        assert_eq!(derived[0].update.key, "convention:dep:serde");
        assert_eq!(derived[0].source_layer, ContextLayer::Technical);
    }

    #[test]
    fn test_task_progress_derives_status_digest() {
        let update = ContextUpdate::new(
            "task:abc",
            serde_json::json!({"completed": 3}),
            ContextUpdateKind::TaskProgress,
        );
        let derived = derived_updates(ContextLayer::Execution, &update);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].update.key, "status:latest");
    }

    #[test]
    fn test_unmapped_kinds_derive_nothing() {
        let update = ContextUpdate::new(
            "note",
            serde_json::json!("plain fact"),
            ContextUpdateKind::FactAsserted,
        );
        for layer in ContextLayer::ALL {
            assert!(derived_updates(layer, &update).is_empty());
        }
    }

    #[test]
    fn test_derived_updates_are_single_hop() {
        // A derived kind applied to its target layer must not fan out
        // further, otherwise propagation would not terminate.
        let convention = ContextUpdate::new(
            "convention:dep:serde",
            serde_json::json!("1.0"),
            ContextUpdateKind::ConventionCandidate,
        );
        assert!(derived_updates(ContextLayer::Project, &convention).is_empty());

        let digest = ContextUpdate::new(
            "status:latest",
            serde_json::json!({"completed": 3}),
            ContextUpdateKind::StatusDigest,
        );
        assert!(derived_updates(ContextLayer::Project, &digest).is_empty());
    }
}
