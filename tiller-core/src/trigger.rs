//! Adaptation trigger types
//!
//! Triggers are transient: produced and consumed within one cycle, and
//! retained only inside that cycle's audit record.

use crate::{
    AssumptionId, ConstraintId, DetectorKind, EnvChange, Severity, StrategyKind, TaskId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Evidence-bearing signal that the current plan may no longer be valid.
///
/// A closed set of kinds dispatched by variant, never by string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerKind {
    /// An observation's asserted fact contradicts a plan assumption.
    AssumptionViolation {
        assumption_id: AssumptionId,
        contradicted_by: String,
    },
    /// A requirement implied by observations has no coverage in the plan.
    RequirementConflict {
        requirement: String,
        evidence: String,
    },
    /// A discovered constraint cannot hold alongside an existing one.
    ConstraintViolation {
        constraint_id: ConstraintId,
        discovered: String,
    },
    /// Observed completion rate deviates from the expected rate.
    VelocityAnomaly {
        expected_rate: f32,
        actual_rate: f32,
        deviation: f32,
    },
    /// Observed task complexity differs from the planned class.
    ComplexityAnomaly {
        task_id: TaskId,
        expected: String,
        observed: String,
    },
    /// A declared dependency has been blocked past the patience window.
    DependencyAnomaly {
        task_id: TaskId,
        blocked_dependency: TaskId,
        blocked_for_secs: i64,
    },
    /// External state drifted from the last known snapshot.
    EnvironmentChange { changes: Vec<EnvChange> },
}

impl TriggerKind {
    /// The mutation strategy this trigger calls for on its own.
    ///
    /// When several triggers fire together the engine takes the
    /// highest-severity trigger and the highest-priority strategy among
    /// the implied ones.
    pub fn implied_strategy(&self) -> StrategyKind {
        match self {
            TriggerKind::VelocityAnomaly { .. } | TriggerKind::ComplexityAnomaly { .. } => {
                StrategyKind::Refinement
            }
            TriggerKind::RequirementConflict { .. }
            | TriggerKind::DependencyAnomaly { .. }
            | TriggerKind::EnvironmentChange { .. } => StrategyKind::Restructuring,
            TriggerKind::AssumptionViolation { .. } | TriggerKind::ConstraintViolation { .. } => {
                StrategyKind::Replacement
            }
        }
    }

    /// Short label for logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            TriggerKind::AssumptionViolation { .. } => "assumption_violation",
            TriggerKind::RequirementConflict { .. } => "requirement_conflict",
            TriggerKind::ConstraintViolation { .. } => "constraint_violation",
            TriggerKind::VelocityAnomaly { .. } => "velocity_anomaly",
            TriggerKind::ComplexityAnomaly { .. } => "complexity_anomaly",
            TriggerKind::DependencyAnomaly { .. } => "dependency_anomaly",
            TriggerKind::EnvironmentChange { .. } => "environment_change",
        }
    }
}

/// A trigger with its severity and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationTrigger {
    pub kind: TriggerKind,
    pub severity: Severity,
    pub source: DetectorKind,
    pub detected_at: Timestamp,
}

impl AdaptationTrigger {
    pub fn new(kind: TriggerKind, severity: Severity, source: DetectorKind) -> Self {
        Self {
            kind,
            severity,
            source,
            detected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;

    #[test]
    fn test_implied_strategy_mapping_is_total() {
        let kinds = vec![
            TriggerKind::AssumptionViolation {
                assumption_id: new_entity_id(),
                contradicted_by: "fact".to_string(),
            },
            TriggerKind::RequirementConflict {
                requirement: "oauth".to_string(),
                evidence: "user message".to_string(),
            },
            TriggerKind::ConstraintViolation {
                constraint_id: new_entity_id(),
                discovered: "forbids postgres".to_string(),
            },
            TriggerKind::VelocityAnomaly {
                expected_rate: 2.0,
                actual_rate: 1.0,
                deviation: 0.5,
            },
            TriggerKind::ComplexityAnomaly {
                task_id: new_entity_id(),
                expected: "Trivial".to_string(),
                observed: "Complex".to_string(),
            },
            TriggerKind::DependencyAnomaly {
                task_id: new_entity_id(),
                blocked_dependency: new_entity_id(),
                blocked_for_secs: 7200,
            },
            TriggerKind::EnvironmentChange { changes: vec![] },
        ];
        // Every kind maps to a strategy without panicking.
        for kind in kinds {
            let _ = kind.implied_strategy();
            assert!(!kind.label().is_empty());
        }
    }

    #[test]
    fn test_velocity_anomaly_implies_refinement() {
        let kind = TriggerKind::VelocityAnomaly {
            expected_rate: 2.0,
            actual_rate: 1.0,
            deviation: 0.5,
        };
        assert_eq!(kind.implied_strategy(), StrategyKind::Refinement);
    }

    #[test]
    fn test_requirement_conflict_implies_restructuring() {
        let kind = TriggerKind::RequirementConflict {
            requirement: "oauth".to_string(),
            evidence: "observation".to_string(),
        };
        assert_eq!(kind.implied_strategy(), StrategyKind::Restructuring);
    }
}
