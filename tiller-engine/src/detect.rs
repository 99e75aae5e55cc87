//! Trigger detectors
//!
//! Each detector is a pure read over (plan snapshot, observation
//! batch). Detectors share no mutable state and can run concurrently
//! against the same immutable snapshot. Malformed observations never
//! reach them - the session drops those at the parse boundary.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::RwLock;
use tiller_core::{
    AdaptationTrigger, ChangeKind, ComplexityClass, DetectorKind, EngineConfig, EnvCategory,
    EnvironmentState, ObservationBatch, ObservationPayload, Plan, Severity, TaskStatus,
    TriggerKind,
};
use tracing::debug;

/// A trigger detector: pure function over one immutable snapshot.
pub trait TriggerDetector {
    fn kind(&self) -> DetectorKind;

    fn detect(&self, plan: &Plan, batch: &ObservationBatch) -> Vec<AdaptationTrigger>;
}

// ============================================================================
// CONTRADICTION DETECTOR
// ============================================================================

/// Detects assumption violations, requirement conflicts, and constraint
/// violations from asserted observation content.
#[derive(Debug, Default)]
pub struct ContradictionDetector;

/// Whether two claims about the same subject conflict.
///
/// Restatements (one claim containing the other) are not conflicts;
/// anything else that differs is, on the grounds that observations
/// carry ground truth the assumption no longer matches.
fn claims_conflict(claim: &str, statement: &str) -> bool {
    let a = normalize(claim);
    let b = normalize(statement);
    if a == b || a.contains(&b) || b.contains(&a) {
        return false;
    }
    true
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl TriggerDetector for ContradictionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Contradiction
    }

    fn detect(&self, plan: &Plan, batch: &ObservationBatch) -> Vec<AdaptationTrigger> {
        let mut triggers = Vec::new();

        for observation in &batch.observations {
            let ObservationPayload::UserMessage {
                asserted_facts,
                requirements,
                discovered_constraints,
                ..
            } = &observation.payload
            else {
                continue;
            };

            // Asserted facts vs. plan assumptions.
            for fact in asserted_facts {
                for assumption in &plan.assumptions {
                    if assumption.invalidated {
                        continue;
                    }
                    if assumption.subject.eq_ignore_ascii_case(&fact.subject)
                        && claims_conflict(&fact.claim, &assumption.statement)
                    {
                        triggers.push(AdaptationTrigger::new(
                            TriggerKind::AssumptionViolation {
                                assumption_id: assumption.assumption_id,
                                contradicted_by: fact.claim.clone(),
                            },
                            Severity::Error,
                            self.kind(),
                        ));
                    }
                }
            }

            // Requirement set difference: implied by observations but
            // not covered by the plan.
            let implied: BTreeSet<&String> = requirements.iter().collect();
            for requirement in implied {
                if !plan.covers_requirement(requirement) {
                    triggers.push(AdaptationTrigger::new(
                        TriggerKind::RequirementConflict {
                            requirement: requirement.clone(),
                            evidence: "user_message".to_string(),
                        },
                        Severity::Error,
                        self.kind(),
                    ));
                }
            }

            // Discovered constraints vs. existing ones.
            for discovered in discovered_constraints {
                for constraint in &plan.constraints {
                    if !constraint.subject.eq_ignore_ascii_case(&discovered.subject) {
                        continue;
                    }
                    let conflicts = match constraint.kind {
                        tiller_core::ConstraintKind::Requires => discovered.forbids,
                        tiller_core::ConstraintKind::Forbids => !discovered.forbids,
                        tiller_core::ConstraintKind::Capacity { .. } => false,
                    };
                    if conflicts {
                        triggers.push(AdaptationTrigger::new(
                            TriggerKind::ConstraintViolation {
                                constraint_id: constraint.constraint_id,
                                discovered: discovered
                                    .detail
                                    .clone()
                                    .unwrap_or_else(|| discovered.subject.clone()),
                            },
                            Severity::Critical,
                            self.kind(),
                        ));
                    }
                }
            }
        }

        debug!(count = triggers.len(), "contradiction detector finished");
        triggers
    }
}

// ============================================================================
// PROGRESS ANOMALY DETECTOR
// ============================================================================

/// Detects velocity, complexity, and blocked-dependency anomalies.
#[derive(Debug)]
pub struct ProgressAnomalyDetector {
    config: EngineConfig,
}

impl ProgressAnomalyDetector {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Expected complexity class for a task, from its parameters.
    fn expected_complexity(plan: &Plan, task_id: tiller_core::TaskId) -> ComplexityClass {
        plan.task(task_id)
            .and_then(|t| t.parameters.get("complexity"))
            .and_then(|v| v.as_str())
            .and_then(|s| ComplexityClass::from_db_str(s).ok())
            .unwrap_or(ComplexityClass::Moderate)
    }
}

impl TriggerDetector for ProgressAnomalyDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ProgressAnomaly
    }

    fn detect(&self, plan: &Plan, batch: &ObservationBatch) -> Vec<AdaptationTrigger> {
        let mut triggers = Vec::new();
        let threshold = self.config.velocity_deviation_threshold;

        for observation in &batch.observations {
            let ObservationPayload::ProgressReport {
                expected_rate,
                actual_rate,
                task_id,
                observed_complexity,
            } = &observation.payload
            else {
                continue;
            };

            if *expected_rate > 0.0 {
                let deviation = (expected_rate - actual_rate).abs() / expected_rate;
                if deviation > threshold {
                    let severity = if deviation > 2.0 * threshold {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    triggers.push(AdaptationTrigger::new(
                        TriggerKind::VelocityAnomaly {
                            expected_rate: *expected_rate,
                            actual_rate: *actual_rate,
                            deviation,
                        },
                        severity,
                        self.kind(),
                    ));
                }
            }

            if let (Some(task_id), Some(observed)) = (task_id, observed_complexity) {
                let expected = Self::expected_complexity(plan, *task_id);
                if expected != *observed {
                    triggers.push(AdaptationTrigger::new(
                        TriggerKind::ComplexityAnomaly {
                            task_id: *task_id,
                            expected: expected.to_string(),
                            observed: observed.to_string(),
                        },
                        Severity::Warning,
                        self.kind(),
                    ));
                }
            }
        }

        // Dependencies blocked past the patience window.
        let now = Utc::now();
        let patience = self.config.blocked_patience.as_secs() as i64;
        for task in plan.tasks.values() {
            for dep_id in &task.depends_on {
                let Some(dep) = plan.task(*dep_id) else {
                    continue;
                };
                if dep.status != TaskStatus::Blocked {
                    continue;
                }
                let Some(since) = plan.blocked_since.get(dep_id) else {
                    continue;
                };
                let blocked_for = (now - *since).num_seconds();
                if blocked_for > patience {
                    triggers.push(AdaptationTrigger::new(
                        TriggerKind::DependencyAnomaly {
                            task_id: task.task_id,
                            blocked_dependency: *dep_id,
                            blocked_for_secs: blocked_for,
                        },
                        Severity::Error,
                        self.kind(),
                    ));
                }
            }
        }

        debug!(count = triggers.len(), "progress anomaly detector finished");
        triggers
    }
}

// ============================================================================
// ENVIRONMENTAL CHANGE DETECTOR
// ============================================================================

/// Diffs the batch's reported external state against the last known
/// baseline. The baseline advances only when the session says so, after
/// a completed cycle - `detect` itself never writes it.
#[derive(Debug, Default)]
pub struct EnvironmentalChangeDetector {
    baseline: RwLock<EnvironmentState>,
}

impl EnvironmentalChangeDetector {
    pub fn new(initial: EnvironmentState) -> Self {
        Self {
            baseline: RwLock::new(initial),
        }
    }

    /// Advance the baseline to a newly processed snapshot.
    pub fn advance_baseline(&self, state: EnvironmentState) {
        if let Ok(mut guard) = self.baseline.write() {
            *guard = state;
        }
    }

    /// The current baseline (for export and tests).
    pub fn baseline(&self) -> EnvironmentState {
        self.baseline
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl TriggerDetector for EnvironmentalChangeDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::EnvironmentalChange
    }

    fn detect(&self, _plan: &Plan, batch: &ObservationBatch) -> Vec<AdaptationTrigger> {
        let Some(reported) = &batch.environment else {
            return Vec::new();
        };
        let changes = self.baseline().diff(reported);
        if changes.is_empty() {
            return Vec::new();
        }

        // Lost dependencies or services degrade the plan's footing;
        // everything else is drift worth recording.
        let severe = changes.iter().any(|c| {
            matches!(c.kind, ChangeKind::Removed)
                && matches!(c.category, EnvCategory::Dependency | EnvCategory::Service)
                || (c.category == EnvCategory::Service && c.detail.as_deref() == Some("down"))
        });
        let severity = if severe { Severity::Error } else { Severity::Warning };

        debug!(count = changes.len(), "environmental change detector finished");
        vec![AdaptationTrigger::new(
            TriggerKind::EnvironmentChange { changes },
            severity,
            self.kind(),
        )]
    }
}

// ============================================================================
// TESTS
// ============================================================================
