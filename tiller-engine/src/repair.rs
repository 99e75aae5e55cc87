//! Coherence repairer
//!
//! Bounded iterative repair: group issues by kind, fix in a fixed
//! order, re-validate, and iterate at most `max_repair_iterations`
//! times. Blocking issues that survive the cap raise
//! `CoherenceError::RepairExhausted`, which the session escalates to
//! Replacement exactly once - never an unbounded loop.

use crate::validate::{adjacency_map, reaches, validate};
use tiller_core::{
    CoherenceError, CoherenceIssueKind, CoherenceReport, Dependency, EngineConfig, Plan, Task,
};
use tracing::{debug, warn};

/// Result of a successful repair run.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub plan: Plan,
    pub report: CoherenceReport,
    /// Repair passes performed; 0 means the input was already coherent.
    pub iterations: u32,
}

/// Bounded repairer over candidate plans.
#[derive(Debug, Clone)]
pub struct CoherenceRepairer {
    max_iterations: u32,
}

impl CoherenceRepairer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.max_repair_iterations,
        }
    }

    /// Validate and repair until coherent or the iteration cap is hit.
    ///
    /// An already-coherent plan is returned unchanged with zero
    /// iterations, so repair is idempotent on coherent input.
    pub fn repair_until_coherent(&self, plan: &Plan) -> Result<RepairOutcome, CoherenceError> {
        let mut current = plan.clone();
        let mut report = validate(&current);
        if report.is_coherent() {
            return Ok(RepairOutcome {
                plan: current,
                report,
                iterations: 0,
            });
        }

        for iteration in 1..=self.max_iterations {
            current = repair_pass(&current, &report);
            report = validate(&current);
            debug!(
                iteration,
                blocking = report.blocking_count(),
                "repair pass re-validated"
            );
            if report.is_coherent() {
                return Ok(RepairOutcome {
                    plan: current,
                    report,
                    iterations: iteration,
                });
            }
        }

        warn!(
            iterations = self.max_iterations,
            remaining = report.blocking_count(),
            "repair exhausted; escalation required"
        );
        Err(CoherenceError::RepairExhausted {
            iterations: self.max_iterations,
            remaining: report.blocking_count(),
        })
    }
}

/// Apply one fix per reported issue, in fixed repair order.
fn repair_pass(plan: &Plan, report: &CoherenceReport) -> Plan {
    let mut next = plan.clone();
    let mut ordered: Vec<_> = report.issues.iter().collect();
    ordered.sort_by_key(|issue| issue.kind.repair_rank());

    for issue in ordered {
        match &issue.kind {
            CoherenceIssueKind::CircularDependency { cycle } => {
                // Remove the edge closing the cycle.
                let (Some(&first), Some(&last)) = (cycle.first(), cycle.last()) else {
                    continue;
                };
                next.dependencies.remove(&Dependency::new(last, first));
                if let Some(task) = next.tasks.get_mut(&first) {
                    task.depends_on.retain(|id| *id != last);
                }
            }
            CoherenceIssueKind::ConstraintConflict { second, .. } => {
                // The earlier constraint stands; the newcomer is dropped.
                next.constraints.retain(|c| c.constraint_id != *second);
            }
            CoherenceIssueKind::ResourceOveralloc {
                resource,
                assigned,
                capacity,
            } => {
                let mut remaining = *assigned;
                let ids: Vec<_> = next.tasks.keys().rev().copied().collect();
                for id in ids {
                    if remaining <= *capacity {
                        break;
                    }
                    let Some(task) = next.tasks.get_mut(&id) else {
                        continue;
                    };
                    if task.status == tiller_core::TaskStatus::Completed {
                        continue;
                    }
                    if task.resource() == Some(resource.as_str()) {
                        remaining -= task.resource_units();
                        task.parameters.remove("resource");
                        task.parameters.remove("resource_units");
                    }
                }
            }
            CoherenceIssueKind::GoalMisalignment { task_id } => {
                let adjacency = adjacency_map(&next);
                let Some(target) = next
                    .goal_tasks()
                    .into_iter()
                    .find(|goal_task| {
                        *goal_task != *task_id && !reaches(&adjacency, *goal_task, *task_id)
                    })
                else {
                    // Linking would close a cycle; leave it for the
                    // next pass or escalation.
                    continue;
                };
                next.dependencies.insert(Dependency::new(*task_id, target));
                if let Some(task) = next.tasks.get_mut(&target) {
                    if !task.depends_on.contains(task_id) {
                        task.depends_on.push(*task_id);
                    }
                }
            }
            CoherenceIssueKind::ImpossibleGoal { goal_id } => {
                let Some(goal) = next.goals.iter().find(|g| g.goal_id == *goal_id).cloned()
                else {
                    continue;
                };
                let delivery = Task::new(format!("Deliver: {}", goal.description));
                let delivery_id = delivery.task_id;
                next.tasks.insert(delivery_id, delivery);
                if let Some(goal) = next.goals.iter_mut().find(|g| g.goal_id == *goal_id) {
                    goal.satisfied_by = vec![delivery_id];
                }
            }
            CoherenceIssueKind::MissingDependency { task_id, missing } => {
                if next.tasks.contains_key(missing) {
                    next.dependencies.insert(Dependency::new(*missing, *task_id));
                } else if let Some(task) = next.tasks.get_mut(task_id) {
                    // Declared dependency on a task that no longer
                    // exists: drop the declaration.
                    task.depends_on.retain(|id| id != missing);
                }
            }
            CoherenceIssueKind::UnnecessaryDependency { from, to } => {
                next.dependencies.remove(&Dependency::new(*from, *to));
                if let Some(task) = next.tasks.get_mut(to) {
                    task.depends_on.retain(|id| id != from);
                }
            }
        }
    }

    next
}

// ============================================================================
// TESTS
// ============================================================================
