//! Coherence issue and report types

use crate::{ConstraintId, GoalId, Severity, TaskId};
use serde::{Deserialize, Serialize};

/// A specific way a candidate plan fails to cohere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoherenceIssueKind {
    /// The dependency graph contains a cycle through these tasks.
    CircularDependency { cycle: Vec<TaskId> },
    /// Two constraints cannot both hold.
    ConstraintConflict {
        first: ConstraintId,
        second: ConstraintId,
    },
    /// The goal is unreachable given current constraints.
    ImpossibleGoal { goal_id: GoalId },
    /// A task declares a dependency absent from the edge set.
    MissingDependency { task_id: TaskId, missing: TaskId },
    /// Removing this edge would not change reachability to any goal.
    UnnecessaryDependency { from: TaskId, to: TaskId },
    /// Assignments to a resource exceed its declared capacity.
    ResourceOveralloc {
        resource: String,
        assigned: i64,
        capacity: i64,
    },
    /// The task has no path to any goal task.
    GoalMisalignment { task_id: TaskId },
}

impl CoherenceIssueKind {
    /// Whether this kind blocks acceptance. UnnecessaryDependency is
    /// informational only.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, CoherenceIssueKind::UnnecessaryDependency { .. })
    }

    /// Fixed repair order: lower repairs first.
    pub fn repair_rank(&self) -> u8 {
        match self {
            CoherenceIssueKind::CircularDependency { .. } => 0,
            CoherenceIssueKind::ConstraintConflict { .. } => 1,
            CoherenceIssueKind::ResourceOveralloc { .. } => 2,
            CoherenceIssueKind::GoalMisalignment { .. } => 3,
            CoherenceIssueKind::ImpossibleGoal { .. } => 4,
            CoherenceIssueKind::MissingDependency { .. } => 5,
            CoherenceIssueKind::UnnecessaryDependency { .. } => 6,
        }
    }

    /// Short label for logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            CoherenceIssueKind::CircularDependency { .. } => "circular_dependency",
            CoherenceIssueKind::ConstraintConflict { .. } => "constraint_conflict",
            CoherenceIssueKind::ImpossibleGoal { .. } => "impossible_goal",
            CoherenceIssueKind::MissingDependency { .. } => "missing_dependency",
            CoherenceIssueKind::UnnecessaryDependency { .. } => "unnecessary_dependency",
            CoherenceIssueKind::ResourceOveralloc { .. } => "resource_overalloc",
            CoherenceIssueKind::GoalMisalignment { .. } => "goal_misalignment",
        }
    }
}

/// A coherence issue found during candidate validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceIssue {
    pub kind: CoherenceIssueKind,
    pub severity: Severity,
    pub message: String,
}

impl CoherenceIssue {
    pub fn new(kind: CoherenceIssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.kind.is_blocking() && self.severity.is_blocking()
    }
}

/// Result of validating a candidate plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceReport {
    /// `1 - blocking / checks_run`. Diagnostic only; acceptance is
    /// decided by `blocking_count() == 0`.
    pub score: f32,
    pub issues: Vec<CoherenceIssue>,
    pub checks_run: usize,
}

impl CoherenceReport {
    /// Create a clean report.
    pub fn clean(checks_run: usize) -> Self {
        Self {
            score: 1.0,
            issues: Vec::new(),
            checks_run,
        }
    }

    /// Create a report from issues and the number of checks performed.
    pub fn from_issues(issues: Vec<CoherenceIssue>, checks_run: usize) -> Self {
        let blocking = issues.iter().filter(|i| i.is_blocking()).count();
        let score = if checks_run == 0 {
            1.0
        } else {
            1.0 - (blocking as f32 / checks_run as f32)
        };
        Self {
            score,
            issues,
            checks_run,
        }
    }

    /// Whether the plan is acceptable (zero blocking issues).
    pub fn is_coherent(&self) -> bool {
        self.blocking_count() == 0
    }

    pub fn blocking_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_blocking()).count()
    }

    /// Issues matching a label (exhaustive kinds make label lookup cheap
    /// for audit tooling).
    pub fn issues_labeled<'a>(&'a self, label: &str) -> Vec<&'a CoherenceIssue> {
        self.issues
            .iter()
            .filter(|i| i.kind.label() == label)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;

    #[test]
    fn test_unnecessary_dependency_is_informational() {
        let kind = CoherenceIssueKind::UnnecessaryDependency {
            from: new_entity_id(),
            to: new_entity_id(),
        };
        assert!(!kind.is_blocking());
    }

    #[test]
    fn test_circular_dependency_repairs_first() {
        let circular = CoherenceIssueKind::CircularDependency { cycle: vec![] };
        let conflict = CoherenceIssueKind::ConstraintConflict {
            first: new_entity_id(),
            second: new_entity_id(),
        };
        let overalloc = CoherenceIssueKind::ResourceOveralloc {
            resource: "worker".to_string(),
            assigned: 3,
            capacity: 2,
        };
        assert!(circular.repair_rank() < conflict.repair_rank());
        assert!(conflict.repair_rank() < overalloc.repair_rank());
    }

    #[test]
    fn test_report_score_and_acceptance() {
        let blocking = CoherenceIssue::new(
            CoherenceIssueKind::CircularDependency { cycle: vec![] },
            Severity::Critical,
            "cycle found",
        );
        let informational = CoherenceIssue::new(
            CoherenceIssueKind::UnnecessaryDependency {
                from: new_entity_id(),
                to: new_entity_id(),
            },
            Severity::Info,
            "redundant edge",
        );
        let report = CoherenceReport::from_issues(vec![blocking, informational], 10);
        assert_eq!(report.blocking_count(), 1);
        assert!(!report.is_coherent());
        assert!((report.score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_report_with_only_informational_is_coherent() {
        let informational = CoherenceIssue::new(
            CoherenceIssueKind::UnnecessaryDependency {
                from: new_entity_id(),
                to: new_entity_id(),
            },
            Severity::Info,
            "redundant edge",
        );
        let report = CoherenceReport::from_issues(vec![informational], 10);
        assert!(report.is_coherent());
        assert_eq!(report.score, 1.0);
    }
}
