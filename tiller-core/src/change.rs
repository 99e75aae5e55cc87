//! Plan change feed and transition records

use crate::{StrategyKind, TaskId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lessons extracted from an outgoing plan before Replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LessonsLearned {
    /// Assumptions that observations invalidated.
    pub invalidated_assumptions: Vec<String>,
    /// Approaches inferred from tasks stuck in Blocked.
    pub failed_approaches: Vec<String>,
    /// Constraints discovered during execution.
    pub discovered_constraints: Vec<String>,
    /// Patterns inferred from Completed tasks.
    pub successful_patterns: Vec<String>,
}

impl LessonsLearned {
    pub fn is_empty(&self) -> bool {
        self.invalidated_assumptions.is_empty()
            && self.failed_approaches.is_empty()
            && self.discovered_constraints.is_empty()
            && self.successful_patterns.is_empty()
    }
}

/// What a Replacement preserved vs. discarded from in-flight work.
/// Every Replacement carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNote {
    pub preserved_tasks: Vec<TaskId>,
    pub discarded_tasks: Vec<TaskId>,
    pub summary: String,
}

/// One accepted adaptation cycle, emitted on the plan-change feed.
/// Consumed by the context adapter and by external audit collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChange {
    pub from_version: u64,
    pub to_version: u64,
    pub strategy: StrategyKind,
    /// Labels of the triggers that drove the cycle.
    pub trigger_labels: Vec<String>,
    /// Present exactly when `strategy` is Replacement.
    pub transition_note: Option<TransitionNote>,
    pub occurred_at: Timestamp,
}

impl PlanChange {
    pub fn new(from_version: u64, to_version: u64, strategy: StrategyKind) -> Self {
        Self {
            from_version,
            to_version,
            strategy,
            trigger_labels: Vec::new(),
            transition_note: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_trigger_labels(mut self, labels: Vec<String>) -> Self {
        self.trigger_labels = labels;
        self
    }

    pub fn with_transition_note(mut self, note: TransitionNote) -> Self {
        self.transition_note = Some(note);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lessons_learned_empty() {
        assert!(LessonsLearned::default().is_empty());
        let lessons = LessonsLearned {
            failed_approaches: vec!["direct db migration".to_string()],
            ..Default::default()
        };
        assert!(!lessons.is_empty());
    }

    #[test]
    fn test_plan_change_builder() {
        let change = PlanChange::new(3, 4, StrategyKind::Restructuring)
            .with_trigger_labels(vec!["requirement_conflict".to_string()]);
        assert_eq!(change.from_version, 3);
        assert_eq!(change.to_version, 4);
        assert!(change.transition_note.is_none());
        assert_eq!(change.trigger_labels.len(), 1);
    }
}
