//! Adaptation cycle state machine
//!
//! One cycle walks: Stable -> Detecting -> StrategySelected -> Mutated
//! -> Validating -> {Repairing (bounded) -> Validating} -> Accepted ->
//! Stable, with a single side edge into Replacing when repair is
//! exhausted. Replacing re-enters the pipeline once; it never recurses.

use serde::{Deserialize, Serialize};
use tiller_core::{PlanChange, StrategyKind, Timestamp};

/// Phase of an adaptation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Stable,
    Detecting,
    StrategySelected,
    Mutated,
    Validating,
    /// n-th repair pass (1-based, capped by configuration).
    Repairing(u32),
    /// Escalation target after exhausted repair.
    Replacing,
    Accepted,
}

impl CyclePhase {
    /// Whether `next` is a legal successor of this phase.
    pub fn can_transition(&self, next: &CyclePhase) -> bool {
        use CyclePhase::*;
        match (self, next) {
            (Stable, Detecting) => true,
            // No triggers: straight back to stable.
            (Detecting, Stable) => true,
            (Detecting, StrategySelected) => true,
            // A structurally invalid candidate retries with another strategy.
            (StrategySelected, StrategySelected) => true,
            (StrategySelected, Mutated) => true,
            (Mutated, Validating) => true,
            (Validating, Accepted) => true,
            (Validating, Repairing(n)) => *n >= 1,
            (Validating, Replacing) => true,
            (Repairing(_), Validating) => true,
            (Repairing(_), Replacing) => true,
            // Replacement re-enters the pipeline exactly once.
            (Replacing, Mutated) => true,
            (Accepted, Stable) => true,
            _ => false,
        }
    }
}

/// Ordered record of the phases one cycle went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleTrace {
    phases: Vec<CyclePhase>,
}

impl CycleTrace {
    /// A fresh trace, starting Stable.
    pub fn new() -> Self {
        Self {
            phases: vec![CyclePhase::Stable],
        }
    }

    /// Record a transition. Returns false (and records nothing) if the
    /// transition is illegal - a programming error the tests catch.
    pub fn advance(&mut self, next: CyclePhase) -> bool {
        let legal = self
            .phases
            .last()
            .map(|current| current.can_transition(&next))
            .unwrap_or(false);
        if legal {
            self.phases.push(next);
        }
        legal
    }

    pub fn current(&self) -> CyclePhase {
        *self.phases.last().unwrap_or(&CyclePhase::Stable)
    }

    pub fn phases(&self) -> &[CyclePhase] {
        &self.phases
    }

    /// How many repair passes the trace records.
    pub fn repair_passes(&self) -> u32 {
        self.phases
            .iter()
            .filter(|p| matches!(p, CyclePhase::Repairing(_)))
            .count() as u32
    }
}

impl Default for CycleTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one `run_cycle` call.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing to do: no pending observations or no triggers fired.
    Idle,
    /// A new plan version was accepted and swapped in.
    Adapted(PlanChange),
}

/// Audit record for one cycle, retained by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleAudit {
    pub cycle: u64,
    pub trigger_labels: Vec<String>,
    pub strategy: Option<StrategyKind>,
    pub phases: Vec<CyclePhase>,
    /// Display strings of observation items dropped at the parse boundary.
    pub skipped_observations: Vec<String>,
    pub outcome: String,
    pub occurred_at: Timestamp,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_walk_is_legal() {
        let mut trace = CycleTrace::new();
        for phase in [
            CyclePhase::Detecting,
            CyclePhase::StrategySelected,
            CyclePhase::Mutated,
            CyclePhase::Validating,
            CyclePhase::Accepted,
            CyclePhase::Stable,
        ] {
            assert!(trace.advance(phase), "rejected {:?}", phase);
        }
    }

    #[test]
    fn test_repair_loop_walk_is_legal() {
        let mut trace = CycleTrace::new();
        assert!(trace.advance(CyclePhase::Detecting));
        assert!(trace.advance(CyclePhase::StrategySelected));
        assert!(trace.advance(CyclePhase::Mutated));
        assert!(trace.advance(CyclePhase::Validating));
        for n in 1..=3 {
            assert!(trace.advance(CyclePhase::Repairing(n)));
            assert!(trace.advance(CyclePhase::Validating));
        }
        assert!(trace.advance(CyclePhase::Accepted));
        assert_eq!(trace.repair_passes(), 3);
    }

    #[test]
    fn test_escalation_walk_is_legal() {
        let mut trace = CycleTrace::new();
        for phase in [
            CyclePhase::Detecting,
            CyclePhase::StrategySelected,
            CyclePhase::Mutated,
            CyclePhase::Validating,
            CyclePhase::Repairing(1),
            CyclePhase::Replacing,
            CyclePhase::Mutated,
            CyclePhase::Validating,
            CyclePhase::Accepted,
            CyclePhase::Stable,
        ] {
            assert!(trace.advance(phase), "rejected {:?}", phase);
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut trace = CycleTrace::new();
        // Cannot accept straight from stable.
        assert!(!trace.advance(CyclePhase::Accepted));
        assert_eq!(trace.current(), CyclePhase::Stable);

        assert!(trace.advance(CyclePhase::Detecting));
        // Cannot mutate before selecting a strategy.
        assert!(!trace.advance(CyclePhase::Mutated));
        // Cannot repair before validating.
        assert!(!trace.advance(CyclePhase::Repairing(1)));
    }

    #[test]
    fn test_idle_walk_returns_to_stable() {
        let mut trace = CycleTrace::new();
        assert!(trace.advance(CyclePhase::Detecting));
        assert!(trace.advance(CyclePhase::Stable));
        assert_eq!(trace.current(), CyclePhase::Stable);
    }

    #[test]
    fn test_replacing_only_reachable_from_validation_or_repair() {
        use CyclePhase::*;
        assert!(!Stable.can_transition(&Replacing));
        assert!(!Detecting.can_transition(&Replacing));
        assert!(!StrategySelected.can_transition(&Replacing));
        assert!(!Mutated.can_transition(&Replacing));
        assert!(Validating.can_transition(&Replacing));
        assert!(Repairing(2).can_transition(&Replacing));
    }
}
