//! TILLER Engine - Adaptation Pipeline
//!
//! Detects when the active plan no longer matches observed reality,
//! selects a mutation strategy, produces a candidate plan, validates
//! and repairs its coherence under a hard iteration cap, and swaps the
//! accepted snapshot atomically. The session object in [`session`] is
//! the single authority driving the pipeline.

pub mod adapter;
pub mod cycle;
pub mod detect;
pub mod repair;
pub mod session;
pub mod store;
pub mod strategy;
pub mod validate;

pub use adapter::{update_for_plan_change, updates_for_observation};
pub use cycle::{CycleAudit, CycleOutcome, CyclePhase, CycleTrace};
pub use detect::{
    ContradictionDetector, EnvironmentalChangeDetector, ProgressAnomalyDetector, TriggerDetector,
};
pub use repair::{CoherenceRepairer, RepairOutcome};
pub use session::AdaptationSession;
pub use store::{PlanExport, PlanStore};
pub use strategy::{extract_lessons, structural_check, Candidate, StrategyEngine};
pub use validate::validate;
