//! TILLER Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no business logic.

pub mod change;
pub mod coherence;
pub mod config;
pub mod context;
pub mod enums;
pub mod error;
pub mod identity;
pub mod observation;
pub mod plan;
pub mod trigger;

pub use change::{LessonsLearned, PlanChange, TransitionNote};
pub use coherence::{CoherenceIssue, CoherenceIssueKind, CoherenceReport};
pub use config::EngineConfig;
pub use context::{
    estimate_size, ContextKey, ContextPiece, ContextSnapshot, ContextUpdate, ContextUpdateKind,
    RelevantContext,
};
pub use enums::{
    ChangeKind, ContextLayer, ContextLayerParseError, DetectorKind, EnvCategory, RefinementAction,
    Severity, StrategyKind, TaskStatus, TaskStatusParseError,
};
pub use error::{
    CoherenceError, ConfigError, ContextError, MutationError, StoreError, TillerError,
    TillerResult, TriggerError,
};
pub use identity::{
    compute_content_hash, new_entity_id, short_hash, AssumptionId, ConstraintId, ContentHash,
    DurationMs, EntityId, GoalId, PlanId, TaskId, Timestamp,
};
pub use observation::{
    AssertedFact, ComplexityClass, ComplexityParseError, DiscoveredConstraint, EnvChange,
    EnvironmentState, Observation, ObservationBatch, ObservationPayload, RawObservation,
};
pub use plan::{
    Assumption, Constraint, ConstraintKind, Dependency, ExecutionState, Goal, Plan, Task,
};
pub use trigger::{AdaptationTrigger, TriggerKind};
