//! Error types for TILLER operations

use crate::{ContextLayer, StrategyKind, TaskId};
use thiserror::Error;
use uuid::Uuid;

/// Trigger detection errors.
///
/// Always recoverable: a malformed observation is dropped and logged,
/// never fatal to the adaptation cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Unknown observation kind: {kind}")]
    UnknownKind { kind: String },

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },

    #[error("Observation {kind} is missing required field {field}")]
    MissingField { kind: String, field: String },
}

/// Plan mutation errors.
///
/// A strategy produced a structurally invalid candidate. Recovered by
/// discarding the candidate and retrying with the next-priority
/// strategy, or surfaced if none succeeds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Candidate references nonexistent task {task_id}")]
    UnknownTask { task_id: TaskId },

    #[error("Dependency edge {from} -> {to} references a missing endpoint")]
    EdgeEndpointMissing { from: TaskId, to: TaskId },

    #[error("Duplicate task id {task_id} in candidate")]
    DuplicateTask { task_id: TaskId },

    #[error("Candidate version {candidate} does not follow current version {current}")]
    VersionMismatch { current: u64, candidate: u64 },

    #[error("Candidate produced by {strategy} rejected: {reason}")]
    CandidateRejected { strategy: StrategyKind, reason: String },

    #[error("No strategy produced a viable candidate for this cycle")]
    NoViableStrategy,
}

/// Coherence validation and repair errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoherenceError {
    #[error(
        "Repair exhausted after {iterations} iterations with {remaining} blocking issues remaining"
    )]
    RepairExhausted { iterations: u32, remaining: usize },
}

/// Context store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Optimizer dropped live key {key} in layer {layer} and it could not be restored")]
    IntegrityViolation { layer: ContextLayer, key: String },

    #[error("Context snapshot size {size} exceeds retention budget {budget}")]
    Overflow { size: i64, budget: i64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Plan store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Plan snapshot lock poisoned")]
    LockPoisoned,

    #[error("Plan version {version} not found in history")]
    VersionNotFound { version: u64 },

    #[error("Entity not found: {id}")]
    NotFound { id: Uuid },
}

/// Master error type for all TILLER operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TillerError {
    #[error("Trigger detection error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Plan mutation error: {0}")]
    Mutation(#[from] MutationError),

    #[error("Coherence error: {0}")]
    Coherence(#[from] CoherenceError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for TILLER operations.
pub type TillerResult<T> = Result<T, TillerError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;

    #[test]
    fn test_trigger_error_display_unknown_kind() {
        let err = TriggerError::UnknownKind {
            kind: "telemetry_ping".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unknown observation kind"));
        assert!(msg.contains("telemetry_ping"));
    }

    #[test]
    fn test_mutation_error_display_unknown_task() {
        let id = new_entity_id();
        let err = MutationError::UnknownTask { task_id: id };
        let msg = format!("{}", err);
        assert!(msg.contains("nonexistent task"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_coherence_error_display_repair_exhausted() {
        let err = CoherenceError::RepairExhausted {
            iterations: 3,
            remaining: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 iterations"));
        assert!(msg.contains("2 blocking issues"));
    }

    #[test]
    fn test_context_error_display_integrity() {
        let err = ContextError::IntegrityViolation {
            layer: ContextLayer::Technical,
            key: "dep:serde".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("dep:serde"));
        assert!(msg.contains("Technical"));
    }

    #[test]
    fn test_tiller_error_from_variants() {
        let trigger = TillerError::from(TriggerError::UnknownKind {
            kind: "x".to_string(),
        });
        assert!(matches!(trigger, TillerError::Trigger(_)));

        let mutation = TillerError::from(MutationError::NoViableStrategy);
        assert!(matches!(mutation, TillerError::Mutation(_)));

        let coherence = TillerError::from(CoherenceError::RepairExhausted {
            iterations: 3,
            remaining: 1,
        });
        assert!(matches!(coherence, TillerError::Coherence(_)));

        let context = TillerError::from(ContextError::Overflow {
            size: 10,
            budget: 5,
        });
        assert!(matches!(context, TillerError::Context(_)));

        let config = TillerError::from(ConfigError::MissingRequired {
            field: "velocity_deviation_threshold".to_string(),
        });
        assert!(matches!(config, TillerError::Config(_)));

        let store = TillerError::from(StoreError::LockPoisoned);
        assert!(matches!(store, TillerError::Store(_)));
    }
}
