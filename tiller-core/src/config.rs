//! Configuration types

use crate::{ConfigError, TillerError, TillerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Master configuration for an adaptation session.
///
/// The detection thresholds here are deliberately configuration, not
/// constants: the 30% velocity deviation and 50% context pressure
/// values are defaults with no deeper physics behind them, and a
/// session may override any of them (see `from_env`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Relative velocity deviation above which a VelocityAnomaly fires.
    pub velocity_deviation_threshold: f32,
    /// How long a dependency may sit in Blocked before a DependencyAnomaly fires.
    pub blocked_patience: Duration,
    /// Maximum repair-revalidate iterations before escalation.
    pub max_repair_iterations: u32,
    /// Number of candidate plans generated by a Replacement.
    pub max_replacement_candidates: usize,

    /// Retention budget for the context store (estimated size units).
    pub context_size_budget: i64,
    /// Fraction of the budget at which the optimizer starts compacting.
    pub context_pressure_ratio: f32,
    /// Half-life for the recency boost in relevance scoring.
    pub recency_half_life: Duration,
    /// Weight of the redundancy penalty in relevance scoring.
    pub redundancy_penalty_weight: f32,
}

impl EngineConfig {
    /// Build the default session configuration.
    ///
    /// Centralizes the defaults so callers never hardcode thresholds.
    pub fn default_session() -> Self {
        Self {
            velocity_deviation_threshold: 0.30,
            blocked_patience: Duration::from_secs(1800),
            max_repair_iterations: 3,
            max_replacement_candidates: 3,
            context_size_budget: 16_000,
            context_pressure_ratio: 0.5,
            recency_half_life: Duration::from_secs(3600),
            redundancy_penalty_weight: 0.5,
        }
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TILLER_VELOCITY_DEVIATION_THRESHOLD` (default: 0.30)
    /// - `TILLER_BLOCKED_PATIENCE_SECS` (default: 1800)
    /// - `TILLER_MAX_REPAIR_ITERATIONS` (default: 3)
    /// - `TILLER_CONTEXT_SIZE_BUDGET` (default: 16000)
    /// - `TILLER_CONTEXT_PRESSURE_RATIO` (default: 0.5)
    pub fn from_env() -> Self {
        let defaults = Self::default_session();

        Self {
            velocity_deviation_threshold: std::env::var("TILLER_VELOCITY_DEVIATION_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.velocity_deviation_threshold),
            blocked_patience: std::env::var("TILLER_BLOCKED_PATIENCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.blocked_patience),
            max_repair_iterations: std::env::var("TILLER_MAX_REPAIR_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_repair_iterations),
            context_size_budget: std::env::var("TILLER_CONTEXT_SIZE_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.context_size_budget),
            context_pressure_ratio: std::env::var("TILLER_CONTEXT_PRESSURE_RATIO")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.context_pressure_ratio),
            ..defaults
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(TillerError::Config) if invalid.
    pub fn validate(&self) -> TillerResult<()> {
        if self.velocity_deviation_threshold <= 0.0 || self.velocity_deviation_threshold > 1.0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "velocity_deviation_threshold".to_string(),
                value: self.velocity_deviation_threshold.to_string(),
                reason: "must be in (0.0, 1.0]".to_string(),
            }));
        }

        if self.blocked_patience.is_zero() {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "blocked_patience".to_string(),
                value: format!("{:?}", self.blocked_patience),
                reason: "must be positive".to_string(),
            }));
        }

        if self.max_repair_iterations == 0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "max_repair_iterations".to_string(),
                value: self.max_repair_iterations.to_string(),
                reason: "must be at least 1".to_string(),
            }));
        }

        if self.max_replacement_candidates == 0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "max_replacement_candidates".to_string(),
                value: self.max_replacement_candidates.to_string(),
                reason: "must be at least 1".to_string(),
            }));
        }

        if self.context_size_budget <= 0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "context_size_budget".to_string(),
                value: self.context_size_budget.to_string(),
                reason: "must be greater than 0".to_string(),
            }));
        }

        if self.context_pressure_ratio <= 0.0 || self.context_pressure_ratio > 1.0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "context_pressure_ratio".to_string(),
                value: self.context_pressure_ratio.to_string(),
                reason: "must be in (0.0, 1.0]".to_string(),
            }));
        }

        if self.recency_half_life.is_zero() {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "recency_half_life".to_string(),
                value: format!("{:?}", self.recency_half_life),
                reason: "must be positive".to_string(),
            }));
        }

        if self.redundancy_penalty_weight < 0.0 {
            return Err(TillerError::Config(ConfigError::InvalidValue {
                field: "redundancy_penalty_weight".to_string(),
                value: self.redundancy_penalty_weight.to_string(),
                reason: "must be non-negative".to_string(),
            }));
        }

        Ok(())
    }
}
