//! Enum types for TILLER entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TASK STATUS
// ============================================================================

/// Status of a task within a plan version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Task has not started yet
    #[default]
    Pending,
    /// Task is being executed
    Active,
    /// Task is waiting on something (dependency, resource, decision)
    Blocked,
    /// Task finished successfully
    Completed,
}

impl TaskStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Active => "Active",
            TaskStatus::Blocked => "Blocked",
            TaskStatus::Completed => "Completed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "active" => Ok(TaskStatus::Active),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" | "complete" => Ok(TaskStatus::Completed),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task status: {}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ============================================================================
// CONTEXT LAYER
// ============================================================================

/// Layer of the hierarchical context store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextLayer {
    /// User intent, clarifications, decisions
    Conversational,
    /// Code-level facts: files, dependencies, configuration
    Technical,
    /// Conventions, architecture, cross-cutting knowledge
    Project,
    /// Task progress, runtime state of the work itself
    Execution,
}

impl ContextLayer {
    /// All layers, in canonical order.
    pub const ALL: [ContextLayer; 4] = [
        ContextLayer::Conversational,
        ContextLayer::Technical,
        ContextLayer::Project,
        ContextLayer::Execution,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContextLayer::Conversational => "Conversational",
            ContextLayer::Technical => "Technical",
            ContextLayer::Project => "Project",
            ContextLayer::Execution => "Execution",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ContextLayerParseError> {
        match s.to_lowercase().as_str() {
            "conversational" => Ok(ContextLayer::Conversational),
            "technical" => Ok(ContextLayer::Technical),
            "project" => Ok(ContextLayer::Project),
            "execution" => Ok(ContextLayer::Execution),
            _ => Err(ContextLayerParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ContextLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ContextLayer {
    type Err = ContextLayerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid context layer string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLayerParseError(pub String);

impl fmt::Display for ContextLayerParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid context layer: {}", self.0)
    }
}

impl std::error::Error for ContextLayerParseError {}

// ============================================================================
// STRATEGY
// ============================================================================

/// The three granularities of plan mutation.
///
/// When several triggers fire in one cycle they may imply different
/// strategies; selection uses a fixed total order, `priority()`, with
/// Replacement ranked above Restructuring above Refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Adjust parameters, ordering, or resources; task and edge sets unchanged
    Refinement,
    /// Rebuild the impacted sub-structure; goal set preserved
    Restructuring,
    /// Generate a new plan from lessons learned; may change the goal set
    Replacement,
}

impl StrategyKind {
    /// Fixed selection priority. Higher wins when triggers disagree.
    pub fn priority(&self) -> u8 {
        match self {
            StrategyKind::Refinement => 0,
            StrategyKind::Restructuring => 1,
            StrategyKind::Replacement => 2,
        }
    }

    /// The next strategy up the escalation ladder, if any.
    pub fn escalated(&self) -> Option<StrategyKind> {
        match self {
            StrategyKind::Refinement => Some(StrategyKind::Restructuring),
            StrategyKind::Restructuring => Some(StrategyKind::Replacement),
            StrategyKind::Replacement => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Refinement => "Refinement",
            StrategyKind::Restructuring => "Restructuring",
            StrategyKind::Replacement => "Replacement",
        };
        write!(f, "{}", s)
    }
}

/// Concrete action taken by a Refinement mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefinementAction {
    ParameterAdjustment,
    TaskReordering,
    ResourceReallocation,
    ConstraintRelaxation,
}

// ============================================================================
// SEVERITY
// ============================================================================

/// Ordered severity scale shared by triggers and coherence issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational - no action required
    Info,
    /// Warning - worth recording, does not block acceptance
    Warning,
    /// Error - blocks acceptance
    Error,
    /// Critical - immediate attention required
    Critical,
}

impl Severity {
    /// Whether an issue at this severity blocks plan acceptance.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// ENVIRONMENT DIFFING
// ============================================================================

/// Direction of an environmental change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Category of external state tracked by the environmental detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvCategory {
    File,
    Dependency,
    Config,
    Service,
}

// ============================================================================
// DETECTORS
// ============================================================================

/// Identifies which detector produced a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorKind {
    Contradiction,
    ProgressAnomaly,
    EnvironmentalChange,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectorKind::Contradiction => "contradiction",
            DetectorKind::ProgressAnomaly => "progress_anomaly",
            DetectorKind::EnvironmentalChange => "environmental_change",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Blocked,
            TaskStatus::Completed,
        ] {
            let db_str = status.as_db_str();
            let parsed = TaskStatus::from_db_str(db_str).unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_task_status_rejects_unknown() {
        assert!(TaskStatus::from_db_str("paused").is_err());
    }

    #[test]
    fn test_context_layer_roundtrip() {
        for layer in ContextLayer::ALL {
            let parsed: ContextLayer = layer.as_db_str().parse().unwrap();
            assert_eq!(layer, parsed);
        }
    }

    #[test]
    fn test_strategy_priority_ordering() {
        assert!(StrategyKind::Replacement.priority() > StrategyKind::Restructuring.priority());
        assert!(StrategyKind::Restructuring.priority() > StrategyKind::Refinement.priority());
    }

    #[test]
    fn test_strategy_escalation_terminates() {
        let mut strategy = StrategyKind::Refinement;
        let mut steps = 0;
        while let Some(next) = strategy.escalated() {
            strategy = next;
            steps += 1;
        }
        assert_eq!(strategy, StrategyKind::Replacement);
        assert_eq!(steps, 2);
    }

    #[test]
    fn test_severity_is_ordered() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_blocking() {
        assert!(!Severity::Info.is_blocking());
        assert!(!Severity::Warning.is_blocking());
        assert!(Severity::Error.is_blocking());
        assert!(Severity::Critical.is_blocking());
    }
}
