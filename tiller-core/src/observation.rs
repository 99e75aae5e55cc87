//! Observation ingestion types
//!
//! Observations arrive from the orchestrating collaborator as raw
//! `{kind, payload, timestamp}` items. They are parsed into typed
//! payloads at the boundary; malformed items are rejected with a
//! `TriggerError` and skipped, never fatal to a cycle.

use crate::{
    ChangeKind, ContentHash, EnvCategory, TaskId, Timestamp, TriggerError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RAW WIRE FORM
// ============================================================================

/// An observation as submitted by the orchestrator, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub kind: String,
    pub payload: serde_json::Value,
    pub observed_at: Timestamp,
}

impl RawObservation {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            observed_at: Utc::now(),
        }
    }
}

// ============================================================================
// TYPED FORM
// ============================================================================

/// Complexity class of a task, for expected-vs-observed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplexityClass {
    Trivial,
    Moderate,
    Complex,
}

impl ComplexityClass {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ComplexityClass::Trivial => "Trivial",
            ComplexityClass::Moderate => "Moderate",
            ComplexityClass::Complex => "Complex",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ComplexityParseError> {
        match s.to_lowercase().as_str() {
            "trivial" => Ok(ComplexityClass::Trivial),
            "moderate" => Ok(ComplexityClass::Moderate),
            "complex" => Ok(ComplexityClass::Complex),
            _ => Err(ComplexityParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ComplexityClass {
    type Err = ComplexityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid complexity class string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityParseError(pub String);

impl fmt::Display for ComplexityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid complexity class: {}", self.0)
    }
}

impl std::error::Error for ComplexityParseError {}

/// A fact asserted by an observation, used for contradiction checks
/// against plan assumptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertedFact {
    pub subject: String,
    pub claim: String,
}

/// A constraint discovered mid-session, before it is folded into a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredConstraint {
    pub subject: String,
    /// true if the subject must not be used; false if it is required
    pub forbids: bool,
    pub detail: Option<String>,
}

/// Validated observation payload, one variant per wire kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationPayload {
    FileAdded {
        path: String,
        content_hash: ContentHash,
    },
    FileModified {
        path: String,
        content_hash: ContentHash,
    },
    FileDeleted {
        path: String,
    },
    DependencyChanged {
        name: String,
        version: Option<String>,
        removed: bool,
    },
    ConfigChanged {
        key: String,
        value: Option<String>,
    },
    ServiceChanged {
        name: String,
        available: bool,
    },
    UserMessage {
        content: String,
        asserted_facts: Vec<AssertedFact>,
        requirements: Vec<String>,
        discovered_constraints: Vec<DiscoveredConstraint>,
    },
    ProgressReport {
        expected_rate: f32,
        actual_rate: f32,
        task_id: Option<TaskId>,
        observed_complexity: Option<ComplexityClass>,
    },
}

impl ObservationPayload {
    /// The wire kind string for this payload.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ObservationPayload::FileAdded { .. } => "file_added",
            ObservationPayload::FileModified { .. } => "file_modified",
            ObservationPayload::FileDeleted { .. } => "file_deleted",
            ObservationPayload::DependencyChanged { .. } => "dependency_changed",
            ObservationPayload::ConfigChanged { .. } => "config_changed",
            ObservationPayload::ServiceChanged { .. } => "service_changed",
            ObservationPayload::UserMessage { .. } => "user_message",
            ObservationPayload::ProgressReport { .. } => "progress_report",
        }
    }
}

/// A validated observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub payload: ObservationPayload,
    pub observed_at: Timestamp,
}

// Payload field extraction helpers for the wire boundary.
fn require_str(
    payload: &serde_json::Value,
    kind: &str,
    field: &str,
) -> Result<String, TriggerError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| TriggerError::MissingField {
            kind: kind.to_string(),
            field: field.to_string(),
        })
}

fn require_f32(payload: &serde_json::Value, kind: &str, field: &str) -> Result<f32, TriggerError> {
    payload
        .get(field)
        .and_then(|v| v.as_f64())
        .map(|f| f as f32)
        .ok_or_else(|| TriggerError::MissingField {
            kind: kind.to_string(),
            field: field.to_string(),
        })
}

fn require_hash(
    payload: &serde_json::Value,
    kind: &str,
    field: &str,
) -> Result<ContentHash, TriggerError> {
    let hex_str = require_str(payload, kind, field)?;
    let bytes = hex::decode(&hex_str).map_err(|_| TriggerError::MalformedPayload {
        kind: kind.to_string(),
        reason: format!("{} is not valid hex", field),
    })?;
    if bytes.len() != 32 {
        return Err(TriggerError::MalformedPayload {
            kind: kind.to_string(),
            reason: format!("{} must be 32 bytes, got {}", field, bytes.len()),
        });
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

impl TryFrom<RawObservation> for Observation {
    type Error = TriggerError;

    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_str();
        let payload = match kind {
            "file_added" => ObservationPayload::FileAdded {
                path: require_str(&raw.payload, kind, "path")?,
                content_hash: require_hash(&raw.payload, kind, "content_hash")?,
            },
            "file_modified" => ObservationPayload::FileModified {
                path: require_str(&raw.payload, kind, "path")?,
                content_hash: require_hash(&raw.payload, kind, "content_hash")?,
            },
            "file_deleted" => ObservationPayload::FileDeleted {
                path: require_str(&raw.payload, kind, "path")?,
            },
            "dependency_changed" => ObservationPayload::DependencyChanged {
                name: require_str(&raw.payload, kind, "name")?,
                version: raw
                    .payload
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                removed: raw
                    .payload
                    .get("removed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            "config_changed" => ObservationPayload::ConfigChanged {
                key: require_str(&raw.payload, kind, "key")?,
                value: raw
                    .payload
                    .get("value")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            },
            "service_changed" => ObservationPayload::ServiceChanged {
                name: require_str(&raw.payload, kind, "name")?,
                available: raw.payload.get("available").and_then(|v| v.as_bool()).ok_or(
                    TriggerError::MissingField {
                        kind: kind.to_string(),
                        field: "available".to_string(),
                    },
                )?,
            },
            "user_message" => {
                let asserted_facts = match raw.payload.get("asserted_facts") {
                    None => Vec::new(),
                    Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                        TriggerError::MalformedPayload {
                            kind: kind.to_string(),
                            reason: format!("asserted_facts: {}", e),
                        }
                    })?,
                };
                let discovered_constraints = match raw.payload.get("discovered_constraints") {
                    None => Vec::new(),
                    Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                        TriggerError::MalformedPayload {
                            kind: kind.to_string(),
                            reason: format!("discovered_constraints: {}", e),
                        }
                    })?,
                };
                let requirements = raw
                    .payload
                    .get("requirements")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                ObservationPayload::UserMessage {
                    content: require_str(&raw.payload, kind, "content")?,
                    asserted_facts,
                    requirements,
                    discovered_constraints,
                }
            }
            "progress_report" => ObservationPayload::ProgressReport {
                expected_rate: require_f32(&raw.payload, kind, "expected_rate")?,
                actual_rate: require_f32(&raw.payload, kind, "actual_rate")?,
                task_id: raw
                    .payload
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok()),
                observed_complexity: raw
                    .payload
                    .get("observed_complexity")
                    .and_then(|v| v.as_str())
                    .and_then(|s| ComplexityClass::from_db_str(s).ok()),
            },
            other => {
                return Err(TriggerError::UnknownKind {
                    kind: other.to_string(),
                })
            }
        };

        Ok(Observation {
            payload,
            observed_at: raw.observed_at,
        })
    }
}

// ============================================================================
// ENVIRONMENT STATE
// ============================================================================

/// External-state snapshot submitted by the environmental collaborator.
/// The engine itself performs no I/O; it only diffs snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnvironmentState {
    /// File path -> content hash.
    pub files: BTreeMap<String, ContentHash>,
    /// Dependency name -> version.
    pub dependency_manifest: BTreeMap<String, String>,
    /// Configuration key -> value.
    pub config_values: BTreeMap<String, String>,
    /// Service name -> availability.
    pub services: BTreeMap<String, bool>,
}

/// One environmental change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvChange {
    pub category: EnvCategory,
    pub kind: ChangeKind,
    pub subject: String,
    pub detail: Option<String>,
}

impl EnvironmentState {
    /// Diff `newer` against `self`, producing Added/Modified/Removed
    /// records per category.
    pub fn diff(&self, newer: &EnvironmentState) -> Vec<EnvChange> {
        let mut changes = Vec::new();

        diff_maps(
            &self.files,
            &newer.files,
            EnvCategory::File,
            |hash| Some(crate::short_hash(hash)),
            &mut changes,
        );
        diff_maps(
            &self.dependency_manifest,
            &newer.dependency_manifest,
            EnvCategory::Dependency,
            |version| Some(version.clone()),
            &mut changes,
        );
        diff_maps(
            &self.config_values,
            &newer.config_values,
            EnvCategory::Config,
            |value| Some(value.clone()),
            &mut changes,
        );
        diff_maps(
            &self.services,
            &newer.services,
            EnvCategory::Service,
            |up| Some(if *up { "up".to_string() } else { "down".to_string() }),
            &mut changes,
        );

        changes
    }
}

fn diff_maps<V: PartialEq>(
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    category: EnvCategory,
    detail: impl Fn(&V) -> Option<String>,
    out: &mut Vec<EnvChange>,
) {
    for (subject, value) in new {
        match old.get(subject) {
            None => out.push(EnvChange {
                category,
                kind: ChangeKind::Added,
                subject: subject.clone(),
                detail: detail(value),
            }),
            Some(previous) if previous != value => out.push(EnvChange {
                category,
                kind: ChangeKind::Modified,
                subject: subject.clone(),
                detail: detail(value),
            }),
            Some(_) => {}
        }
    }
    for subject in old.keys() {
        if !new.contains_key(subject) {
            out.push(EnvChange {
                category,
                kind: ChangeKind::Removed,
                subject: subject.clone(),
                detail: None,
            });
        }
    }
}

// ============================================================================
// OBSERVATION BATCH
// ============================================================================

/// A batch of observations handed to one adaptation cycle.
///
/// A batch arriving mid-cycle is queued and folded into the next
/// cycle's batch, never interrupting the one in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObservationBatch {
    pub observations: Vec<Observation>,
    /// Full external-state snapshot, when the environmental collaborator
    /// supplied one this cycle.
    pub environment: Option<EnvironmentState>,
}

impl ObservationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation.
    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observations.push(observation);
        self
    }

    /// Attach an environment snapshot.
    pub fn with_environment(mut self, environment: EnvironmentState) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Fold another batch into this one, preserving arrival order.
    /// A newer environment snapshot supersedes the old one.
    pub fn merge(&mut self, other: ObservationBatch) {
        self.observations.extend(other.observations);
        if other.environment.is_some() {
            self.environment = other.environment;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.environment.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_content_hash;

    #[test]
    fn test_parse_file_added() {
        let hash = compute_content_hash(b"fn main() {}");
        let raw = RawObservation::new(
            "file_added",
            serde_json::json!({"path": "src/main.rs", "content_hash": hex::encode(hash)}),
        );
        let obs = Observation::try_from(raw).unwrap();
        match obs.payload {
            ObservationPayload::FileAdded { path, content_hash } => {
                assert_eq!(path, "src/main.rs");
                assert_eq!(content_hash, hash);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let raw = RawObservation::new("telemetry_ping", serde_json::json!({}));
        assert!(matches!(
            Observation::try_from(raw),
            Err(TriggerError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let raw = RawObservation::new("file_deleted", serde_json::json!({}));
        assert!(matches!(
            Observation::try_from(raw),
            Err(TriggerError::MissingField { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_hash() {
        let raw = RawObservation::new(
            "file_added",
            serde_json::json!({"path": "a.rs", "content_hash": "zz"}),
        );
        assert!(matches!(
            Observation::try_from(raw),
            Err(TriggerError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_parse_progress_report() {
        let raw = RawObservation::new(
            "progress_report",
            serde_json::json!({"expected_rate": 2.0, "actual_rate": 1.0, "observed_complexity": "complex"}),
        );
        let obs = Observation::try_from(raw).unwrap();
        match obs.payload {
            ObservationPayload::ProgressReport {
                expected_rate,
                actual_rate,
                observed_complexity,
                ..
            } => {
                assert_eq!(expected_rate, 2.0);
                assert_eq!(actual_rate, 1.0);
                assert_eq!(observed_complexity, Some(ComplexityClass::Complex));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_parse_user_message_defaults_empty_lists() {
        let raw = RawObservation::new("user_message", serde_json::json!({"content": "hi"}));
        let obs = Observation::try_from(raw).unwrap();
        match obs.payload {
            ObservationPayload::UserMessage {
                asserted_facts,
                requirements,
                discovered_constraints,
                ..
            } => {
                assert!(asserted_facts.is_empty());
                assert!(requirements.is_empty());
                assert!(discovered_constraints.is_empty());
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_environment_diff_categories() {
        let mut old = EnvironmentState::default();
        old.files
            .insert("src/lib.rs".to_string(), compute_content_hash(b"v1"));
        old.dependency_manifest
            .insert("serde".to_string(), "1.0".to_string());
        old.services.insert("db".to_string(), true);

        let mut new = old.clone();
        new.files
            .insert("src/lib.rs".to_string(), compute_content_hash(b"v2"));
        new.files
            .insert("src/api.rs".to_string(), compute_content_hash(b"v1"));
        new.dependency_manifest.remove("serde");
        new.services.insert("db".to_string(), false);

        let changes = old.diff(&new);
        assert_eq!(changes.len(), 4);
        assert!(changes.iter().any(|c| c.category == EnvCategory::File
            && c.kind == ChangeKind::Modified
            && c.subject == "src/lib.rs"));
        assert!(changes.iter().any(|c| c.category == EnvCategory::File
            && c.kind == ChangeKind::Added
            && c.subject == "src/api.rs"));
        assert!(changes.iter().any(|c| c.category == EnvCategory::Dependency
            && c.kind == ChangeKind::Removed));
        assert!(changes.iter().any(|c| c.category == EnvCategory::Service
            && c.kind == ChangeKind::Modified
            && c.detail.as_deref() == Some("down")));
    }

    #[test]
    fn test_environment_diff_empty_when_identical() {
        let mut state = EnvironmentState::default();
        state
            .config_values
            .insert("RUST_LOG".to_string(), "info".to_string());
        assert!(state.diff(&state.clone()).is_empty());
    }

    #[test]
    fn test_batch_merge_keeps_order_and_newest_environment() {
        let obs1 = Observation::try_from(RawObservation::new(
            "file_deleted",
            serde_json::json!({"path": "old.rs"}),
        ))
        .unwrap();
        let obs2 = Observation::try_from(RawObservation::new(
            "file_deleted",
            serde_json::json!({"path": "new.rs"}),
        ))
        .unwrap();

        let mut first = ObservationBatch::new().with_observation(obs1);
        let mut env = EnvironmentState::default();
        env.services.insert("ci".to_string(), true);
        let second = ObservationBatch::new()
            .with_observation(obs2)
            .with_environment(env.clone());

        first.merge(second);
        assert_eq!(first.observations.len(), 2);
        assert_eq!(first.environment, Some(env));
        match &first.observations[0].payload {
            ObservationPayload::FileDeleted { path } => assert_eq!(path, "old.rs"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
