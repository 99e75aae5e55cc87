//! Plan store - versioned immutable snapshots with atomic swap
//!
//! One authoritative current snapshot per session. Readers clone an
//! `Arc` and never block the mutation pipeline; `publish` is a pointer
//! swap. Outgoing versions are retained, never mutated in place - the
//! Replacement strategy mines them for lessons learned.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tiller_core::{
    Assumption, Constraint, Dependency, ExecutionState, Goal, MutationError, Plan, PlanChange,
    StoreError, Task, TaskId, TillerError, TillerResult,
};
use tracing::info;

/// Read-only export of a plan snapshot for the hand-off collaborator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanExport {
    pub version: u64,
    pub goals: Vec<Goal>,
    pub tasks: BTreeMap<TaskId, Task>,
    pub dependencies: Vec<Dependency>,
    pub assumptions: Vec<Assumption>,
    pub constraints: Vec<Constraint>,
    pub execution_state: ExecutionState,
}

impl From<&Plan> for PlanExport {
    fn from(plan: &Plan) -> Self {
        Self {
            version: plan.version,
            goals: plan.goals.clone(),
            tasks: plan.tasks.clone(),
            dependencies: plan.dependencies.iter().copied().collect(),
            assumptions: plan.assumptions.clone(),
            constraints: plan.constraints.clone(),
            execution_state: plan.execution_state(),
        }
    }
}

/// Session-scoped plan store.
#[derive(Debug)]
pub struct PlanStore {
    current: RwLock<Arc<Plan>>,
    history: RwLock<Vec<Arc<Plan>>>,
    changes: RwLock<Vec<PlanChange>>,
}

impl PlanStore {
    /// Create a store holding the session's initial plan.
    pub fn new(initial: Plan) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            history: RwLock::new(Vec::new()),
            changes: RwLock::new(Vec::new()),
        }
    }

    /// Current snapshot. Cheap: clones the `Arc`, not the plan.
    pub fn snapshot(&self) -> TillerResult<Arc<Plan>> {
        let guard = self
            .current
            .read()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        Ok(Arc::clone(&guard))
    }

    /// Current plan version.
    pub fn version(&self) -> TillerResult<u64> {
        Ok(self.snapshot()?.version)
    }

    /// Replace the current snapshot with an accepted candidate.
    ///
    /// The candidate must carry exactly the next version; the outgoing
    /// snapshot is appended to history and the change recorded on the
    /// plan-change feed.
    pub fn publish(&self, candidate: Plan, change: PlanChange) -> TillerResult<Arc<Plan>> {
        let next = Arc::new(candidate);
        let mut guard = self
            .current
            .write()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;

        if next.version != guard.version + 1 {
            return Err(TillerError::Mutation(MutationError::VersionMismatch {
                current: guard.version,
                candidate: next.version,
            }));
        }

        let outgoing = Arc::clone(&guard);
        self.history
            .write()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .push(outgoing);
        self.changes
            .write()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .push(change);

        info!(
            version = next.version,
            tasks = next.tasks.len(),
            edges = next.dependencies.len(),
            "plan snapshot published"
        );
        *guard = Arc::clone(&next);
        Ok(next)
    }

    /// Retained prior versions, oldest first.
    pub fn history(&self) -> TillerResult<Vec<Arc<Plan>>> {
        Ok(self
            .history
            .read()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .clone())
    }

    /// A specific retained version.
    pub fn version_at(&self, version: u64) -> TillerResult<Arc<Plan>> {
        let current = self.snapshot()?;
        if current.version == version {
            return Ok(current);
        }
        self.history()?
            .into_iter()
            .find(|p| p.version == version)
            .ok_or(TillerError::Store(StoreError::VersionNotFound { version }))
    }

    /// The plan-change feed: one entry per accepted cycle.
    pub fn changes(&self) -> TillerResult<Vec<PlanChange>> {
        Ok(self
            .changes
            .read()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .clone())
    }

    /// Read-only export of the current snapshot.
    pub fn export(&self) -> TillerResult<PlanExport> {
        Ok(PlanExport::from(self.snapshot()?.as_ref()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::{Goal, StrategyKind};

    fn initial_plan() -> Plan {
        Plan::new(Goal::new("ship the feature")).with_task(Task::new("write the code"))
    }

    #[test]
    fn test_publish_swaps_and_retains_history() {
        let store = PlanStore::new(initial_plan());
        let old = store.snapshot().unwrap();

        let next = old.next_version();
        store
            .publish(next, PlanChange::new(1, 2, StrategyKind::Refinement))
            .unwrap();

        assert_eq!(store.version().unwrap(), 2);
        let history = store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        // Readers holding the old Arc still see version 1.
        assert_eq!(old.version, 1);
    }

    #[test]
    fn test_publish_rejects_version_gap() {
        let store = PlanStore::new(initial_plan());
        let mut candidate = store.snapshot().unwrap().next_version();
        candidate.version = 5;

        let err = store
            .publish(candidate, PlanChange::new(1, 5, StrategyKind::Refinement))
            .unwrap_err();
        assert!(matches!(
            err,
            TillerError::Mutation(MutationError::VersionMismatch { current: 1, candidate: 5 })
        ));
        // Nothing was swapped or recorded.
        assert_eq!(store.version().unwrap(), 1);
        assert!(store.changes().unwrap().is_empty());
    }

    #[test]
    fn test_change_feed_records_accepted_cycles() {
        let store = PlanStore::new(initial_plan());
        let v2 = store.snapshot().unwrap().next_version();
        store
            .publish(v2, PlanChange::new(1, 2, StrategyKind::Refinement))
            .unwrap();
        let v3 = store.snapshot().unwrap().next_version();
        store
            .publish(v3, PlanChange::new(2, 3, StrategyKind::Restructuring))
            .unwrap();

        let changes = store.changes().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].to_version, 2);
        assert_eq!(changes[1].strategy, StrategyKind::Restructuring);
    }

    #[test]
    fn test_version_at_finds_history_and_current() {
        let store = PlanStore::new(initial_plan());
        let v2 = store.snapshot().unwrap().next_version();
        store
            .publish(v2, PlanChange::new(1, 2, StrategyKind::Refinement))
            .unwrap();

        assert_eq!(store.version_at(1).unwrap().version, 1);
        assert_eq!(store.version_at(2).unwrap().version, 2);
        assert!(matches!(
            store.version_at(9).unwrap_err(),
            TillerError::Store(StoreError::VersionNotFound { version: 9 })
        ));
    }

    #[test]
    fn test_export_reflects_current_snapshot() {
        let store = PlanStore::new(initial_plan());
        let export = store.export().unwrap();
        assert_eq!(export.version, 1);
        assert_eq!(export.tasks.len(), 1);
        assert_eq!(export.execution_state.pending, 1);
    }
}
