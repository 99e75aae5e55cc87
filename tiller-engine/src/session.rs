//! Adaptation session - the single-authority driver
//!
//! One explicit session object owns the plan store, the context store,
//! the detectors, and the mutation pipeline. It is constructed at
//! session start, passed by reference to collaborators, and discarded
//! at session end - there are no ambient globals.
//!
//! Concurrency model: `run_cycle` is the only writer and is synchronous
//! and bounded (the repair cap guarantees termination). Readers use the
//! snapshot accessors and never block. Observation batches arriving
//! mid-cycle are queued and folded into the next cycle's batch.

use crate::adapter::{update_for_plan_change, updates_for_observation};
use crate::cycle::{CycleAudit, CycleOutcome, CyclePhase, CycleTrace};
use crate::detect::{
    ContradictionDetector, EnvironmentalChangeDetector, ProgressAnomalyDetector, TriggerDetector,
};
use crate::repair::CoherenceRepairer;
use crate::store::{PlanExport, PlanStore};
use crate::strategy::{Candidate, StrategyEngine};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tiller_core::{
    AdaptationTrigger, CoherenceError, ContextLayer, ContextPiece, ContextSnapshot, ContextUpdate,
    EngineConfig, EnvironmentState, MutationError, Observation, ObservationBatch, Plan,
    PlanChange, RawObservation, RelevantContext, StoreError, StrategyKind, Task, TillerError,
    TillerResult,
};
use tiller_context::{ContextStore, QueryEngine};
use tracing::{info, warn};

/// The session-scoped adaptation engine.
pub struct AdaptationSession {
    config: EngineConfig,
    plan_store: PlanStore,
    context_store: ContextStore,
    query: QueryEngine,
    contradiction: ContradictionDetector,
    progress: ProgressAnomalyDetector,
    environmental: EnvironmentalChangeDetector,
    strategy: StrategyEngine,
    repairer: CoherenceRepairer,
    pending: Mutex<ObservationBatch>,
    skipped: Mutex<Vec<String>>,
    audits: Mutex<Vec<CycleAudit>>,
    cycles_run: Mutex<u64>,
}

impl AdaptationSession {
    /// Create a session around the initial plan.
    pub fn new(config: EngineConfig, initial_plan: Plan) -> TillerResult<Self> {
        config.validate()?;
        crate::strategy::structural_check(&initial_plan)?;
        Ok(Self {
            plan_store: PlanStore::new(initial_plan),
            context_store: ContextStore::new(config.clone())?,
            query: QueryEngine::new(config.clone())?,
            contradiction: ContradictionDetector,
            progress: ProgressAnomalyDetector::new(config.clone()),
            environmental: EnvironmentalChangeDetector::default(),
            strategy: StrategyEngine::new(config.clone()),
            repairer: CoherenceRepairer::new(&config),
            pending: Mutex::new(ObservationBatch::new()),
            skipped: Mutex::new(Vec::new()),
            audits: Mutex::new(Vec::new()),
            cycles_run: Mutex::new(0),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Queue raw observations for the next cycle. Malformed items are
    /// dropped with a logged detection error, never fatal; returns the
    /// number accepted.
    pub fn ingest(&self, raw: Vec<RawObservation>) -> TillerResult<usize> {
        let mut accepted = 0usize;
        let mut batch = self
            .pending
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        for item in raw {
            let kind = item.kind.clone();
            match Observation::try_from(item) {
                Ok(observation) => {
                    batch.observations.push(observation);
                    accepted += 1;
                }
                Err(err) => {
                    warn!(kind = %kind, %err, "observation dropped");
                    if let Ok(mut skipped) = self.skipped.lock() {
                        skipped.push(err.to_string());
                    }
                }
            }
        }
        Ok(accepted)
    }

    /// Queue a pre-computed external-state snapshot for the next cycle.
    pub fn observe_environment(&self, state: EnvironmentState) -> TillerResult<()> {
        let mut batch = self
            .pending
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        batch.environment = Some(state);
        Ok(())
    }

    // ------------------------------------------------------------------
    // The adaptation cycle
    // ------------------------------------------------------------------

    /// Run one adaptation cycle over the queued batch.
    ///
    /// Synchronous and bounded: detection, one mutation (with the
    /// structural retry ladder), capped repair, at most one escalation
    /// to Replacement. On fatal failure the last-good snapshots stay
    /// current and the error is surfaced to the orchestrator.
    pub fn run_cycle(&self) -> TillerResult<CycleOutcome> {
        let batch = self.take_pending()?;
        let skipped = self.take_skipped()?;
        let cycle = self.next_cycle_number()?;
        let mut trace = CycleTrace::new();

        if batch.is_empty() {
            self.record_audit(cycle, &[], None, trace, skipped, "idle: empty batch")?;
            return Ok(CycleOutcome::Idle);
        }

        trace.advance(CyclePhase::Detecting);
        let plan = self.plan_store.snapshot()?;
        let triggers = self.detect_all(&plan, &batch);

        if triggers.is_empty() {
            // Nothing to adapt; the batch still becomes context.
            trace.advance(CyclePhase::Stable);
            self.fold_observations(&batch)?;
            self.advance_environment(&batch);
            self.record_audit(cycle, &[], None, trace, skipped, "idle: no triggers")?;
            return Ok(CycleOutcome::Idle);
        }

        let Some((selected, primary)) = self.strategy.select(&triggers) else {
            return Ok(CycleOutcome::Idle);
        };
        trace.advance(CyclePhase::StrategySelected);

        // Mutation with the structural retry ladder: a strategy whose
        // candidate is structurally invalid is discarded and the next
        // one up tries.
        let mut attempt = selected;
        let candidate: Candidate = loop {
            match self
                .strategy
                .mutate(&plan, attempt, primary, &triggers, &self.plan_store.history()?)
            {
                Ok(candidate) => break candidate,
                Err(err) => {
                    warn!(strategy = %attempt, %err, "candidate discarded");
                    match attempt.escalated() {
                        Some(next) => {
                            trace.advance(CyclePhase::StrategySelected);
                            attempt = next;
                        }
                        None => {
                            self.record_audit(
                                cycle,
                                &triggers,
                                Some(attempt),
                                trace,
                                skipped,
                                "fatal: no viable strategy",
                            )?;
                            return Err(TillerError::Mutation(MutationError::NoViableStrategy));
                        }
                    }
                }
            }
        };
        trace.advance(CyclePhase::Mutated);
        trace.advance(CyclePhase::Validating);

        // Capped repair, then at most one escalation to Replacement.
        let (accepted_plan, strategy_used, transition_note) =
            match self.repairer.repair_until_coherent(&candidate.plan) {
                Ok(outcome) => {
                    for n in 1..=outcome.iterations {
                        trace.advance(CyclePhase::Repairing(n));
                        trace.advance(CyclePhase::Validating);
                    }
                    (outcome.plan, candidate.strategy, candidate.transition_note)
                }
                Err(CoherenceError::RepairExhausted {
                    remaining,
                    iterations,
                }) => {
                    for n in 1..=iterations {
                        trace.advance(CyclePhase::Repairing(n));
                        trace.advance(CyclePhase::Validating);
                    }
                    if candidate.strategy == StrategyKind::Replacement {
                        self.record_audit(
                            cycle,
                            &triggers,
                            Some(StrategyKind::Replacement),
                            trace,
                            skipped,
                            "fatal: replacement candidate incoherent",
                        )?;
                        return Err(TillerError::Mutation(MutationError::CandidateRejected {
                            strategy: StrategyKind::Replacement,
                            reason: format!("{} blocking issues after repair cap", remaining),
                        }));
                    }
                    trace.advance(CyclePhase::Replacing);
                    info!(
                        from = %candidate.strategy,
                        "repair exhausted; escalating to replacement"
                    );
                    let replacement = self.strategy.mutate(
                        &plan,
                        StrategyKind::Replacement,
                        primary,
                        &triggers,
                        &self.plan_store.history()?,
                    )?;
                    trace.advance(CyclePhase::Mutated);
                    trace.advance(CyclePhase::Validating);
                    match self.repairer.repair_until_coherent(&replacement.plan) {
                        Ok(outcome) => {
                            for n in 1..=outcome.iterations {
                                trace.advance(CyclePhase::Repairing(n));
                                trace.advance(CyclePhase::Validating);
                            }
                            (
                                outcome.plan,
                                StrategyKind::Replacement,
                                replacement.transition_note,
                            )
                        }
                        Err(CoherenceError::RepairExhausted { remaining, .. }) => {
                            self.record_audit(
                                cycle,
                                &triggers,
                                Some(StrategyKind::Replacement),
                                trace,
                                skipped,
                                "fatal: replacement candidate incoherent",
                            )?;
                            return Err(TillerError::Mutation(MutationError::CandidateRejected {
                                strategy: StrategyKind::Replacement,
                                reason: format!(
                                    "{} blocking issues after escalated repair",
                                    remaining
                                ),
                            }));
                        }
                    }
                }
            };
        trace.advance(CyclePhase::Accepted);

        let mut change = PlanChange::new(plan.version, accepted_plan.version, strategy_used)
            .with_trigger_labels(triggers.iter().map(|t| t.kind.label().to_string()).collect());
        if let Some(note) = transition_note {
            change = change.with_transition_note(note);
        }
        self.plan_store.publish(accepted_plan, change.clone())?;

        // Context adapter: same batch plus the accepted plan diff.
        self.fold_observations(&batch)?;
        let (layer, update) = update_for_plan_change(&change);
        self.context_store.update(layer, vec![update])?;
        self.advance_environment(&batch);

        trace.advance(CyclePhase::Stable);
        info!(
            cycle,
            strategy = %change.strategy,
            to_version = change.to_version,
            "adaptation cycle accepted"
        );
        self.record_audit(
            cycle,
            &triggers,
            Some(change.strategy),
            trace,
            skipped,
            "adapted",
        )?;
        Ok(CycleOutcome::Adapted(change))
    }

    // ------------------------------------------------------------------
    // Read-only surface
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current plan snapshot.
    pub fn plan(&self) -> TillerResult<Arc<Plan>> {
        self.plan_store.snapshot()
    }

    /// Current context snapshot.
    pub fn context(&self) -> TillerResult<Arc<ContextSnapshot>> {
        self.context_store.snapshot()
    }

    /// Read-only plan export for the hand-off collaborator.
    pub fn export_plan(&self) -> TillerResult<PlanExport> {
        self.plan_store.export()
    }

    /// Read-only context export for one layer.
    pub fn export_context(&self, layer: ContextLayer) -> TillerResult<Vec<ContextPiece>> {
        self.context_store.export(layer)
    }

    /// Keyword search over the context store.
    pub fn search(
        &self,
        query: &str,
        layers: &[ContextLayer],
        limit: usize,
    ) -> TillerResult<Vec<ContextPiece>> {
        Ok(self.query.search(&*self.context()?, query, layers, limit))
    }

    /// Budgeted relevance selection for one task.
    pub fn relevant_context(&self, task: &Task, max_size: i64) -> TillerResult<RelevantContext> {
        Ok(self.query.relevant_context(&*self.context()?, task, max_size))
    }

    /// The plan-change feed.
    pub fn changes(&self) -> TillerResult<Vec<PlanChange>> {
        self.plan_store.changes()
    }

    /// Retained plan versions.
    pub fn plan_history(&self) -> TillerResult<Vec<Arc<Plan>>> {
        self.plan_store.history()
    }

    /// Audit log, one entry per completed `run_cycle` call.
    pub fn audits(&self) -> TillerResult<Vec<CycleAudit>> {
        Ok(self
            .audits
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .clone())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn detect_all(&self, plan: &Plan, batch: &ObservationBatch) -> Vec<AdaptationTrigger> {
        let mut triggers = Vec::new();
        triggers.extend(self.contradiction.detect(plan, batch));
        triggers.extend(self.progress.detect(plan, batch));
        triggers.extend(self.environmental.detect(plan, batch));
        triggers
    }

    /// Fold the batch into the context store, one update call per layer.
    fn fold_observations(&self, batch: &ObservationBatch) -> TillerResult<()> {
        let mut by_layer: BTreeMap<ContextLayer, Vec<ContextUpdate>> = BTreeMap::new();
        for observation in &batch.observations {
            for (layer, update) in updates_for_observation(observation) {
                by_layer.entry(layer).or_default().push(update);
            }
        }
        for (layer, updates) in by_layer {
            self.context_store.update(layer, updates)?;
        }
        Ok(())
    }

    fn advance_environment(&self, batch: &ObservationBatch) {
        if let Some(state) = &batch.environment {
            self.environmental.advance_baseline(state.clone());
        }
    }

    fn take_pending(&self) -> TillerResult<ObservationBatch> {
        let mut guard = self
            .pending
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        Ok(std::mem::take(&mut *guard))
    }

    fn take_skipped(&self) -> TillerResult<Vec<String>> {
        let mut guard = self
            .skipped
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        Ok(std::mem::take(&mut *guard))
    }

    fn next_cycle_number(&self) -> TillerResult<u64> {
        let mut guard = self
            .cycles_run
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        *guard += 1;
        Ok(*guard)
    }

    fn record_audit(
        &self,
        cycle: u64,
        triggers: &[AdaptationTrigger],
        strategy: Option<StrategyKind>,
        trace: CycleTrace,
        skipped: Vec<String>,
        outcome: &str,
    ) -> TillerResult<()> {
        let audit = CycleAudit {
            cycle,
            trigger_labels: triggers.iter().map(|t| t.kind.label().to_string()).collect(),
            strategy,
            phases: trace.phases().to_vec(),
            skipped_observations: skipped,
            outcome: outcome.to_string(),
            occurred_at: chrono::Utc::now(),
        };
        self.audits
            .lock()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?
            .push(audit);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::{Goal, TaskId};

    fn chain_session() -> (AdaptationSession, TaskId, TaskId, TaskId) {
        let a = Task::new("set up project");
        let ida = a.task_id;
        let b = Task::new("build login form").with_depends_on(vec![ida]);
        let idb = b.task_id;
        let c = Task::new("release to users").with_depends_on(vec![idb]);
        let idc = c.task_id;
        let goal = Goal::new("login shipped").with_satisfied_by(vec![idc]);
        let plan = Plan::new(goal)
            .with_task(a)
            .with_task(b)
            .with_task(c)
            .with_dependency(ida, idb)
            .with_dependency(idb, idc);
        let session = AdaptationSession::new(EngineConfig::default_session(), plan).unwrap();
        (session, ida, idb, idc)
    }

    #[test]
    fn test_empty_cycle_is_idle() {
        let (session, _, _, _) = chain_session();
        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Idle);
        assert_eq!(session.plan().unwrap().version, 1);
    }

    #[test]
    fn test_malformed_observation_skipped_not_fatal() {
        let (session, _, _, _) = chain_session();
        let accepted = session
            .ingest(vec![
                RawObservation::new("telemetry_ping", serde_json::json!({})),
                RawObservation::new("file_deleted", serde_json::json!({"path": "old.rs"})),
            ])
            .unwrap();
        assert_eq!(accepted, 1);

        let outcome = session.run_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Idle);
        let audits = session.audits().unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].skipped_observations.len(), 1);
    }

    #[test]
    fn test_observations_without_triggers_still_become_context() {
        let (session, _, _, _) = chain_session();
        session
            .ingest(vec![RawObservation::new(
                "config_changed",
                serde_json::json!({"key": "RUST_LOG", "value": "debug"}),
            )])
            .unwrap();
        session.run_cycle().unwrap();

        let context = session.context().unwrap();
        assert!(context
            .find(ContextLayer::Technical, "config:RUST_LOG")
            .is_some());
    }

    #[test]
    fn test_velocity_anomaly_adapts_by_refinement() {
        let (session, _, _, _) = chain_session();
        session
            .ingest(vec![RawObservation::new(
                "progress_report",
                serde_json::json!({"expected_rate": 2.0, "actual_rate": 1.0}),
            )])
            .unwrap();

        let outcome = session.run_cycle().unwrap();
        match outcome {
            CycleOutcome::Adapted(change) => {
                assert_eq!(change.strategy, StrategyKind::Refinement);
                assert_eq!(change.to_version, 2);
            }
            other => panic!("expected adaptation, got {:?}", other),
        }
        // Refinement invariance: same tasks, same edges.
        let plan = session.plan().unwrap();
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.dependencies.len(), 2);
    }

    #[test]
    fn test_queued_batch_folds_into_next_cycle() {
        let (session, _, _, _) = chain_session();
        session
            .ingest(vec![RawObservation::new(
                "progress_report",
                serde_json::json!({"expected_rate": 2.0, "actual_rate": 1.0}),
            )])
            .unwrap();
        // A second ingest before the cycle runs lands in the same batch.
        session
            .ingest(vec![RawObservation::new(
                "config_changed",
                serde_json::json!({"key": "CI", "value": "true"}),
            )])
            .unwrap();

        session.run_cycle().unwrap();
        // Both were consumed: the next cycle has nothing pending.
        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Idle);
    }

    #[test]
    fn test_plan_change_recorded_in_context_and_feed() {
        let (session, _, _, _) = chain_session();
        session
            .ingest(vec![RawObservation::new(
                "progress_report",
                serde_json::json!({"expected_rate": 2.0, "actual_rate": 1.0}),
            )])
            .unwrap();
        session.run_cycle().unwrap();

        let changes = session.changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0]
            .trigger_labels
            .contains(&"velocity_anomaly".to_string()));

        let context = session.context().unwrap();
        let recorded = context
            .find(ContextLayer::Project, "plan:current")
            .expect("plan change in project layer");
        assert_eq!(recorded.value["to_version"], serde_json::json!(2));
    }

    #[test]
    fn test_audit_trail_grows_per_cycle() {
        let (session, _, _, _) = chain_session();
        session.run_cycle().unwrap();
        session.run_cycle().unwrap();
        let audits = session.audits().unwrap();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].cycle, 1);
        assert_eq!(audits[1].cycle, 2);
    }
}
