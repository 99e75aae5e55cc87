//! Adaptation strategy engine
//!
//! Selects one of Refinement / Restructuring / Replacement for the
//! cycle's triggers and produces a candidate plan. Candidates never
//! touch the plan store directly - they pass through coherence
//! validation first.

use std::collections::BTreeSet;
use std::sync::Arc;
use tiller_core::{
    AdaptationTrigger, Constraint, ConstraintKind, EngineConfig, Goal, LessonsLearned,
    MutationError, Plan, RefinementAction, StrategyKind, Task, TaskId, TaskStatus, TransitionNote,
    TriggerKind,
};
use tracing::{debug, info};

/// A candidate plan produced by one strategy, pending validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub plan: Plan,
    pub strategy: StrategyKind,
    /// Concrete refinement actions taken (empty for other strategies).
    pub actions: Vec<RefinementAction>,
    /// Present exactly when the strategy is Replacement.
    pub transition_note: Option<TransitionNote>,
}

/// Structural sanity of a candidate, checked before coherence
/// validation. Violations mean the mutator itself misbehaved.
pub fn structural_check(plan: &Plan) -> Result<(), MutationError> {
    for edge in &plan.dependencies {
        if !plan.tasks.contains_key(&edge.from) || !plan.tasks.contains_key(&edge.to) {
            return Err(MutationError::EdgeEndpointMissing {
                from: edge.from,
                to: edge.to,
            });
        }
    }
    for task in plan.tasks.values() {
        for dep in &task.depends_on {
            if !plan.tasks.contains_key(dep) {
                return Err(MutationError::UnknownTask { task_id: *dep });
            }
        }
    }
    Ok(())
}

/// The strategy engine. Selection is deterministic and total-ordered:
/// highest trigger severity first, and among equally severe triggers
/// the fixed priority Replacement > Restructuring > Refinement.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    config: EngineConfig,
}

impl StrategyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Pick the strategy and the primary trigger for this cycle.
    /// Returns None when there are no triggers.
    pub fn select<'a>(
        &self,
        triggers: &'a [AdaptationTrigger],
    ) -> Option<(StrategyKind, &'a AdaptationTrigger)> {
        let top_severity = triggers.iter().map(|t| t.severity).max()?;
        let primary = triggers
            .iter()
            .filter(|t| t.severity == top_severity)
            .max_by_key(|t| t.kind.implied_strategy().priority())?;
        let strategy = primary.kind.implied_strategy();
        debug!(
            %strategy,
            trigger = primary.kind.label(),
            severity = %primary.severity,
            "strategy selected"
        );
        Some((strategy, primary))
    }

    /// Produce a candidate plan with the given strategy.
    pub fn mutate(
        &self,
        plan: &Plan,
        strategy: StrategyKind,
        primary: &AdaptationTrigger,
        triggers: &[AdaptationTrigger],
        history: &[Arc<Plan>],
    ) -> Result<Candidate, MutationError> {
        let candidate = match strategy {
            StrategyKind::Refinement => self.refine(plan, primary),
            StrategyKind::Restructuring => self.restructure(plan, primary)?,
            StrategyKind::Replacement => self.replace(plan, triggers, history)?,
        };
        structural_check(&candidate.plan)?;
        Ok(candidate)
    }

    // ------------------------------------------------------------------
    // Refinement
    // ------------------------------------------------------------------

    /// Adjust parameters or ordering only. The task set and edge set
    /// are untouched by construction.
    fn refine(&self, plan: &Plan, primary: &AdaptationTrigger) -> Candidate {
        let mut next = plan.next_version();
        let mut actions = Vec::new();

        match &primary.kind {
            TriggerKind::VelocityAnomaly { actual_rate, .. } => {
                // Recalibrate pacing on all remaining work.
                for task in next.tasks.values_mut() {
                    if task.status != TaskStatus::Completed {
                        task.parameters.insert(
                            "pace_per_hour".to_string(),
                            serde_json::json!(actual_rate),
                        );
                    }
                }
                actions.push(RefinementAction::ParameterAdjustment);
            }
            TriggerKind::ComplexityAnomaly {
                task_id, observed, ..
            } => {
                if let Some(task) = next.tasks.get_mut(task_id) {
                    task.parameters
                        .insert("complexity".to_string(), serde_json::json!(observed));
                }
                actions.push(RefinementAction::ParameterAdjustment);
            }
            _ => {
                // Fall back to re-deriving execution order hints.
                for (position, id) in topological_order(&next).into_iter().enumerate() {
                    if let Some(task) = next.tasks.get_mut(&id) {
                        task.parameters
                            .insert("order".to_string(), serde_json::json!(position));
                    }
                }
                actions.push(RefinementAction::TaskReordering);
            }
        }

        Candidate {
            plan: next,
            strategy: StrategyKind::Refinement,
            actions,
            transition_note: None,
        }
    }

    // ------------------------------------------------------------------
    // Restructuring
    // ------------------------------------------------------------------

    /// Rebuild only the impacted sub-structure; everything outside the
    /// impact set is preserved verbatim and the goal set never changes.
    fn restructure(
        &self,
        plan: &Plan,
        primary: &AdaptationTrigger,
    ) -> Result<Candidate, MutationError> {
        let mut next = plan.next_version();

        match &primary.kind {
            TriggerKind::RequirementConflict { requirement, .. } => {
                let anchor = goal_anchor(plan).ok_or(MutationError::CandidateRejected {
                    strategy: StrategyKind::Restructuring,
                    reason: "no goal task to anchor the new requirement".to_string(),
                })?;
                let inserted = Task::new(format!("Integrate {}", requirement))
                    .with_parameter("provides", serde_json::json!([requirement]));
                insert_before(&mut next, inserted, anchor);
                next.constraints
                    .push(Constraint::new(requirement.clone(), ConstraintKind::Requires));
            }
            TriggerKind::DependencyAnomaly {
                blocked_dependency, ..
            } => {
                let blocked_desc = plan
                    .task(*blocked_dependency)
                    .map(|t| t.description.clone())
                    .ok_or(MutationError::UnknownTask {
                        task_id: *blocked_dependency,
                    })?;
                let unblock = Task::new(format!("Unblock: {}", blocked_desc));
                let unblock_id = unblock.task_id;
                next.tasks.insert(unblock_id, unblock);
                next.dependencies
                    .insert(tiller_core::Dependency::new(unblock_id, *blocked_dependency));
                if let Some(task) = next.tasks.get_mut(blocked_dependency) {
                    task.depends_on.push(unblock_id);
                    task.status = TaskStatus::Pending;
                }
                next.blocked_since.remove(blocked_dependency);
            }
            TriggerKind::EnvironmentChange { changes } => {
                let impacted: Vec<TaskId> = next
                    .tasks
                    .values()
                    .filter(|t| {
                        t.status != TaskStatus::Completed
                            && changes.iter().any(|c| {
                                t.description
                                    .to_lowercase()
                                    .contains(&c.subject.to_lowercase())
                            })
                    })
                    .map(|t| t.task_id)
                    .collect();
                let reconcile = Task::new("Reconcile environment drift");
                let reconcile_id = reconcile.task_id;
                next.tasks.insert(reconcile_id, reconcile);
                if impacted.is_empty() {
                    if let Some(anchor) = goal_anchor(&next) {
                        next.dependencies
                            .insert(tiller_core::Dependency::new(reconcile_id, anchor));
                        if let Some(task) = next.tasks.get_mut(&anchor) {
                            task.depends_on.push(reconcile_id);
                        }
                    }
                } else {
                    for task_id in impacted {
                        next.dependencies
                            .insert(tiller_core::Dependency::new(reconcile_id, task_id));
                        if let Some(task) = next.tasks.get_mut(&task_id) {
                            task.depends_on.push(reconcile_id);
                        }
                    }
                }
            }
            _ => {
                // Generic impact review ahead of the goal.
                let anchor = goal_anchor(plan).ok_or(MutationError::CandidateRejected {
                    strategy: StrategyKind::Restructuring,
                    reason: "no goal task to anchor the review".to_string(),
                })?;
                let review = Task::new(format!("Review plan after {}", primary.kind.label()));
                insert_before(&mut next, review, anchor);
            }
        }

        Ok(Candidate {
            plan: next,
            strategy: StrategyKind::Restructuring,
            actions: Vec::new(),
            transition_note: None,
        })
    }

    // ------------------------------------------------------------------
    // Replacement
    // ------------------------------------------------------------------

    /// Generate candidate plans from lessons learned, score them, and
    /// keep the best. Allowed to change the goal set. Always carries a
    /// transition note describing preserved vs. discarded work.
    fn replace(
        &self,
        plan: &Plan,
        triggers: &[AdaptationTrigger],
        history: &[Arc<Plan>],
    ) -> Result<Candidate, MutationError> {
        let lessons = extract_lessons(plan, triggers, history);
        let requirements = required_subjects(plan, triggers);
        let violated: BTreeSet<_> = triggers
            .iter()
            .filter_map(|t| match &t.kind {
                TriggerKind::ConstraintViolation { constraint_id, .. } => Some(*constraint_id),
                _ => None,
            })
            .collect();

        let mut best: Option<(i64, Plan)> = None;
        for depth in 1..=self.config.max_replacement_candidates {
            let candidate = self.build_replacement(plan, &lessons, &requirements, &violated, depth);
            let score = score_candidate(&candidate, &lessons, &requirements, depth);
            debug!(depth, score, "replacement candidate scored");
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }
        let (_, new_plan) = best.ok_or(MutationError::CandidateRejected {
            strategy: StrategyKind::Replacement,
            reason: "no replacement candidate generated".to_string(),
        })?;

        let preserved: Vec<TaskId> = new_plan
            .tasks
            .keys()
            .filter(|id| plan.tasks.contains_key(*id))
            .copied()
            .collect();
        let discarded: Vec<TaskId> = plan
            .tasks
            .keys()
            .filter(|id| !new_plan.tasks.contains_key(*id))
            .copied()
            .collect();
        let note = TransitionNote {
            summary: format!(
                "replaced plan v{}: {} tasks preserved, {} discarded, {} lessons applied",
                plan.version,
                preserved.len(),
                discarded.len(),
                lessons.invalidated_assumptions.len() + lessons.failed_approaches.len(),
            ),
            preserved_tasks: preserved,
            discarded_tasks: discarded,
        };

        info!(
            to_version = new_plan.version,
            preserved = note.preserved_tasks.len(),
            discarded = note.discarded_tasks.len(),
            "replacement candidate selected"
        );
        Ok(Candidate {
            plan: new_plan,
            strategy: StrategyKind::Replacement,
            actions: Vec::new(),
            transition_note: Some(note),
        })
    }

    /// Build one replacement candidate with `depth` tasks per goal.
    fn build_replacement(
        &self,
        plan: &Plan,
        lessons: &LessonsLearned,
        requirements: &BTreeSet<String>,
        violated: &BTreeSet<tiller_core::ConstraintId>,
        depth: usize,
    ) -> Plan {
        let mut next = plan.next_version();

        // Completed work is preserved; everything else is rebuilt.
        next.tasks.retain(|_, t| t.status == TaskStatus::Completed);
        next.dependencies.clear();
        for task in next.tasks.values_mut() {
            task.depends_on.clear();
        }
        next.blocked_since.clear();

        // Assumptions that observations invalidated do not carry over.
        next.assumptions.retain(|a| {
            !a.invalidated
                && !lessons
                    .invalidated_assumptions
                    .iter()
                    .any(|s| s == &a.statement)
        });
        // Violated constraints are dropped with the outgoing plan.
        next.constraints
            .retain(|c| !violated.contains(&c.constraint_id));

        // The goal set may change: uncovered requirements become goals.
        for requirement in requirements {
            let already = next.goals.iter().any(|g| {
                g.description
                    .to_lowercase()
                    .contains(&requirement.to_lowercase())
            });
            if !already {
                next.goals.push(Goal::new(format!("Satisfy requirement: {}", requirement)));
            }
        }

        // Fresh task chains per unachieved goal.
        let phases: [&str; 3] = ["Prepare", "Carry out", "Verify"];
        let goals = next.goals.clone();
        for goal in goals.iter().filter(|g| !g.achieved) {
            let mut previous: Option<TaskId> = None;
            let mut last = None;
            for phase in phases.iter().take(depth.clamp(1, phases.len())) {
                let mut task = Task::new(format!("{}: {}", phase, goal.description));
                if let Some(prev) = previous {
                    task.depends_on.push(prev);
                }
                let id = task.task_id;
                next.tasks.insert(id, task);
                if let Some(prev) = previous {
                    next.dependencies.insert(tiller_core::Dependency::new(prev, id));
                }
                previous = Some(id);
                last = Some(id);
            }
            if let (Some(last), Some(goal)) = (
                last,
                next.goals.iter_mut().find(|g| g.goal_id == goal.goal_id),
            ) {
                goal.satisfied_by = vec![last];
            }
        }

        next
    }
}

/// Deterministic trigger ranking helper: extract lessons from the
/// outgoing plan and its retained history.
pub fn extract_lessons(
    plan: &Plan,
    triggers: &[AdaptationTrigger],
    history: &[Arc<Plan>],
) -> LessonsLearned {
    let mut lessons = LessonsLearned::default();

    for assumption in &plan.assumptions {
        if assumption.invalidated {
            lessons.invalidated_assumptions.push(assumption.statement.clone());
        }
    }
    for trigger in triggers {
        match &trigger.kind {
            TriggerKind::AssumptionViolation { assumption_id, .. } => {
                if let Some(a) = plan
                    .assumptions
                    .iter()
                    .find(|a| a.assumption_id == *assumption_id)
                {
                    if !lessons.invalidated_assumptions.contains(&a.statement) {
                        lessons.invalidated_assumptions.push(a.statement.clone());
                    }
                }
            }
            TriggerKind::ConstraintViolation { discovered, .. } => {
                lessons.discovered_constraints.push(discovered.clone());
            }
            _ => {}
        }
    }

    for task in plan.tasks.values() {
        match task.status {
            TaskStatus::Blocked => lessons.failed_approaches.push(task.description.clone()),
            TaskStatus::Completed => lessons.successful_patterns.push(task.description.clone()),
            _ => {}
        }
    }
    for old in history {
        for task in old.tasks.values() {
            if task.status == TaskStatus::Completed
                && !lessons.successful_patterns.contains(&task.description)
            {
                lessons.successful_patterns.push(task.description.clone());
            }
        }
    }

    lessons
}

/// Requirements the replacement must cover: trigger-borne plus the
/// plan's existing Requires constraints.
fn required_subjects(plan: &Plan, triggers: &[AdaptationTrigger]) -> BTreeSet<String> {
    let mut subjects: BTreeSet<String> = triggers
        .iter()
        .filter_map(|t| match &t.kind {
            TriggerKind::RequirementConflict { requirement, .. } => Some(requirement.clone()),
            _ => None,
        })
        .collect();
    for constraint in &plan.constraints {
        if matches!(constraint.kind, ConstraintKind::Requires) {
            subjects.insert(constraint.subject.clone());
        }
    }
    subjects
}

/// Score a replacement candidate: requirement coverage and goal
/// satisfiability dominate; decomposition depth is preferred when past
/// approaches failed, brevity otherwise; echoing a failed approach is
/// penalized.
fn score_candidate(
    candidate: &Plan,
    lessons: &LessonsLearned,
    requirements: &BTreeSet<String>,
    depth: usize,
) -> i64 {
    let covered = requirements
        .iter()
        .filter(|r| candidate.covers_requirement(r))
        .count() as i64;
    let satisfiable_goals = candidate
        .goals
        .iter()
        .filter(|g| g.satisfied_by.iter().any(|id| candidate.tasks.contains_key(id)))
        .count() as i64;
    let echoes = candidate
        .tasks
        .values()
        .filter(|t| {
            lessons
                .failed_approaches
                .iter()
                .any(|f| t.description.eq_ignore_ascii_case(f))
        })
        .count() as i64;
    let depth_bonus = if lessons.failed_approaches.is_empty() {
        3 - depth as i64
    } else {
        depth as i64
    };

    covered * 10 + satisfiable_goals * 5 + depth_bonus - echoes * 7
}

/// First goal task present in the task map.
fn goal_anchor(plan: &Plan) -> Option<TaskId> {
    plan.goals
        .iter()
        .flat_map(|g| g.satisfied_by.iter())
        .find(|id| plan.tasks.contains_key(*id))
        .copied()
}

/// Insert `task` immediately before `anchor`: the anchor's first
/// predecessor (if any) now feeds the new task instead.
fn insert_before(plan: &mut Plan, task: Task, anchor: TaskId) {
    let inserted_id = task.task_id;
    let predecessor = plan.edges_to(anchor).next().map(|e| e.from);

    let mut task = task;
    if let Some(pred) = predecessor {
        plan.dependencies.remove(&tiller_core::Dependency::new(pred, anchor));
        plan.dependencies.insert(tiller_core::Dependency::new(pred, inserted_id));
        task.depends_on.push(pred);
        if let Some(anchor_task) = plan.tasks.get_mut(&anchor) {
            anchor_task.depends_on.retain(|id| *id != pred);
        }
    }
    plan.dependencies.insert(tiller_core::Dependency::new(inserted_id, anchor));
    if let Some(anchor_task) = plan.tasks.get_mut(&anchor) {
        anchor_task.depends_on.push(inserted_id);
    }
    plan.tasks.insert(inserted_id, task);
}

/// Kahn topological order; tasks in a cycle fall to the end in id order.
fn topological_order(plan: &Plan) -> Vec<TaskId> {
    use std::collections::{BTreeMap, VecDeque};
    let mut in_degree: BTreeMap<TaskId, usize> =
        plan.tasks.keys().map(|id| (*id, 0)).collect();
    for edge in &plan.dependencies {
        if let Some(d) = in_degree.get_mut(&edge.to) {
            *d += 1;
        }
    }
    let mut queue: VecDeque<TaskId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(plan.tasks.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for edge in plan.edges_from(id) {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.to);
                }
            }
        }
    }
    for id in plan.tasks.keys() {
        if !order.contains(id) {
            order.push(*id);
        }
    }
    order
}

// ============================================================================
// TESTS
// ============================================================================
