//! Plan entity structures
//!
//! A plan is an immutable snapshot: tasks live in a flat id-indexed map
//! and dependencies are (from, to) id pairs, never object references.
//! Mutation always produces a new snapshot with a bumped version.

use crate::{
    new_entity_id, AssumptionId, ConstraintId, GoalId, PlanId, TaskId, TaskStatus, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Goal - an outcome the plan exists to achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: GoalId,
    pub description: String,
    /// Tasks whose completion satisfies this goal.
    pub satisfied_by: Vec<TaskId>,
    pub achieved: bool,
}

impl Goal {
    /// Create a new unachieved goal.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            goal_id: new_entity_id(),
            description: description.into(),
            satisfied_by: Vec::new(),
            achieved: false,
        }
    }

    /// Set the satisfying tasks.
    pub fn with_satisfied_by(mut self, tasks: Vec<TaskId>) -> Self {
        self.satisfied_by = tasks;
        self
    }
}

/// Task - a unit of plannable work, owned exclusively by its plan version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub description: String,
    /// Free-form execution parameters (resource assignment, ordering hints,
    /// declared capabilities).
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub status: TaskStatus,
    /// Dependencies this task declares, in order. The plan's edge set is
    /// expected to contain one edge per entry; a declared id missing from
    /// the edge set is a coherence issue.
    pub depends_on: Vec<TaskId>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            task_id: new_entity_id(),
            description: description.into(),
            parameters: BTreeMap::new(),
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
        }
    }

    /// Set a single parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the declared dependency list.
    pub fn with_depends_on(mut self, deps: Vec<TaskId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// The resource this task is assigned to, if any.
    pub fn resource(&self) -> Option<&str> {
        self.parameters.get("resource").and_then(|v| v.as_str())
    }

    /// Units of its resource this task consumes (defaults to 1 when assigned).
    pub fn resource_units(&self) -> i64 {
        self.parameters
            .get("resource_units")
            .and_then(|v| v.as_i64())
            .unwrap_or(1)
    }

    /// Requirement labels this task declares it covers.
    pub fn provides(&self) -> Vec<&str> {
        match self.parameters.get("provides") {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Dependency edge between two tasks: `from` must complete before `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    pub from: TaskId,
    pub to: TaskId,
}

impl Dependency {
    pub fn new(from: TaskId, to: TaskId) -> Self {
        Self { from, to }
    }
}

/// Assumption the plan was built on. Observations can invalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub assumption_id: AssumptionId,
    /// Subject the assumption is about (a file, a service, a requirement).
    pub subject: String,
    pub statement: String,
    pub invalidated: bool,
}

impl Assumption {
    pub fn new(subject: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            assumption_id: new_entity_id(),
            subject: subject.into(),
            statement: statement.into(),
            invalidated: false,
        }
    }
}

/// Kind of a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// The subject is required by the plan.
    Requires,
    /// The subject must not be used or produced.
    Forbids,
    /// The subject is a resource with a hard capacity.
    Capacity { limit: i64 },
}

/// Constraint the plan must hold to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub constraint_id: ConstraintId,
    /// Subject the constraint applies to.
    pub subject: String,
    pub kind: ConstraintKind,
    pub detail: Option<String>,
}

impl Constraint {
    pub fn new(subject: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            constraint_id: new_entity_id(),
            subject: subject.into(),
            kind,
            detail: None,
        }
    }

    /// Set the human-readable detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Per-task execution summary derived from the task map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionState {
    pub statuses: BTreeMap<TaskId, TaskStatus>,
    pub pending: usize,
    pub active: usize,
    pub blocked: usize,
    pub completed: usize,
}

/// Plan - versioned set of goals, tasks, dependencies, assumptions, and
/// constraints. Snapshots are immutable once published; each accepted
/// adaptation cycle produces a new version and old versions are retained
/// for lessons-learned extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    /// Monotonic version, starting at 1 for the session's initial plan.
    pub version: u64,
    pub goals: Vec<Goal>,
    pub tasks: BTreeMap<TaskId, Task>,
    pub dependencies: BTreeSet<Dependency>,
    pub assumptions: Vec<Assumption>,
    pub constraints: Vec<Constraint>,
    /// When a task entered Blocked, for patience-window detection.
    pub blocked_since: BTreeMap<TaskId, Timestamp>,
    pub created_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

impl Plan {
    /// Create the session's initial plan (version 1) from a single goal.
    pub fn new(goal: Goal) -> Self {
        Self {
            plan_id: new_entity_id(),
            version: 1,
            goals: vec![goal],
            tasks: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            assumptions: Vec::new(),
            constraints: Vec::new(),
            blocked_since: BTreeMap::new(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Add a task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.insert(task.task_id, task);
        self
    }

    /// Add a dependency edge.
    pub fn with_dependency(mut self, from: TaskId, to: TaskId) -> Self {
        self.dependencies.insert(Dependency::new(from, to));
        self
    }

    /// Add an assumption.
    pub fn with_assumption(mut self, assumption: Assumption) -> Self {
        self.assumptions.push(assumption);
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Look up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All task ids in the plan.
    pub fn task_ids(&self) -> BTreeSet<TaskId> {
        self.tasks.keys().copied().collect()
    }

    /// Whether an edge exists.
    pub fn has_edge(&self, from: TaskId, to: TaskId) -> bool {
        self.dependencies.contains(&Dependency::new(from, to))
    }

    /// Edges whose `from` is the given task.
    pub fn edges_from(&self, from: TaskId) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(move |d| d.from == from)
    }

    /// Edges whose `to` is the given task.
    pub fn edges_to(&self, to: TaskId) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(move |d| d.to == to)
    }

    /// Task ids in the given status.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.task_id)
            .collect()
    }

    /// Derive the per-task execution summary.
    pub fn execution_state(&self) -> ExecutionState {
        let mut state = ExecutionState::default();
        for task in self.tasks.values() {
            state.statuses.insert(task.task_id, task.status);
            match task.status {
                TaskStatus::Pending => state.pending += 1,
                TaskStatus::Active => state.active += 1,
                TaskStatus::Blocked => state.blocked += 1,
                TaskStatus::Completed => state.completed += 1,
            }
        }
        state
    }

    /// Task ids named by any goal's `satisfied_by`.
    pub fn goal_tasks(&self) -> BTreeSet<TaskId> {
        self.goals
            .iter()
            .flat_map(|g| g.satisfied_by.iter().copied())
            .collect()
    }

    /// Total units assigned per resource across all non-completed tasks.
    pub fn resource_assignments(&self) -> BTreeMap<String, i64> {
        let mut assignments: BTreeMap<String, i64> = BTreeMap::new();
        for task in self.tasks.values() {
            if task.status == TaskStatus::Completed {
                continue;
            }
            if let Some(resource) = task.resource() {
                *assignments.entry(resource.to_string()).or_insert(0) += task.resource_units();
            }
        }
        assignments
    }

    /// Whether the plan covers a requirement: an explicit Requires
    /// constraint, a task declaring it via `provides`, or a task whose
    /// description names it.
    pub fn covers_requirement(&self, requirement: &str) -> bool {
        let needle = requirement.to_lowercase();
        let explicit = self.constraints.iter().any(|c| {
            matches!(c.kind, crate::ConstraintKind::Requires) && c.subject.to_lowercase() == needle
        });
        if explicit {
            return true;
        }
        self.tasks.values().any(|t| {
            t.provides().iter().any(|p| p.to_lowercase() == needle)
                || t.description.to_lowercase().contains(&needle)
        })
    }

    /// Build the successor snapshot: same identity, next version, fresh
    /// creation time. Content edits happen on the returned value before
    /// it is validated and published.
    pub fn next_version(&self) -> Plan {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.created_at = Utc::now();
        next
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_plan() -> (Plan, TaskId, TaskId, TaskId) {
        let a = Task::new("design schema");
        let b = Task::new("implement storage");
        let c = Task::new("wire up queries");
        let (ida, idb, idc) = (a.task_id, b.task_id, c.task_id);
        let goal = Goal::new("working storage layer").with_satisfied_by(vec![idc]);
        let plan = Plan::new(goal)
            .with_task(a)
            .with_task(b)
            .with_task(c)
            .with_dependency(ida, idb)
            .with_dependency(idb, idc);
        (plan, ida, idb, idc)
    }

    #[test]
    fn test_initial_plan_is_version_one() {
        let plan = Plan::new(Goal::new("ship it"));
        assert_eq!(plan.version, 1);
    }

    #[test]
    fn test_next_version_is_monotonic() {
        let (plan, _, _, _) = chain_plan();
        let next = plan.next_version();
        assert_eq!(next.version, plan.version + 1);
        assert_eq!(next.plan_id, plan.plan_id);
        // The original snapshot is untouched.
        assert_eq!(plan.version, 1);
    }

    #[test]
    fn test_edge_lookup() {
        let (plan, a, b, c) = chain_plan();
        assert!(plan.has_edge(a, b));
        assert!(plan.has_edge(b, c));
        assert!(!plan.has_edge(a, c));
        assert_eq!(plan.edges_from(a).count(), 1);
        assert_eq!(plan.edges_to(c).count(), 1);
    }

    #[test]
    fn test_execution_state_counts() {
        let (mut plan, a, _, _) = chain_plan();
        if let Some(task) = plan.tasks.get_mut(&a) {
            task.status = TaskStatus::Completed;
        }
        let state = plan.execution_state();
        assert_eq!(state.completed, 1);
        assert_eq!(state.pending, 2);
        assert_eq!(state.statuses.len(), 3);
    }

    #[test]
    fn test_resource_assignments_skip_completed() {
        let t1 = Task::new("load data")
            .with_parameter("resource", serde_json::json!("worker"))
            .with_parameter("resource_units", serde_json::json!(2));
        let t2 = Task::new("verify data")
            .with_parameter("resource", serde_json::json!("worker"))
            .with_status(TaskStatus::Completed);
        let plan = Plan::new(Goal::new("data ready"))
            .with_task(t1)
            .with_task(t2);
        let assignments = plan.resource_assignments();
        assert_eq!(assignments.get("worker"), Some(&2));
    }

    #[test]
    fn test_covers_requirement_via_constraint() {
        let plan = Plan::new(Goal::new("secure api"))
            .with_constraint(Constraint::new("oauth", ConstraintKind::Requires));
        assert!(plan.covers_requirement("OAuth"));
        assert!(!plan.covers_requirement("saml"));
    }

    #[test]
    fn test_covers_requirement_via_provides_parameter() {
        let task = Task::new("add login flow")
            .with_parameter("provides", serde_json::json!(["session-auth"]));
        let plan = Plan::new(Goal::new("secure api")).with_task(task);
        assert!(plan.covers_requirement("session-auth"));
    }

    #[test]
    fn test_covers_requirement_via_description() {
        let plan = Plan::new(Goal::new("secure api")).with_task(Task::new("integrate OAuth flow"));
        assert!(plan.covers_requirement("oauth"));
    }

    #[test]
    fn test_goal_tasks_collects_all_goals() {
        let (mut plan, a, _, c) = chain_plan();
        plan.goals
            .push(Goal::new("schema designed").with_satisfied_by(vec![a]));
        let goal_tasks = plan.goal_tasks();
        assert!(goal_tasks.contains(&a));
        assert!(goal_tasks.contains(&c));
        assert_eq!(goal_tasks.len(), 2);
    }
}
