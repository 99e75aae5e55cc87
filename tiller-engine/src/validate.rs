//! Coherence validator
//!
//! Pure checks over a candidate plan: logical consistency (cycles,
//! constraint conflicts, impossible goals), dependency coherence,
//! resource coherence, and goal alignment. The score is diagnostic;
//! acceptance is decided solely by the blocking-issue count.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tiller_core::{
    CoherenceIssue, CoherenceIssueKind, CoherenceReport, ConstraintKind, Plan, Severity, TaskId,
    TaskStatus,
};
use tracing::debug;

/// Validate a candidate plan and report every coherence issue found.
pub fn validate(plan: &Plan) -> CoherenceReport {
    let mut issues = Vec::new();
    let mut checks_run = 0usize;
    let adjacency = adjacency_map(plan);

    // --- Logical consistency: cycle detection (three-color DFS). ---
    checks_run += 1;
    for cycle in find_cycles(plan, &adjacency) {
        let path = cycle
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        issues.push(CoherenceIssue::new(
            CoherenceIssueKind::CircularDependency { cycle },
            Severity::Critical,
            format!("dependency cycle: {}", path),
        ));
    }

    // --- Logical consistency: constraint pairs that cannot both hold. ---
    for i in 0..plan.constraints.len() {
        for j in (i + 1)..plan.constraints.len() {
            checks_run += 1;
            let (a, b) = (&plan.constraints[i], &plan.constraints[j]);
            if !a.subject.eq_ignore_ascii_case(&b.subject) {
                continue;
            }
            let conflicting = matches!(
                (&a.kind, &b.kind),
                (ConstraintKind::Requires, ConstraintKind::Forbids)
                    | (ConstraintKind::Forbids, ConstraintKind::Requires)
            );
            if conflicting {
                issues.push(CoherenceIssue::new(
                    CoherenceIssueKind::ConstraintConflict {
                        first: a.constraint_id,
                        second: b.constraint_id,
                    },
                    Severity::Error,
                    format!("constraints on '{}' cannot both hold", a.subject),
                ));
            }
        }
    }

    // --- Logical consistency: goals unreachable under constraints. ---
    let forbidden: Vec<&str> = plan
        .constraints
        .iter()
        .filter(|c| matches!(c.kind, ConstraintKind::Forbids))
        .map(|c| c.subject.as_str())
        .collect();
    for goal in &plan.goals {
        checks_run += 1;
        if goal.achieved {
            continue;
        }
        let satisfiers: Vec<_> = goal
            .satisfied_by
            .iter()
            .filter_map(|id| plan.task(*id))
            .collect();
        let unreachable = satisfiers.is_empty()
            || satisfiers.iter().all(|t| {
                forbidden
                    .iter()
                    .any(|f| t.description.to_lowercase().contains(&f.to_lowercase()))
            });
        if unreachable {
            issues.push(CoherenceIssue::new(
                CoherenceIssueKind::ImpossibleGoal {
                    goal_id: goal.goal_id,
                },
                Severity::Error,
                format!("goal '{}' has no viable satisfying task", goal.description),
            ));
        }
    }

    // --- Dependency coherence: declared but absent from the edge set. ---
    for task in plan.tasks.values() {
        for dep in &task.depends_on {
            checks_run += 1;
            if !plan.has_edge(*dep, task.task_id) {
                issues.push(CoherenceIssue::new(
                    CoherenceIssueKind::MissingDependency {
                        task_id: task.task_id,
                        missing: *dep,
                    },
                    Severity::Error,
                    format!(
                        "task '{}' declares dependency {} with no edge",
                        task.description, dep
                    ),
                ));
            }
        }
    }

    // --- Dependency coherence: redundant edges (informational). ---
    for edge in &plan.dependencies {
        checks_run += 1;
        if reachable_without_edge(&adjacency, edge.from, edge.to) {
            issues.push(CoherenceIssue::new(
                CoherenceIssueKind::UnnecessaryDependency {
                    from: edge.from,
                    to: edge.to,
                },
                Severity::Info,
                format!("edge {} -> {} is implied transitively", edge.from, edge.to),
            ));
        }
    }

    // --- Resource coherence: assignments vs. declared capacity. ---
    let assignments = plan.resource_assignments();
    for constraint in &plan.constraints {
        let ConstraintKind::Capacity { limit } = constraint.kind else {
            continue;
        };
        checks_run += 1;
        let assigned = assignments.get(&constraint.subject).copied().unwrap_or(0);
        if assigned > limit {
            issues.push(CoherenceIssue::new(
                CoherenceIssueKind::ResourceOveralloc {
                    resource: constraint.subject.clone(),
                    assigned,
                    capacity: limit,
                },
                Severity::Error,
                format!(
                    "resource '{}' assigned {} units over capacity {}",
                    constraint.subject, assigned, limit
                ),
            ));
        }
    }

    // --- Goal alignment: tasks with no path to any goal task. ---
    let goal_tasks = plan.goal_tasks();
    if !goal_tasks.is_empty() {
        for task in plan.tasks.values() {
            if task.status == TaskStatus::Completed || goal_tasks.contains(&task.task_id) {
                continue;
            }
            checks_run += 1;
            if !reaches_any(&adjacency, task.task_id, &goal_tasks) {
                issues.push(CoherenceIssue::new(
                    CoherenceIssueKind::GoalMisalignment {
                        task_id: task.task_id,
                    },
                    Severity::Error,
                    format!("task '{}' has no path to any goal", task.description),
                ));
            }
        }
    }

    let report = CoherenceReport::from_issues(issues, checks_run);
    debug!(
        score = report.score,
        blocking = report.blocking_count(),
        checks = checks_run,
        "coherence validation finished"
    );
    report
}

/// Forward adjacency of the dependency graph.
pub(crate) fn adjacency_map(plan: &Plan) -> BTreeMap<TaskId, Vec<TaskId>> {
    let mut adjacency: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();
    for id in plan.tasks.keys() {
        adjacency.entry(*id).or_default();
    }
    for edge in &plan.dependencies {
        adjacency.entry(edge.from).or_default().push(edge.to);
    }
    adjacency
}

/// Whether `to` is reachable from `from` by following edges.
pub(crate) fn reaches(
    adjacency: &BTreeMap<TaskId, Vec<TaskId>>,
    from: TaskId,
    to: TaskId,
) -> bool {
    let mut targets = BTreeSet::new();
    targets.insert(to);
    reaches_any(adjacency, from, &targets)
}

fn reaches_any(
    adjacency: &BTreeMap<TaskId, Vec<TaskId>>,
    from: TaskId,
    targets: &BTreeSet<TaskId>,
) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from);
    seen.insert(from);
    while let Some(node) = queue.pop_front() {
        for next in adjacency.get(&node).map(|v| v.as_slice()).unwrap_or(&[]) {
            if targets.contains(next) {
                return true;
            }
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    false
}

/// Whether `to` is reachable from `from` without using the direct edge.
fn reachable_without_edge(
    adjacency: &BTreeMap<TaskId, Vec<TaskId>>,
    from: TaskId,
    to: TaskId,
) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    seen.insert(from);
    for next in adjacency.get(&from).map(|v| v.as_slice()).unwrap_or(&[]) {
        if *next != to && seen.insert(*next) {
            queue.push_back(*next);
        }
    }
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        for next in adjacency.get(&node).map(|v| v.as_slice()).unwrap_or(&[]) {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    false
}

/// Three-color DFS cycle detection. Returns one node path per back
/// edge found; the edge closing each cycle is (last, first).
fn find_cycles(plan: &Plan, adjacency: &BTreeMap<TaskId, Vec<TaskId>>) -> Vec<Vec<TaskId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: BTreeMap<TaskId, Color> = plan
        .tasks
        .keys()
        .map(|id| (*id, Color::White))
        .collect();
    let mut cycles = Vec::new();

    for &start in plan.tasks.keys() {
        if color.get(&start) != Some(&Color::White) {
            continue;
        }
        let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = Vec::new();
        let mut path: Vec<TaskId> = Vec::new();
        color.insert(start, Color::Gray);
        path.push(start);
        stack.push((
            start,
            adjacency.get(&start).cloned().unwrap_or_default(),
            0,
        ));

        while let Some((node, neighbors, index)) = stack.last_mut() {
            if *index < neighbors.len() {
                let next = neighbors[*index];
                *index += 1;
                match color.get(&next).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(next, Color::Gray);
                        path.push(next);
                        let next_neighbors = adjacency.get(&next).cloned().unwrap_or_default();
                        stack.push((next, next_neighbors, 0));
                    }
                    Color::Gray => {
                        // Back edge: the gray node is on the current path.
                        let pos = path.iter().position(|&t| t == next).unwrap_or(0);
                        cycles.push(path[pos..].to_vec());
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(*node, Color::Black);
                path.pop();
                stack.pop();
            }
        }
    }

    cycles
}

// ============================================================================
// TESTS
// ============================================================================
