//! TILLER Test Utilities
//!
//! Centralized test infrastructure for the TILLER workspace:
//! - Proptest generators for plans, tasks, and context pieces
//! - Fixtures for common plan shapes and observation batches
//! - Custom assertions for TILLER-specific invariants

// Re-export core types for convenience
pub use tiller_core::{
    AdaptationTrigger, Assumption, ComplexityClass, Constraint, ConstraintKind, ContextLayer,
    ContextPiece, ContextSnapshot, ContextUpdate, ContextUpdateKind, Dependency, DetectorKind,
    EngineConfig, EnvironmentState, Goal, Observation, ObservationBatch, Plan, RawObservation,
    Severity, StrategyKind, Task, TaskId, TaskStatus, TriggerKind,
};

use proptest::prelude::*;
use std::collections::{BTreeMap, VecDeque};

// ============================================================================
// FIXTURES
// ============================================================================

/// A plan whose tasks form one linear chain, with a goal satisfied by
/// the last task. `plan_with_chain(&["a", "b", "c"])` produces edges
/// a -> b -> c.
pub fn plan_with_chain(descriptions: &[&str]) -> Plan {
    let mut tasks: Vec<Task> = Vec::with_capacity(descriptions.len());
    for (i, description) in descriptions.iter().enumerate() {
        let mut task = Task::new(*description);
        if i > 0 {
            task.depends_on.push(tasks[i - 1].task_id);
        }
        tasks.push(task);
    }
    let goal = Goal::new("chain complete").with_satisfied_by(
        tasks
            .last()
            .map(|t| vec![t.task_id])
            .unwrap_or_default(),
    );

    let mut plan = Plan::new(goal);
    for window in tasks.windows(2) {
        plan = plan.with_dependency(window[0].task_id, window[1].task_id);
    }
    for task in tasks {
        plan = plan.with_task(task);
    }
    plan
}

/// Ordered task ids of a chain plan, in chain order.
pub fn chain_ids(plan: &Plan) -> Vec<TaskId> {
    let mut order: Vec<TaskId> = Vec::new();
    let mut current = plan
        .tasks
        .values()
        .find(|t| plan.edges_to(t.task_id).next().is_none())
        .map(|t| t.task_id);
    while let Some(id) = current {
        order.push(id);
        current = plan.edges_from(id).next().map(|e| e.to);
    }
    order
}

/// A progress-report observation on the wire format.
pub fn progress_observation(expected_rate: f32, actual_rate: f32) -> RawObservation {
    RawObservation::new(
        "progress_report",
        serde_json::json!({"expected_rate": expected_rate, "actual_rate": actual_rate}),
    )
}

/// A user message carrying one new requirement.
pub fn requirement_message(requirement: &str) -> RawObservation {
    RawObservation::new(
        "user_message",
        serde_json::json!({
            "content": format!("we also need {}", requirement),
            "requirements": [requirement],
        }),
    )
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Assert the dependency edge set is acyclic via exhaustive
/// topological sort; panics with the leftover tasks otherwise.
pub fn assert_acyclic(plan: &Plan) {
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
    let mut sorted = 0usize;
    while let Some(id) = queue.pop_front() {
        sorted += 1;
        for edge in plan.edges_from(id) {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.to);
                }
            }
        }
    }
    assert_eq!(
        sorted,
        plan.tasks.len(),
        "dependency graph of plan v{} contains a cycle",
        plan.version
    );
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Arbitrary pending task with a lowercase description.
pub fn arb_task() -> impl Strategy<Value = Task> {
    "[a-z]{4,12}( [a-z]{3,8})?".prop_map(Task::new)
}

/// Arbitrary task status.
pub fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Active),
        Just(TaskStatus::Blocked),
        Just(TaskStatus::Completed),
    ]
}

/// Arbitrary plan, acyclic by construction: edges only flow from
/// earlier to later task in generation order.
pub fn arb_plan() -> impl Strategy<Value = Plan> {
    (1usize..6).prop_flat_map(|n| {
        (
            proptest::collection::vec(arb_task(), n..=n),
            proptest::collection::vec(any::<bool>(), n * n),
        )
            .prop_map(move |(tasks, edge_mask)| {
                let ids: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();
                let goal = Goal::new("generated goal")
                    .with_satisfied_by(ids.last().map(|id| vec![*id]).unwrap_or_default());
                let mut plan = Plan::new(goal);
                for task in tasks {
                    plan = plan.with_task(task);
                }
                for i in 0..n {
                    for j in (i + 1)..n {
                        if edge_mask[i * n + j] {
                            plan = plan.with_dependency(ids[i], ids[j]);
                            if let Some(task) = plan.tasks.get_mut(&ids[j]) {
                                task.depends_on.push(ids[i]);
                            }
                        }
                    }
                }
                plan
            })
    })
}

/// Arbitrary context piece in a given layer.
pub fn arb_context_piece(layer: ContextLayer) -> impl Strategy<Value = ContextPiece> {
    ("[a-z]{3,8}:[a-z0-9]{1,6}", "[a-z ]{0,40}").prop_map(move |(key, value)| {
        ContextPiece::new(
            layer,
            key,
            serde_json::json!(value),
            ContextUpdateKind::FactAsserted,
        )
    })
}

/// Arbitrary context snapshot with up to `per_layer` pieces per layer.
pub fn arb_context_snapshot(per_layer: usize) -> impl Strategy<Value = ContextSnapshot> {
    (
        proptest::collection::vec(arb_context_piece(ContextLayer::Conversational), 0..=per_layer),
        proptest::collection::vec(arb_context_piece(ContextLayer::Technical), 0..=per_layer),
        proptest::collection::vec(arb_context_piece(ContextLayer::Project), 0..=per_layer),
        proptest::collection::vec(arb_context_piece(ContextLayer::Execution), 0..=per_layer),
    )
        .prop_map(|(conversational, technical, project, execution)| {
            let mut snapshot = ContextSnapshot::empty();
            for pieces in [conversational, technical, project, execution] {
                for piece in pieces {
                    snapshot.layers.entry(piece.layer).or_default().push(piece);
                }
            }
            snapshot.recompute_total_size();
            snapshot
        })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_with_chain_shape() {
        let plan = plan_with_chain(&["first", "second", "third"]);
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.dependencies.len(), 2);
        assert_acyclic(&plan);

        let ids = chain_ids(&plan);
        assert_eq!(ids.len(), 3);
        assert!(plan.has_edge(ids[0], ids[1]));
        assert!(plan.has_edge(ids[1], ids[2]));
        assert_eq!(plan.goals[0].satisfied_by, vec![ids[2]]);
    }

    #[test]
    #[should_panic(expected = "contains a cycle")]
    fn test_assert_acyclic_panics_on_cycle() {
        let mut plan = plan_with_chain(&["first", "second"]);
        let ids = chain_ids(&plan);
        plan.dependencies.insert(Dependency::new(ids[1], ids[0]));
        assert_acyclic(&plan);
    }

    proptest! {
        #[test]
        fn prop_generated_plans_are_acyclic(plan in arb_plan()) {
            assert_acyclic(&plan);
        }

        #[test]
        fn prop_generated_plans_declare_matching_edges(plan in arb_plan()) {
            for task in plan.tasks.values() {
                for dep in &task.depends_on {
                    prop_assert!(plan.has_edge(*dep, task.task_id));
                }
            }
        }

        #[test]
        fn prop_generated_snapshots_have_consistent_size(snapshot in arb_context_snapshot(4)) {
            let sum: i64 = snapshot.all_pieces().map(|p| p.size).sum();
            prop_assert_eq!(snapshot.total_size, sum);
        }
    }
}
