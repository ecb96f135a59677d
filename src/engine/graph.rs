// SPDX-License-Identifier: MIT

//! Dependency graph validator and the TodoGraph container
//!
//! The graph is append-only: items are soft-deleted by marking them
//! `skipped`, never removed, so the audit trail of a run is always the
//! full item list. Mutation happens through exactly two doors: status
//! transitions on existing items, and [TodoGraph::insert_after], which
//! re-validates every invariant before committing.

use crate::engine::types::{TodoId, TodoItem, TodoStatus};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};

/// A new item to insert, before id assignment
#[derive(Debug, Clone)]
pub struct InsertItem {
    pub action: String,
    pub success_criterion: String,
    pub dependencies: Vec<TodoId>,
    pub max_attempts: u32,
}

/// Ordered, append-only collection of [TodoItem]s keyed by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoGraph {
    items: Vec<TodoItem>,
}

impl TodoGraph {
    /// Build a graph from items, sorting by id and validating every
    /// invariant. Violations are hard rejections, never repaired.
    pub fn new(mut items: Vec<TodoItem>) -> Result<Self, GraphError> {
        items.sort_by(|a, b| a.id.cmp(&b.id));
        let graph = Self { items };
        graph.validate()?;
        Ok(graph)
    }

    /// Check every graph invariant: no duplicate ids, no dangling
    /// dependency references, and `d < owner.id` for every dependency.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.items.is_empty() {
            return Err(GraphError::Empty);
        }

        for window in self.items.windows(2) {
            if window[0].id == window[1].id {
                return Err(GraphError::DuplicateId(window[0].id.to_string()));
            }
        }

        for item in &self.items {
            for dep in &item.dependencies {
                if *dep >= item.id {
                    return Err(GraphError::ForwardDependency {
                        item: item.id.to_string(),
                        dependency: dep.to_string(),
                    });
                }
                if self.get(dep).is_none() {
                    return Err(GraphError::DanglingDependency {
                        item: item.id.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, id: &TodoId) -> Option<&TodoItem> {
        self.items
            .binary_search_by(|item| item.id.cmp(id))
            .ok()
            .map(|idx| &self.items[idx])
    }

    pub fn get_mut(&mut self, id: &TodoId) -> Option<&mut TodoItem> {
        self.items
            .binary_search_by(|item| item.id.cmp(id))
            .ok()
            .map(move |idx| &mut self.items[idx])
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert new items as children of `after`, assigning the next free
    /// child indices, and re-validate the whole graph. On any violation
    /// the graph is left untouched.
    ///
    /// The caller chooses the insertion point; this method only
    /// enforces that the result is a valid graph.
    pub fn insert_after(
        &mut self,
        after: &TodoId,
        new_items: Vec<InsertItem>,
    ) -> Result<Vec<TodoId>, GraphError> {
        if self.get(after).is_none() {
            return Err(GraphError::UnknownInsertionPoint(after.to_string()));
        }

        let mut next_index = self.next_child_index(after);
        let mut assigned = Vec::with_capacity(new_items.len());
        let mut candidate = self.items.clone();

        for draft in new_items {
            let id = after.child(next_index);
            next_index += 1;
            assigned.push(id.clone());
            candidate.push(TodoItem::new(
                id,
                draft.action,
                draft.success_criterion,
                draft.dependencies,
                draft.max_attempts,
            ));
        }

        candidate.sort_by(|a, b| a.id.cmp(&b.id));
        let graph = Self { items: candidate };
        graph.validate()?;

        *self = graph;
        Ok(assigned)
    }

    fn next_child_index(&self, parent: &TodoId) -> u32 {
        self.items
            .iter()
            .filter(|item| item.id.is_child_of(parent))
            .filter_map(|item| item.id.components().last().copied())
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    /// The next pending item, in id order, whose dependencies have all
    /// reached `completed` or `skipped`.
    pub fn next_ready(&self) -> Option<&TodoItem> {
        self.items
            .iter()
            .filter(|item| item.status == TodoStatus::Pending)
            .find(|item| self.dependencies_satisfied(item))
    }

    fn dependencies_satisfied(&self, item: &TodoItem) -> bool {
        item.dependencies.iter().all(|dep| {
            self.get(dep)
                .map(|d| d.status.satisfies_dependents())
                .unwrap_or(false)
        })
    }

    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == TodoStatus::Pending)
            .count()
    }

    /// Pending items that cannot run because a dependency failed.
    /// Non-empty with no ready item means the workflow is deadlocked.
    pub fn blocked_items(&self) -> Vec<&TodoItem> {
        self.items
            .iter()
            .filter(|item| item.status == TodoStatus::Pending)
            .filter(|item| !self.dependencies_satisfied(item))
            .collect()
    }

    /// Does any non-terminal item transitively depend on `id`?
    pub fn has_pending_dependents(&self, id: &TodoId) -> bool {
        self.items
            .iter()
            .filter(|item| !item.status.is_terminal())
            .any(|item| self.depends_transitively(item, id))
    }

    fn depends_transitively(&self, item: &TodoItem, target: &TodoId) -> bool {
        item.dependencies.iter().any(|dep| {
            dep == target
                || self
                    .get(dep)
                    .map(|d| self.depends_transitively(d, target))
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, deps: &[&str]) -> TodoItem {
        TodoItem::new(
            id.parse().unwrap(),
            format!("action {}", id),
            format!("criterion {}", id),
            deps.iter().map(|d| d.parse().unwrap()).collect(),
            2,
        )
    }

    fn graph(specs: &[(&str, &[&str])]) -> TodoGraph {
        TodoGraph::new(specs.iter().map(|(id, deps)| item(id, deps)).collect()).unwrap()
    }

    #[test]
    fn test_valid_graph_accepted() {
        let g = graph(&[("1", &[]), ("1.1", &["1"]), ("2", &["1", "1.1"])]);
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = TodoGraph::new(vec![item("1", &[]), item("1", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("1".to_string()));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = TodoGraph::new(vec![item("1", &[]), item("1.1", &["1.1"])]).unwrap_err();
        assert!(matches!(err, GraphError::ForwardDependency { .. }));
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let err = TodoGraph::new(vec![item("1", &[]), item("1.1", &["2"]), item("2", &[])])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::ForwardDependency {
                item: "1.1".to_string(),
                dependency: "2".to_string(),
            }
        );
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let err = TodoGraph::new(vec![item("2", &[]), item("3", &["1"])]).unwrap_err();
        assert!(matches!(err, GraphError::DanglingDependency { .. }));
    }

    #[test]
    fn test_empty_graph_rejected() {
        assert_eq!(TodoGraph::new(vec![]).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let g = graph(&[("1", &[]), ("2", &["1"])]);
        let before = serde_json::to_value(&g).unwrap();

        g.validate().unwrap();
        g.validate().unwrap();

        assert_eq!(serde_json::to_value(&g).unwrap(), before);
    }

    #[test]
    fn test_next_ready_respects_dependencies() {
        let mut g = graph(&[("1", &[]), ("2", &["1"])]);
        assert_eq!(g.next_ready().unwrap().id.to_string(), "1");

        g.get_mut(&"1".parse().unwrap()).unwrap().status = TodoStatus::Completed;
        assert_eq!(g.next_ready().unwrap().id.to_string(), "2");
    }

    #[test]
    fn test_skipped_dependency_satisfies_dependents() {
        let mut g = graph(&[("1", &[]), ("2", &["1"])]);
        g.get_mut(&"1".parse().unwrap()).unwrap().status = TodoStatus::Skipped;
        assert_eq!(g.next_ready().unwrap().id.to_string(), "2");
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let mut g = graph(&[("1", &[]), ("2", &["1"])]);
        g.get_mut(&"1".parse().unwrap()).unwrap().status = TodoStatus::Failed;

        assert!(g.next_ready().is_none());
        assert_eq!(g.blocked_items().len(), 1);
        assert_eq!(g.pending_count(), 1);
    }

    #[test]
    fn test_insert_after_assigns_child_ids() {
        let mut g = graph(&[("1", &[]), ("2", &["1"]), ("3", &["2"])]);

        let inserted = g
            .insert_after(
                &"2".parse().unwrap(),
                vec![
                    InsertItem {
                        action: "alternative tactic".to_string(),
                        success_criterion: "same outcome".to_string(),
                        dependencies: vec!["1".parse().unwrap()],
                        max_attempts: 2,
                    },
                    InsertItem {
                        action: "confirm".to_string(),
                        success_criterion: "confirmed".to_string(),
                        dependencies: vec!["2.1".parse().unwrap()],
                        max_attempts: 2,
                    },
                ],
            )
            .unwrap();

        assert_eq!(inserted[0].to_string(), "2.1");
        assert_eq!(inserted[1].to_string(), "2.2");
        // New items sort between the insertion point and its successor
        let ids: Vec<String> = g.items().iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "2.1", "2.2", "3"]);
    }

    #[test]
    fn test_insert_after_skips_existing_child_indices() {
        let mut g = graph(&[("1", &[]), ("1.1", &["1"]), ("2", &[])]);

        let inserted = g
            .insert_after(
                &"1".parse().unwrap(),
                vec![InsertItem {
                    action: "more".to_string(),
                    success_criterion: "done".to_string(),
                    dependencies: vec![],
                    max_attempts: 2,
                }],
            )
            .unwrap();

        assert_eq!(inserted[0].to_string(), "1.2");
    }

    #[test]
    fn test_insert_with_forward_dependency_rolls_back() {
        let mut g = graph(&[("1", &[]), ("2", &["1"])]);
        let before: Vec<String> = g.items().iter().map(|i| i.id.to_string()).collect();

        let err = g
            .insert_after(
                &"1".parse().unwrap(),
                vec![InsertItem {
                    action: "bad".to_string(),
                    success_criterion: "bad".to_string(),
                    // 2 > 1.1, so this is a forward reference
                    dependencies: vec!["2".parse().unwrap()],
                    max_attempts: 2,
                }],
            )
            .unwrap_err();

        assert!(matches!(err, GraphError::ForwardDependency { .. }));
        let after: Vec<String> = g.items().iter().map(|i| i.id.to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_insert_at_unknown_point_rejected() {
        let mut g = graph(&[("1", &[])]);
        let err = g
            .insert_after(&"9".parse().unwrap(), vec![])
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownInsertionPoint("9".to_string()));
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph(&[("1", &[]), ("2", &["1"]), ("3", &["2"])]);
        let one: TodoId = "1".parse().unwrap();
        let three: TodoId = "3".parse().unwrap();

        assert!(g.has_pending_dependents(&one));
        assert!(!g.has_pending_dependents(&three));
    }

    #[test]
    fn test_terminal_dependents_do_not_count() {
        let mut g = graph(&[("1", &[]), ("2", &["1"])]);
        g.get_mut(&"2".parse().unwrap()).unwrap().status = TodoStatus::Completed;
        assert!(!g.has_pending_dependents(&"1".parse().unwrap()));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Generate a valid graph: sequential root ids, each item depending
    /// on a subset of strictly earlier items.
    fn valid_items() -> impl Strategy<Value = Vec<TodoItem>> {
        (1usize..12).prop_flat_map(|n| {
            let dep_masks = proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n);
            dep_masks.prop_map(move |masks| {
                (0..n)
                    .map(|i| {
                        let deps: Vec<TodoId> = (0..i)
                            .filter(|&j| masks[i][j])
                            .map(|j| TodoId::root(j as u32 + 1))
                            .collect();
                        TodoItem::new(
                            TodoId::root(i as u32 + 1),
                            format!("action {}", i + 1),
                            format!("criterion {}", i + 1),
                            deps,
                            2,
                        )
                    })
                    .collect()
            })
        })
    }

    proptest! {
        #[test]
        fn prop_backward_only_graphs_validate(items in valid_items()) {
            prop_assert!(TodoGraph::new(items).is_ok());
        }

        #[test]
        fn prop_forward_or_self_reference_always_rejected(
            items in valid_items(),
            victim in any::<proptest::sample::Index>(),
            target in any::<proptest::sample::Index>(),
        ) {
            let mut items = items;
            let n = items.len();
            let victim_idx = victim.index(n);
            // Pick a dependency at or after the victim: always invalid
            let target_idx = victim_idx + target.index(n - victim_idx);
            let target_id = items[target_idx].id.clone();
            items[victim_idx].dependencies.push(target_id);

            prop_assert!(TodoGraph::new(items).is_err());
        }

        #[test]
        fn prop_validated_insertion_preserves_validity(
            items in valid_items(),
            point in any::<proptest::sample::Index>(),
        ) {
            let mut graph = TodoGraph::new(items).unwrap();
            let after = graph.items()[point.index(graph.len())].id.clone();
            let deps = graph.get(&after).unwrap().dependencies.clone();

            let inserted = graph.insert_after(&after, vec![InsertItem {
                action: "replacement".to_string(),
                success_criterion: "same outcome".to_string(),
                dependencies: deps,
                max_attempts: 2,
            }]);

            prop_assert!(inserted.is_ok());
            prop_assert!(graph.validate().is_ok());
        }
    }
}
