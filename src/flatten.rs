use std::collections::BTreeSet;

use crate::tree::{Aggregate, TreeNode};

#[derive(Debug)]
pub struct Row<'a, T> {
    pub node: &'a TreeNode<T>,
    pub depth: usize,
}

impl<T> Clone for Row<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Row<'_, T> {}

pub fn flatten<'a, T>(roots: &'a [TreeNode<T>], expanded: &ExpansionState) -> Vec<Row<'a, T>> {
    let mut rows = Vec::new();
    let mut stack: Vec<Row<'a, T>> = roots
        .iter()
        .rev()
        .map(|node| Row { node, depth: 0 })
        .collect();
    while let Some(row) = stack.pop() {
        if row.node.is_branch() && expanded.is_expanded(&row.node.id) {
            stack.extend(row.node.children().iter().rev().map(|node| Row {
                node,
                depth: row.depth + 1,
            }));
        }
        rows.push(row);
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    None,
    Partial,
    All,
}

impl Selection {
    pub fn of(aggregate: &Aggregate) -> Self {
        if aggregate.included == 0 {
            Selection::None
        } else if aggregate.included == aggregate.total {
            Selection::All
        } else {
            Selection::Partial
        }
    }
}

impl<T> TreeNode<T> {
    pub fn selection(&self) -> Selection {
        Selection::of(&self.aggregate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionChange {
    pub ids: Vec<String>,
    pub included: bool,
}

impl InclusionChange {
    pub fn apply<S: InclusionSink + ?Sized>(&self, sink: &mut S) {
        if !self.ids.is_empty() {
            sink.set_included(&self.ids, self.included);
        }
    }
}

/// Receives inclusion updates. The tree never mutates items itself.
pub trait InclusionSink {
    fn set_included(&mut self, ids: &[String], included: bool);
}

impl<F> InclusionSink for F
where
    F: FnMut(&[String], bool),
{
    fn set_included(&mut self, ids: &[String], included: bool) {
        self(ids, included)
    }
}

/// Clicking a fully selected node clears its subtree; anything else selects
/// the whole subtree.
pub fn toggle_plan<T>(node: &TreeNode<T>) -> InclusionChange {
    InclusionChange {
        ids: node.leaf_ids(),
        included: node.selection() != Selection::All,
    }
}

/// Every operation returns a new value and leaves the receiver untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionState {
    expanded: BTreeSet<String>,
    known: BTreeSet<String>,
    expand_new: bool,
}

impl Default for ExpansionState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ExpansionState {
    pub fn new(expand_new: bool) -> Self {
        Self {
            expanded: BTreeSet::new(),
            known: BTreeSet::new(),
            expand_new,
        }
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn expanded_ids(&self) -> impl Iterator<Item = &str> {
        self.expanded.iter().map(String::as_str)
    }

    /// Vanished ids are dropped. Ids seen for the first time open when
    /// `expand_new` is set.
    pub fn reconcile<S: AsRef<str>>(&self, branch_ids: &[S]) -> Self {
        let current: BTreeSet<String> = branch_ids
            .iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        let mut expanded: BTreeSet<String> =
            self.expanded.intersection(&current).cloned().collect();
        if self.expand_new {
            expanded.extend(current.difference(&self.known).cloned());
        }
        Self {
            expanded,
            known: current,
            expand_new: self.expand_new,
        }
    }

    pub fn toggle(&self, id: &str) -> Self {
        if self.is_expanded(id) {
            self.collapse(id)
        } else {
            self.expand(id)
        }
    }

    pub fn expand(&self, id: &str) -> Self {
        let mut next = self.clone();
        if next.known.contains(id) {
            next.expanded.insert(id.to_string());
        }
        next
    }

    pub fn collapse(&self, id: &str) -> Self {
        let mut next = self.clone();
        next.expanded.remove(id);
        next
    }

    pub fn expand_all(&self) -> Self {
        Self {
            expanded: self.known.clone(),
            known: self.known.clone(),
            expand_new: self.expand_new,
        }
    }

    pub fn collapse_all(&self) -> Self {
        Self {
            expanded: BTreeSet::new(),
            known: self.known.clone(),
            expand_new: self.expand_new,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileEntry;
    use crate::tree::{build_tree, BuiltTree};

    fn tree() -> BuiltTree<FileEntry> {
        build_tree(vec![
            FileEntry::new("a/b.txt", 100, 1.0, true),
            FileEntry::new("a/c.txt", 300, 0.5, false),
            FileEntry::new("a/sub/e.txt", 10, 0.0, true),
            FileEntry::new("d.txt", 50, 0.0, true),
        ])
    }

    fn ids<T>(rows: &[Row<'_, T>]) -> Vec<(String, usize)> {
        rows.iter()
            .map(|row| (row.node.id.clone(), row.depth))
            .collect()
    }

    #[test]
    fn collapsed_state_shows_only_roots() {
        let tree = tree();
        let rows = flatten(&tree.roots, &ExpansionState::new(false));
        assert_eq!(
            ids(&rows),
            [("a".to_string(), 0), ("d.txt".to_string(), 0)]
        );
    }

    #[test]
    fn fully_expanded_state_lists_every_node_in_preorder() {
        let tree = tree();
        let state = ExpansionState::default().reconcile(&tree.branch_ids);
        let rows = flatten(&tree.roots, &state);
        assert_eq!(
            ids(&rows),
            [
                ("a".to_string(), 0),
                ("a/sub".to_string(), 1),
                ("a/sub/e.txt".to_string(), 2),
                ("a/b.txt".to_string(), 1),
                ("a/c.txt".to_string(), 1),
                ("d.txt".to_string(), 0),
            ]
        );
    }

    #[test]
    fn collapsed_branch_hides_descendants() {
        let tree = tree();
        let state = ExpansionState::default()
            .reconcile(&tree.branch_ids)
            .collapse("a/sub");
        let rows = flatten(&tree.roots, &state);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|row| row.node.id != "a/sub/e.txt"));
    }

    #[test]
    fn empty_tree_flattens_to_nothing() {
        let tree = build_tree(Vec::<FileEntry>::new());
        assert!(flatten(&tree.roots, &ExpansionState::default()).is_empty());
    }

    #[test]
    fn selection_is_tri_state() {
        let tree = tree();
        let a = &tree.roots[0];
        assert_eq!(a.selection(), Selection::Partial);
        assert_eq!(a.children()[0].selection(), Selection::All);
        assert_eq!(a.children()[2].selection(), Selection::None);
    }

    #[test]
    fn toggle_plan_selects_partial_and_clears_full() {
        let tree = tree();
        let partial = toggle_plan(&tree.roots[0]);
        assert!(partial.included);
        assert_eq!(partial.ids, ["a/sub/e.txt", "a/b.txt", "a/c.txt"]);

        let full = toggle_plan(&tree.roots[0].children()[0]);
        assert!(!full.included);
        assert_eq!(full.ids, ["a/sub/e.txt"]);

        let leaf_off = toggle_plan(&tree.roots[0].children()[2]);
        assert!(leaf_off.included);
        assert_eq!(leaf_off.ids, ["a/c.txt"]);
    }

    #[test]
    fn inclusion_change_reaches_closure_sink() {
        let mut seen = Vec::new();
        let mut sink = |ids: &[String], included: bool| seen.push((ids.to_vec(), included));
        let change = InclusionChange {
            ids: vec!["x".to_string()],
            included: true,
        };
        change.apply(&mut sink);
        InclusionChange {
            ids: Vec::new(),
            included: false,
        }
        .apply(&mut sink);
        assert_eq!(seen, [(vec!["x".to_string()], true)]);
    }

    #[test]
    fn reconcile_prunes_and_expands_new_ids() {
        let state = ExpansionState::default().reconcile(&["a", "b"]);
        assert!(state.is_expanded("a") && state.is_expanded("b"));

        let state = state.collapse("a").reconcile(&["a", "c"]);
        assert!(!state.is_expanded("a"));
        assert!(!state.is_expanded("b"));
        assert!(state.is_expanded("c"));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let first = ExpansionState::default()
            .reconcile(&["a", "a/b", "c"])
            .collapse("a/b");
        let second = first.reconcile(&["a", "a/b", "c"]);
        let third = second.reconcile(&["a", "a/b", "c"]);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn new_branches_stay_collapsed_when_configured() {
        let state = ExpansionState::new(false).reconcile(&["a"]);
        assert!(!state.is_expanded("a"));
        let state = state.expand("a").reconcile(&["a", "b"]);
        assert!(state.is_expanded("a"));
        assert!(!state.is_expanded("b"));
    }

    #[test]
    fn expansion_operations_copy_on_write() {
        let base = ExpansionState::new(false).reconcile(&["a", "b"]);
        let all = base.expand_all();
        assert_eq!(all.expanded_ids().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(base.expanded_ids().count(), 0);
        assert_eq!(all.collapse_all().expanded_ids().count(), 0);
        assert!(all.toggle("a").is_expanded("b"));
        assert!(!all.toggle("a").is_expanded("a"));
        assert!(!base.expand("missing").is_expanded("missing"));
    }
}
