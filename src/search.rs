use std::collections::HashMap;

use crate::{
    flatten::{flatten, ExpansionState, Row},
    tree::TreeNode,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeMatch {
    own: bool,
    descendant: bool,
}

impl NodeMatch {
    fn any(self) -> bool {
        self.own || self.descendant
    }
}

/// Match results for one query, keyed by node id. Build a new cache whenever
/// the query or the tree changes.
#[derive(Debug, Clone, Default)]
pub struct MatchCache {
    needle: String,
    matches: HashMap<String, NodeMatch>,
}

impl MatchCache {
    pub fn new<T>(roots: &[TreeNode<T>], query: &str) -> Self {
        let needle = query.trim().to_lowercase();
        let mut cache = Self {
            needle,
            matches: HashMap::new(),
        };
        if cache.is_active() {
            for root in roots {
                cache.visit(root);
            }
        }
        cache
    }

    pub fn is_active(&self) -> bool {
        !self.needle.is_empty()
    }

    #[cfg(test)]
    fn is_match(&self, id: &str) -> bool {
        self.matches.get(id).is_some_and(|found| found.any())
    }

    pub fn match_count(&self) -> usize {
        self.matches.values().filter(|found| found.own).count()
    }

    fn visit<T>(&mut self, node: &TreeNode<T>) -> bool {
        let mut descendant = false;
        for child in node.children() {
            descendant |= self.visit(child);
        }
        let found = NodeMatch {
            own: node.name.to_lowercase().contains(&self.needle),
            descendant,
        };
        self.matches.insert(node.id.clone(), found);
        found.any()
    }

    fn lookup(&self, id: &str) -> NodeMatch {
        self.matches.get(id).copied().unwrap_or_default()
    }
}

/// Branches that only contain matches are forced open and show just the
/// matching children.
pub fn flatten_matching<'a, T>(
    roots: &'a [TreeNode<T>],
    expanded: &ExpansionState,
    cache: &MatchCache,
) -> Vec<Row<'a, T>> {
    if !cache.is_active() {
        return flatten(roots, expanded);
    }
    let mut rows = Vec::new();
    let mut stack: Vec<(Row<'a, T>, bool)> = roots
        .iter()
        .rev()
        .map(|node| (Row { node, depth: 0 }, false))
        .collect();
    while let Some((row, shown_by_ancestor)) = stack.pop() {
        let found = cache.lookup(&row.node.id);
        if !shown_by_ancestor && !found.any() {
            continue;
        }
        if row.node.is_branch() {
            let is_open = expanded.is_expanded(&row.node.id);
            if is_open || found.descendant {
                let show_all = is_open && (shown_by_ancestor || found.own);
                stack.extend(row.node.children().iter().rev().map(|node| {
                    (
                        Row {
                            node,
                            depth: row.depth + 1,
                        },
                        show_all,
                    )
                }));
            }
        }
        rows.push(row);
    }
    rows
}
