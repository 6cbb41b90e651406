use std::{cmp::Ordering, collections::BTreeMap, iter::Peekable, str::Chars};

use crate::model::{NameOverride, NoOverride, TreeItem};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    pub size: u64,
    pub weighted_progress: f64,
    pub included: usize,
    pub total: usize,
}

impl Aggregate {
    fn from_item<T: TreeItem>(item: &T) -> Self {
        let size = item.size();
        Self {
            size,
            weighted_progress: clamp_progress(item.progress()) * size as f64,
            included: usize::from(item.included()),
            total: 1,
        }
    }

    fn merge(self, other: &Aggregate) -> Self {
        Self {
            size: self.size + other.size,
            weighted_progress: self.weighted_progress + other.weighted_progress,
            included: self.included + other.included,
            total: self.total + other.total,
        }
    }

    pub fn average_progress(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.weighted_progress / self.size as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind<T> {
    Leaf(T),
    Branch(Vec<TreeNode<T>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<T> {
    pub id: String,
    pub name: String,
    pub aggregate: Aggregate,
    pub kind: NodeKind<T>,
}

impl<T> TreeNode<T> {
    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch(_))
    }

    pub fn children(&self) -> &[TreeNode<T>] {
        match &self.kind {
            NodeKind::Branch(children) => children,
            NodeKind::Leaf(_) => &[],
        }
    }

    pub fn item(&self) -> Option<&T> {
        match &self.kind {
            NodeKind::Leaf(item) => Some(item),
            NodeKind::Branch(_) => None,
        }
    }

    pub fn leaf_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.aggregate.total);
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                NodeKind::Leaf(_) => ids.push(node.id.clone()),
                NodeKind::Branch(children) => stack.extend(children.iter().rev()),
            }
        }
        ids
    }
}

impl<T: TreeItem> TreeNode<T> {
    pub fn progress(&self) -> f64 {
        match &self.kind {
            NodeKind::Leaf(item) => clamp_progress(item.progress()),
            NodeKind::Branch(_) => self.aggregate.average_progress(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyPath,
    Shadowed,
    Duplicate,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::EmptyPath => "path has no segments",
            SkipReason::Shadowed => "path is also a directory",
            SkipReason::Duplicate => "path appears more than once",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTree<T> {
    pub roots: Vec<TreeNode<T>>,
    pub branch_ids: Vec<String>,
    // never fatal
    pub skipped: Vec<SkippedItem>,
}

impl<T> BuiltTree<T> {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn total(&self) -> Aggregate {
        self.roots
            .iter()
            .fold(Aggregate::default(), |acc, node| acc.merge(&node.aggregate))
    }
}

struct Draft<T> {
    item: Option<T>,
    children: BTreeMap<String, Draft<T>>,
}

impl<T> Default for Draft<T> {
    fn default() -> Self {
        Self {
            item: None,
            children: BTreeMap::new(),
        }
    }
}

pub fn build_tree<T, I>(items: I) -> BuiltTree<T>
where
    T: TreeItem,
    I: IntoIterator<Item = T>,
{
    build_tree_with(items, &NoOverride)
}

pub fn build_tree_with<T, I, O>(items: I, overrides: &O) -> BuiltTree<T>
where
    T: TreeItem,
    I: IntoIterator<Item = T>,
    O: NameOverride + ?Sized,
{
    let mut items: Vec<T> = items.into_iter().collect();
    items.sort_by(|a, b| a.path().cmp(b.path()));

    let mut top: BTreeMap<String, Draft<T>> = BTreeMap::new();
    let mut branch_ids = Vec::new();
    let mut skipped = Vec::new();

    for item in items {
        let segments: Vec<String> = split_segments(item.path()).map(str::to_owned).collect();
        let Some((last, parents)) = segments.split_last() else {
            skipped.push(SkippedItem {
                path: item.path().to_string(),
                reason: SkipReason::EmptyPath,
            });
            continue;
        };

        let mut level = &mut top;
        let mut prefix = String::new();
        for segment in parents {
            push_segment(&mut prefix, segment);
            let draft = level.entry(segment.clone()).or_default();
            if draft.children.is_empty() {
                branch_ids.push(prefix.clone());
            }
            level = &mut draft.children;
        }

        let draft = level.entry(last.clone()).or_default();
        if let Some(previous) = draft.item.replace(item) {
            skipped.push(SkippedItem {
                path: previous.path().to_string(),
                reason: SkipReason::Duplicate,
            });
        }
    }

    let mut roots: Vec<TreeNode<T>> = top
        .into_iter()
        .filter_map(|(segment, draft)| finalize(segment, draft, "", overrides, &mut skipped))
        .collect();
    sort_nodes(&mut roots);

    BuiltTree {
        roots,
        branch_ids,
        skipped,
    }
}

fn finalize<T, O>(
    segment: String,
    draft: Draft<T>,
    prefix: &str,
    overrides: &O,
    skipped: &mut Vec<SkippedItem>,
) -> Option<TreeNode<T>>
where
    T: TreeItem,
    O: NameOverride + ?Sized,
{
    let mut id = prefix.to_string();
    push_segment(&mut id, &segment);
    let name = overrides.display_name(&id).unwrap_or(segment);

    if draft.children.is_empty() {
        let item = draft.item?;
        return Some(TreeNode {
            aggregate: Aggregate::from_item(&item),
            id,
            name,
            kind: NodeKind::Leaf(item),
        });
    }

    if let Some(item) = draft.item {
        skipped.push(SkippedItem {
            path: item.path().to_string(),
            reason: SkipReason::Shadowed,
        });
    }

    let mut children: Vec<TreeNode<T>> = draft
        .children
        .into_iter()
        .filter_map(|(segment, child)| finalize(segment, child, &id, overrides, skipped))
        .collect();
    sort_nodes(&mut children);
    let aggregate = children
        .iter()
        .fold(Aggregate::default(), |acc, child| acc.merge(&child.aggregate));

    Some(TreeNode {
        id,
        name,
        aggregate,
        kind: NodeKind::Branch(children),
    })
}

pub fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

pub fn normalize_path(path: &str) -> String {
    split_segments(path).collect::<Vec<_>>().join("/")
}

fn push_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(segment);
}

fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn sort_nodes<T>(nodes: &mut [TreeNode<T>]) {
    nodes.sort_by(|a, b| {
        b.is_branch()
            .cmp(&a.is_branch())
            .then_with(|| compare_names(&a.name, &b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Case-insensitive, with digit runs compared by value ("E2" < "E10").
pub fn compare_names(left: &str, right: &str) -> Ordering {
    let mut a = left.chars().peekable();
    let mut b = right.chars().peekable();
    loop {
        let ordering = match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return left.cmp(right),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let xs = take_digits(&mut a);
                let ys = take_digits(&mut b);
                compare_digit_runs(&xs, &ys)
            }
            (Some(x), Some(y)) => {
                a.next();
                b.next();
                x.to_lowercase().cmp(y.to_lowercase())
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

fn compare_digit_runs(left: &str, right: &str) -> Ordering {
    let left = left.trim_start_matches('0');
    let right = right.trim_start_matches('0');
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileEntry;
    use std::collections::BTreeSet;

    fn entry(path: &str, size: u64, progress: f64) -> FileEntry {
        FileEntry::new(path, size, progress, true)
    }

    fn sample() -> Vec<FileEntry> {
        vec![
            entry("a/b.txt", 100, 1.0),
            entry("a/c.txt", 300, 0.5),
            entry("d.txt", 50, 0.0),
        ]
    }

    fn all_nodes<T>(roots: &[TreeNode<T>]) -> Vec<&TreeNode<T>> {
        let mut out = Vec::new();
        let mut stack: Vec<&TreeNode<T>> = roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children().iter().rev());
        }
        out
    }

    #[test]
    fn builds_example_tree_with_rollups() {
        let tree = build_tree(sample());
        assert_eq!(tree.roots.len(), 2);

        let a = &tree.roots[0];
        assert_eq!(a.id, "a");
        assert!(a.is_branch());
        assert_eq!(a.aggregate.size, 400);
        assert_eq!(a.aggregate.weighted_progress, 250.0);
        assert_eq!(a.progress(), 0.625);
        let names: Vec<&str> = a.children().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["b.txt", "c.txt"]);
        assert_eq!(a.children()[1].id, "a/c.txt");

        let d = &tree.roots[1];
        assert_eq!(d.id, "d.txt");
        assert!(!d.is_branch());
        assert_eq!(tree.branch_ids, ["a"]);
        assert!(tree.skipped.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_tree() {
        let tree = build_tree(Vec::<FileEntry>::new());
        assert!(tree.is_empty());
        assert!(tree.branch_ids.is_empty());
        assert_eq!(tree.total(), Aggregate::default());
    }

    #[test]
    fn malformed_paths_are_skipped() {
        let mut items = sample();
        items.push(entry("", 10, 0.0));
        items.push(entry("///", 10, 0.0));
        let tree = build_tree(items);
        assert_eq!(tree.total().total, 3);
        assert_eq!(tree.skipped.len(), 2);
        assert!(tree
            .skipped
            .iter()
            .all(|skip| skip.reason == SkipReason::EmptyPath));
    }

    #[test]
    fn redundant_slashes_collapse() {
        let tree = build_tree(vec![entry("/a//b.txt/", 10, 0.0), entry("a/c.txt", 5, 0.0)]);
        assert_eq!(tree.roots.len(), 1);
        let ids: Vec<&str> = tree.roots[0]
            .children()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, ["a/b.txt", "a/c.txt"]);
    }

    #[test]
    fn leaf_ids_match_valid_input_paths() {
        let items = vec![
            entry("x/y/z.bin", 1, 0.0),
            entry("x/y/w.bin", 2, 0.0),
            entry("x/v.bin", 3, 0.0),
            entry("u.bin", 4, 0.0),
        ];
        let expected: BTreeSet<String> = items.iter().map(|i| i.path.clone()).collect();
        let tree = build_tree(items);
        let found: BTreeSet<String> = tree.roots.iter().flat_map(|n| n.leaf_ids()).collect();
        assert_eq!(found, expected);
        assert_eq!(tree.branch_ids, ["x", "x/y"]);
    }

    #[test]
    fn branch_aggregates_sum_children() {
        let items = vec![
            FileEntry::new("m/n/1.dat", 10, 0.2, true),
            FileEntry::new("m/n/2.dat", 20, 0.4, false),
            FileEntry::new("m/o/3.dat", 30, 1.0, true),
            FileEntry::new("m/4.dat", 40, 0.0, false),
        ];
        let tree = build_tree(items);
        for node in all_nodes(&tree.roots) {
            if !node.is_branch() {
                continue;
            }
            let size: u64 = node.children().iter().map(|c| c.aggregate.size).sum();
            let included: usize = node.children().iter().map(|c| c.aggregate.included).sum();
            let total: usize = node.children().iter().map(|c| c.aggregate.total).sum();
            assert_eq!(node.aggregate.size, size);
            assert_eq!(node.aggregate.included, included);
            assert_eq!(node.aggregate.total, total);
        }
        assert_eq!(tree.roots[0].aggregate.size, 100);
        assert_eq!(tree.roots[0].aggregate.included, 2);
        assert_eq!(tree.roots[0].aggregate.total, 4);
    }

    #[test]
    fn branches_precede_leaves_in_name_order() {
        let items = vec![
            entry("root/zeta.txt", 1, 0.0),
            entry("root/Alpha.txt", 1, 0.0),
            entry("root/sub b/x", 1, 0.0),
            entry("root/Sub A/x", 1, 0.0),
            entry("root/Episode 10.mkv", 1, 0.0),
            entry("root/Episode 2.mkv", 1, 0.0),
        ];
        let tree = build_tree(items);
        let names: Vec<&str> = tree.roots[0]
            .children()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(
            names,
            ["Sub A", "sub b", "Alpha.txt", "Episode 2.mkv", "Episode 10.mkv", "zeta.txt"]
        );
    }

    #[test]
    fn build_is_deterministic_across_input_order() {
        let mut items = sample();
        let first = build_tree(items.clone());
        items.reverse();
        let second = build_tree(items);
        assert_eq!(first, second);
    }

    #[test]
    fn prefix_item_is_shadowed_by_branch() {
        let tree = build_tree(vec![entry("a", 7, 0.0), entry("a/b", 3, 0.0)]);
        assert_eq!(tree.roots.len(), 1);
        assert!(tree.roots[0].is_branch());
        assert_eq!(tree.roots[0].aggregate.size, 3);
        assert_eq!(tree.branch_ids, ["a"]);
        assert_eq!(
            tree.skipped,
            [SkippedItem {
                path: "a".to_string(),
                reason: SkipReason::Shadowed,
            }]
        );
    }

    #[test]
    fn duplicate_paths_keep_the_later_item() {
        let tree = build_tree(vec![entry("a/b", 1, 0.0), entry("a//b", 2, 0.0)]);
        let leaf = &tree.roots[0].children()[0];
        assert_eq!(leaf.aggregate.size, 1);
        assert_eq!(tree.skipped.len(), 1);
        assert_eq!(tree.skipped[0].path, "a//b");
        assert_eq!(tree.skipped[0].reason, SkipReason::Duplicate);
    }

    #[test]
    fn overrides_rename_nodes_and_drive_ordering() {
        let rename = |id: &str| match id {
            "b" => Some("0".to_string()),
            _ => None,
        };
        let tree = build_tree_with(vec![entry("a", 1, 0.0), entry("b", 1, 0.0)], &rename);
        assert_eq!(tree.roots[0].id, "b");
        assert_eq!(tree.roots[0].name, "0");
        assert_eq!(tree.roots[1].name, "a");
    }

    #[test]
    fn borrowed_items_build_trees() {
        let items = sample();
        let tree = build_tree(items.iter());
        assert_eq!(tree.roots[0].aggregate.size, 400);
        assert_eq!(tree.roots[1].item().map(|i| i.size), Some(50));
    }

    #[test]
    fn progress_is_clamped() {
        let tree = build_tree(vec![entry("a/x", 10, 3.0), entry("a/y", 10, -1.0)]);
        assert_eq!(tree.roots[0].aggregate.weighted_progress, 10.0);
        assert_eq!(tree.roots[0].children()[0].progress(), 1.0);
    }

    #[test]
    fn zero_size_branch_has_zero_progress() {
        let tree = build_tree(vec![entry("a/x", 0, 1.0)]);
        assert_eq!(tree.roots[0].progress(), 0.0);
    }

    #[test]
    fn normalize_path_drops_empty_segments() {
        assert_eq!(normalize_path("//a///b/"), "a/b");
        assert_eq!(normalize_path("///"), "");
    }

    #[test]
    fn compare_names_handles_digits_and_case() {
        assert_eq!(compare_names("file2", "file10"), Ordering::Less);
        assert_eq!(compare_names("File", "file"), Ordering::Less);
        assert_eq!(compare_names("abc", "ABD"), Ordering::Less);
        assert_eq!(compare_names("a", "a"), Ordering::Equal);
        assert_eq!(compare_names("x01", "x1"), Ordering::Less);
        assert_eq!(compare_names("ab", "a"), Ordering::Greater);
    }
}
