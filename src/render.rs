use std::io::{self, Write};

use crate::{
    flatten::{ExpansionState, Row, Selection},
    model::{format_bytes, format_progress, TreeItem},
};

const INDENT: &str = "  ";

pub fn checkbox(selection: Selection) -> &'static str {
    match selection {
        Selection::All => "[x]",
        Selection::Partial => "[-]",
        Selection::None => "[ ]",
    }
}

pub fn row_line<T: TreeItem>(row: &Row<'_, T>, expanded: &ExpansionState) -> String {
    let node = row.node;
    let marker = if !node.is_branch() {
        " "
    } else if expanded.is_expanded(&node.id) {
        "▾"
    } else {
        "▸"
    };
    format!(
        "{}{} {} {}  {}  {}",
        INDENT.repeat(row.depth),
        marker,
        checkbox(node.selection()),
        node.name,
        format_bytes(node.aggregate.size),
        format_progress(node.progress())
    )
}

pub fn write_rows<W, T>(out: &mut W, rows: &[Row<'_, T>], expanded: &ExpansionState) -> io::Result<()>
where
    W: Write,
    T: TreeItem,
{
    for row in rows {
        writeln!(out, "{}", row_line(row, expanded))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use crate::model::FileEntry;
    use crate::tree::build_tree;

    #[test]
    fn lines_show_depth_marker_and_totals() {
        let tree = build_tree(vec![
            FileEntry::new("a/b.txt", 1024, 1.0, true),
            FileEntry::new("a/c.txt", 1024, 0.0, false),
        ]);
        let state = ExpansionState::default().reconcile(&tree.branch_ids);
        let rows = flatten(&tree.roots, &state);
        assert_eq!(
            row_line(&rows[0], &state),
            "▾ [-] a     2.0 KiB   50.0%"
        );
        assert_eq!(
            row_line(&rows[2], &state),
            "    [ ] c.txt     1.0 KiB    0.0%"
        );
        let collapsed = state.collapse("a");
        assert!(row_line(&rows[0], &collapsed).starts_with("▸ [-] a"));
    }

    #[test]
    fn write_rows_emits_one_line_per_row() {
        let tree = build_tree(vec![FileEntry::new("x", 1, 1.0, true)]);
        let state = ExpansionState::default();
        let rows = flatten(&tree.roots, &state);
        let mut out = Vec::new();
        write_rows(&mut out, &rows, &state).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("  [x] x"));
    }
}
