//! Renders a depth-first folder sequence as nested list markup.
//!
//! Single pass with a depth cursor; the number of open levels never exceeds
//! the depth of the tree.

use crate::models::folder::FolderNode;
use std::fmt::Write;

/// Rendered in place of an empty tree.
pub const EMPTY_TREE: &str = "<ul><li>No subfolders</li></ul>";

/// Render depth-annotated folders, in depth-first order, as nested `<ul>`s.
///
/// Depths are relative to the first node. A deeper node opens one level per
/// step, a shallower one closes one level per step before its sibling; every
/// level still open is closed at the end.
pub fn render(nodes: &[FolderNode]) -> String {
    let Some(first) = nodes.first() else {
        return EMPTY_TREE.to_string();
    };

    let base = first.depth;
    let mut cursor = base;
    let mut out = String::from("<ul><li>");
    push_item(&mut out, first);

    for node in &nodes[1..] {
        let depth = node.depth.max(base);
        if depth > cursor {
            for _ in cursor..depth {
                out.push_str("<ul><li>");
            }
        } else {
            out.push_str("</li>");
            for _ in depth..cursor {
                out.push_str("</ul></li>");
            }
            out.push_str("<li>");
        }
        push_item(&mut out, node);
        cursor = depth;
    }

    out.push_str("</li>");
    for _ in base..cursor {
        out.push_str("</ul></li>");
    }
    out.push_str("</ul>");
    out
}

fn push_item(out: &mut String, node: &FolderNode) {
    let _ = write!(
        out,
        "<a href=\"/folders/{}\">{}</a> ({})",
        node.folder.id,
        escape(&node.folder.name),
        node.entry_count
    );
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
