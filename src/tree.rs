//! Builds the sorted entry hierarchy handed to presentation.
//!
//! Archive formats promise nothing about entry order: a file can
//! appear before its parent directory, directories may be implicit,
//! and separators can be duplicated. The builder keys every node by
//! its full normalized path during insertion, so the finished tree's
//! shape doesn't depend on insertion order.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::entry::ArchiveEntry;

/// One node in the entry hierarchy.
///
/// Nodes exclusively own their children; there are no back-references,
/// and nothing mutates the tree after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// A single path component, not the full path.
    pub name: String,

    /// True for directories, including synthesized intermediates.
    pub is_dir: bool,

    /// Size in bytes; directories carry no size.
    pub size: Option<u64>,

    /// Last modification time, when the entry had one.
    pub modified: Option<NaiveDateTime>,

    /// Ordered children: `Some` (possibly empty) for directories,
    /// `None` for files.
    pub children: Option<Vec<TreeNode>>,
}

/// Mutable node used while the tree is under construction.
struct BuildNode {
    name: String,
    is_dir: bool,
    size: Option<u64>,
    modified: Option<NaiveDateTime>,
    children: Vec<usize>,
}

impl BuildNode {
    fn synthesized(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_dir: true,
            size: None,
            modified: None,
            children: Vec::new(),
        }
    }
}

/// Organizes a flat entry list into a forest of root-level nodes,
/// synthesizing any missing intermediate directories.
///
/// Children end up sorted directories-first, then by case-insensitive
/// name; the result is identical for any permutation of `entries`.
pub fn build_tree(entries: &[ArchiveEntry]) -> Vec<TreeNode> {
    let mut arena: Vec<BuildNode> = vec![BuildNode::synthesized("")];
    let mut index_by_path: HashMap<String, usize> = HashMap::new();
    index_by_path.insert(String::new(), 0);

    for entry in entries {
        insert_entry(entry, &mut arena, &mut index_by_path);
    }

    let roots = arena[0].children.clone();
    let mut forest: Vec<TreeNode> = roots
        .into_iter()
        .map(|child| materialize(&arena, child))
        .collect();
    sort_nodes(&mut forest);
    forest
}

fn insert_entry(
    entry: &ArchiveEntry,
    arena: &mut Vec<BuildNode>,
    index_by_path: &mut HashMap<String, usize>,
) {
    // Splitting on `/` and dropping empties handles trailing directory
    // separators as well as duplicated or leading ones.
    let components: Vec<&str> = entry
        .path
        .as_str()
        .split('/')
        .filter(|component| !component.is_empty())
        .collect();
    if components.is_empty() {
        return;
    }

    let mut parent = 0;
    let mut full_path = String::new();
    for (depth, component) in components.iter().enumerate() {
        if !full_path.is_empty() {
            full_path.push('/');
        }
        full_path.push_str(component);

        // Reuse the node if this path was already seen (as an explicit
        // entry or a synthesized parent); otherwise create it.
        let index = match index_by_path.get(&full_path) {
            Some(&index) => index,
            None => {
                let index = arena.len();
                arena.push(BuildNode::synthesized(component));
                arena[parent].children.push(index);
                index_by_path.insert(full_path.clone(), index);
                index
            }
        };

        // The entry's own metadata lands only on its final component;
        // synthesized intermediates stay bare directories.
        if depth + 1 == components.len() {
            let node = &mut arena[index];
            node.is_dir = entry.is_dir;
            node.size = if entry.is_dir { None } else { Some(entry.size) };
            node.modified = entry.modified;
        }
        parent = index;
    }
}

fn materialize(arena: &[BuildNode], index: usize) -> TreeNode {
    let node = &arena[index];
    // A "file" that acquired children (a path used both ways) stays a
    // directory so no inserted entry is lost.
    let is_dir = node.is_dir || !node.children.is_empty();
    let children = if is_dir {
        Some(
            node.children
                .iter()
                .map(|&child| materialize(arena, child))
                .collect(),
        )
    } else {
        None
    };
    TreeNode {
        name: node.name.clone(),
        is_dir,
        size: if is_dir { None } else { node.size },
        modified: node.modified,
        children,
    }
}

/// Recursively sorts children: directories before files, then
/// case-insensitive name order.
fn sort_nodes(nodes: &mut [TreeNode]) {
    nodes.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    for node in nodes {
        if let Some(children) = &mut node.children {
            sort_nodes(children);
        }
    }
}
