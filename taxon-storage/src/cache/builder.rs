//! Tree synthesis from an unordered list of category records.
//!
//! The build is two-pass so that the result never depends on the order in
//! which records arrive:
//!
//! 1. Create a node for every record (order independent), indexed by id.
//! 2. Link each node to its parent, then walk down from the root,
//!    materializing full paths. Whatever the walk does not reach is orphaned:
//!    missing parents, cycles and every descendant of either.
//!
//! Parent-before-child ordering is never assumed.

use std::collections::{HashMap, HashSet};

use taxon_core::{CategoryId, CategoryRecord, ScopeId, TaxonResult, TreeError};

use super::tree::{join_path, BuildReport, PathNode, PathTree};

/// Build the path tree of `scope_id` from its category records.
///
/// Fails with [`TreeError::IncompleteTree`] when no record has a null parent
/// and with [`TreeError::ScopeMismatch`] when a record belongs to another
/// scope. When several parentless records exist the smallest identifier
/// becomes the root; the others are reported in
/// [`BuildReport::extra_roots`] and their subtrees are orphaned.
pub fn build_tree(scope_id: ScopeId, records: Vec<CategoryRecord>) -> TaxonResult<PathTree> {
    let mut report = BuildReport::default();

    let mut unique: HashMap<CategoryId, CategoryRecord> = HashMap::with_capacity(records.len());
    let mut duplicates = HashSet::new();
    for record in records {
        if record.scope_id != scope_id {
            return Err(TreeError::ScopeMismatch {
                id: record.category_id.into(),
                expected: scope_id,
                found: record.scope_id,
            }
            .into());
        }
        if unique.contains_key(&record.category_id) {
            duplicates.insert(record.category_id);
            continue;
        }
        unique.insert(record.category_id, record);
    }
    // A duplicated id cannot be resolved without depending on input order.
    for id in &duplicates {
        unique.remove(id);
    }
    report.skipped.extend(duplicates);

    // Root election: smallest parentless identifier wins.
    let mut roots: Vec<CategoryId> = unique
        .values()
        .filter(|r| r.is_root())
        .map(|r| r.category_id)
        .collect();
    roots.sort_unstable();
    let Some(&root_id) = roots.first() else {
        return Err(TreeError::IncompleteTree { scope_id }.into());
    };
    if roots.len() > 1 {
        tracing::warn!(
            scope_id = %scope_id,
            root_id = %root_id,
            extra_roots = roots.len() - 1,
            "Multiple root records, keeping the smallest identifier"
        );
        report.extra_roots = roots[1..].to_vec();
    }

    // Pass 1: one node per usable record.
    let mut nodes: HashMap<CategoryId, PathNode> = HashMap::with_capacity(unique.len());
    for record in unique.values() {
        if record.category_id == root_id {
            nodes.insert(root_id, PathNode::new_root(record));
        } else if record.is_root() {
            continue;
        } else if !record.is_active {
            report.skipped.push(record.category_id);
        } else {
            nodes.insert(record.category_id, PathNode::new(record));
        }
    }

    // Pass 2: attach to parents present in the working set.
    let mut children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
    for node in nodes.values() {
        if let Some(parent_id) = node.parent_id() {
            if nodes.contains_key(&parent_id) {
                children.entry(parent_id).or_default().push(node.id());
            }
        }
    }

    // Materialize paths top-down; anything not reached is an orphan.
    let mut reached: HashMap<CategoryId, PathNode> = HashMap::with_capacity(nodes.len());
    let mut stack: Vec<(CategoryId, String, usize)> = vec![(root_id, String::new(), 0)];
    while let Some((id, parent_path, depth)) = stack.pop() {
        let Some(mut node) = nodes.remove(&id) else {
            continue;
        };
        if id != root_id {
            node.materialize(join_path(&parent_path, node.segment()), depth);
        }
        for child in children.remove(&id).unwrap_or_default() {
            node.adopt(child);
            stack.push((child, node.full_path().to_string(), depth + 1));
        }
        reached.insert(id, node);
    }

    if !nodes.is_empty() {
        let mut orphans: Vec<CategoryId> = nodes.into_keys().collect();
        orphans.sort_unstable();
        tracing::info!(
            scope_id = %scope_id,
            orphans = orphans.len(),
            "Orphaned categories excluded from tree"
        );
        tracing::debug!(scope_id = %scope_id, orphan_ids = ?orphans, "Orphan detail");
        report.orphans = orphans;
    }
    report.skipped.sort_unstable();

    let tree = PathTree::from_parts(scope_id, root_id, reached, report);
    tracing::debug!(scope_id = %scope_id, nodes = tree.len(), "Category tree built");
    Ok(tree)
}
