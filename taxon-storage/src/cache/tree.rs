//! Synthesized category path tree.
//!
//! A `PathTree` is an arena of [`PathNode`]s indexed by identifier and by
//! materialized full path. Parent links are identifiers, never owning
//! references; a node's children are kept ordered by identifier (UUIDv7,
//! so creation order).
//!
//! Trees are immutable once published. Mutations happen on a private clone
//! that replaces the published snapshot when complete (see
//! [`ScopeTree`](super::ScopeTree)), so readers never see a half-attached node.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::Serialize;
use taxon_core::{CategoryId, CategoryRecord, ScopeId, Timestamp};

/// Full path of the root node.
pub const ROOT_PATH: &str = "/";

/// One node of a path tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    id: CategoryId,
    segment: String,
    full_path: String,
    parent_id: Option<CategoryId>,
    children: BTreeSet<CategoryId>,
    is_active: bool,
    depth: usize,
}

impl PathNode {
    pub(crate) fn new(record: &CategoryRecord) -> Self {
        Self {
            id: record.category_id,
            segment: record.segment.clone(),
            full_path: String::new(),
            parent_id: record.parent_id,
            children: BTreeSet::new(),
            is_active: record.is_active,
            depth: 0,
        }
    }

    pub(crate) fn new_root(record: &CategoryRecord) -> Self {
        let mut node = Self::new(record);
        node.full_path = ROOT_PATH.to_string();
        node
    }

    pub(crate) fn materialize(&mut self, full_path: String, depth: usize) {
        self.full_path = full_path;
        self.depth = depth;
    }

    pub(crate) fn adopt(&mut self, child: CategoryId) {
        self.children.insert(child);
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    /// Display path segment (empty for the root).
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Slash-joined segment chain from the root, e.g. `/a1/a2`.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn parent_id(&self) -> Option<CategoryId> {
        self.parent_id
    }

    /// Child identifiers in creation order.
    pub fn children(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.children.iter().copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of edges between this node and the root.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Join a parent path and a child segment.
pub fn join_path(parent_path: &str, segment: &str) -> String {
    if parent_path == ROOT_PATH {
        format!("/{segment}")
    } else {
        format!("{parent_path}/{segment}")
    }
}

/// Normalize a lookup path: leading slash, no trailing or repeated slashes.
/// Empty input and `/` both denote the root.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// What a build discarded, kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Records whose ancestry does not reach the root, sorted.
    pub orphans: Vec<CategoryId>,
    /// Parentless records that lost the root election, sorted.
    pub extra_roots: Vec<CategoryId>,
    /// Records skipped because they were inactive or duplicated.
    pub skipped: Vec<CategoryId>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.extra_roots.is_empty() && self.skipped.is_empty()
    }
}

/// A consistent, rooted category tree for one scope.
#[derive(Debug, Clone)]
pub struct PathTree {
    scope_id: ScopeId,
    root_id: CategoryId,
    nodes: HashMap<CategoryId, PathNode>,
    paths: HashMap<String, CategoryId>,
    report: BuildReport,
    built_at: Timestamp,
    revision: u64,
}

impl PathTree {
    pub(crate) fn from_parts(
        scope_id: ScopeId,
        root_id: CategoryId,
        nodes: HashMap<CategoryId, PathNode>,
        report: BuildReport,
    ) -> Self {
        let mut tree = Self {
            scope_id,
            root_id,
            paths: HashMap::with_capacity(nodes.len()),
            nodes,
            report,
            built_at: Utc::now(),
            revision: 0,
        };
        let mut ids: Vec<CategoryId> = tree.nodes.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            tree.index_path(id);
        }
        tree
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub fn root_id(&self) -> CategoryId {
        self.root_id
    }

    pub fn root(&self) -> Option<&PathNode> {
        self.nodes.get(&self.root_id)
    }

    /// What the build that produced this tree discarded.
    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn built_at(&self) -> Timestamp {
        self.built_at
    }

    /// Number of incremental mutations applied since the build.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// O(1) lookup by identifier.
    pub fn get(&self, id: CategoryId) -> Option<&PathNode> {
        self.nodes.get(&id)
    }

    /// Lookup by full path. The path is normalized first.
    pub fn resolve_path(&self, path: &str) -> Option<&PathNode> {
        self.paths
            .get(&normalize_path(path))
            .and_then(|id| self.nodes.get(id))
    }

    /// Direct children of `id`, in creation order.
    pub fn children(&self, id: CategoryId) -> Vec<&PathNode> {
        self.nodes
            .get(&id)
            .map(|node| node.children.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// Chain from the root down to (and including) `id`.
    pub fn ancestors(&self, id: CategoryId) -> Vec<&PathNode> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            chain.push(node);
            current = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        chain.reverse();
        chain
    }

    /// Every node below `id`, pre-order. Does not include `id` itself.
    pub fn descendants(&self, id: CategoryId) -> Vec<&PathNode> {
        let mut out = Vec::new();
        let Some(start) = self.nodes.get(&id) else {
            return out;
        };
        let mut stack: Vec<CategoryId> = start.children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(node);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// True if `candidate` is `ancestor` or lies below it.
    pub fn is_within(&self, candidate: CategoryId, ancestor: CategoryId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent_id);
        }
        false
    }

    // ------------------------------------------------------------------------
    // Mutation (only ever applied to an unpublished clone)
    // ------------------------------------------------------------------------

    /// Attach a new leaf under its (present) parent. Returns false if the
    /// parent is missing or the id already exists.
    pub(crate) fn insert_leaf(&mut self, record: &CategoryRecord) -> bool {
        let Some(parent_id) = record.parent_id else {
            return false;
        };
        if self.nodes.contains_key(&record.category_id) {
            return false;
        }
        let Some(parent) = self.nodes.get_mut(&parent_id) else {
            return false;
        };
        parent.children.insert(record.category_id);
        let mut node = PathNode::new(record);
        node.full_path = join_path(&parent.full_path, &node.segment);
        node.depth = parent.depth + 1;
        self.nodes.insert(node.id, node);
        self.index_path(record.category_id);
        self.revision += 1;
        true
    }

    /// Change a node's segment and re-materialize its subtree's paths.
    pub(crate) fn rename(&mut self, id: CategoryId, segment: &str) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.parent_id.is_some() => node.segment = segment.to_string(),
            _ => return false,
        }
        self.rematerialize(id);
        self.revision += 1;
        true
    }

    /// Move `id` (and its subtree) under `new_parent`. The caller guarantees
    /// that `new_parent` exists and is not inside the moved subtree.
    pub(crate) fn reparent(&mut self, id: CategoryId, new_parent: CategoryId) -> bool {
        if !self.nodes.contains_key(&new_parent) || self.is_within(new_parent, id) {
            return false;
        }
        let Some(old_parent) = self.nodes.get(&id).and_then(|n| n.parent_id) else {
            return false;
        };
        if let Some(parent) = self.nodes.get_mut(&old_parent) {
            parent.children.remove(&id);
        }
        if let Some(parent) = self.nodes.get_mut(&new_parent) {
            parent.children.insert(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = Some(new_parent);
        }
        self.rematerialize(id);
        self.revision += 1;
        true
    }

    /// Remove `id` and its whole subtree. Returns the removed identifiers.
    pub(crate) fn detach(&mut self, id: CategoryId) -> Vec<CategoryId> {
        let Some(parent_id) = self.nodes.get(&id).and_then(|n| n.parent_id) else {
            return Vec::new();
        };
        let mut removed_ids = vec![id];
        removed_ids.extend(self.descendants(id).into_iter().map(|n| n.id));

        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.remove(&id);
        }
        let mut top_path = None;
        for removed in &removed_ids {
            if let Some(node) = self.nodes.remove(removed) {
                if self.paths.get(&node.full_path) == Some(removed) {
                    self.paths.remove(&node.full_path);
                }
                if node.id == id {
                    top_path = Some(node.full_path);
                }
            }
        }
        if let Some(path) = top_path {
            self.reclaim_path(parent_id, &path);
        }
        self.revision += 1;
        removed_ids
    }

    /// Recompute full path and depth of `id` and everything below it.
    fn rematerialize(&mut self, id: CategoryId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(parent_id) = self.nodes.get(&current).and_then(|n| n.parent_id) else {
                continue;
            };
            let Some((parent_path, parent_depth)) = self
                .nodes
                .get(&parent_id)
                .map(|p| (p.full_path.clone(), p.depth))
            else {
                continue;
            };
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            let new_path = join_path(&parent_path, &node.segment);
            node.depth = parent_depth + 1;
            stack.extend(node.children.iter().copied());
            if node.full_path != new_path {
                let old_path = std::mem::replace(&mut node.full_path, new_path);
                if self.paths.get(&old_path) == Some(&current) {
                    self.paths.remove(&old_path);
                    self.reclaim_path(parent_id, &old_path);
                }
                self.index_path(current);
            }
        }
    }

    /// Register `id` under its full path. Sibling collisions resolve to the
    /// smaller identifier so the result does not depend on arrival order.
    fn index_path(&mut self, id: CategoryId) {
        let Some(path) = self.nodes.get(&id).map(|n| n.full_path.clone()) else {
            return;
        };
        match self.paths.get(&path).copied() {
            None => {
                self.paths.insert(path, id);
            }
            Some(existing) if existing == id => {}
            Some(existing) => {
                tracing::warn!(
                    scope_id = %self.scope_id,
                    path = %path,
                    kept = %existing.min(id),
                    shadowed = %existing.max(id),
                    "Sibling segment collision"
                );
                if id < existing {
                    self.paths.insert(path, id);
                }
            }
        }
    }

    /// After `path` was vacated, hand it to a remaining sibling that shares it.
    fn reclaim_path(&mut self, parent_id: CategoryId, path: &str) {
        if self.paths.contains_key(path) {
            return;
        }
        let heir = self.nodes.get(&parent_id).and_then(|parent| {
            parent
                .children
                .iter()
                .copied()
                .find(|c| self.nodes.get(c).is_some_and(|n| n.full_path == path))
        });
        if let Some(heir) = heir {
            self.paths.insert(path.to_string(), heir);
        }
    }
}
