//! Bidirectional map between rids and tree paths.

use super::{Arena, NodeId, Path, Rid};
use crate::error::{Result, TreeError};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use tracing::{debug, warn};

/// Largest magnitude a rid may take, so ids stay exact in JSON clients.
pub const MAX_RID: Rid = (1 << 53) - 1;

/// Something [`IdentityIndex::contained_rids`] can resolve to a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    Rid(Rid),
    Path(Path),
}

impl From<Rid> for Identifier {
    fn from(rid: Rid) -> Self {
        Identifier::Rid(rid)
    }
}

impl From<Path> for Identifier {
    fn from(path: Path) -> Self {
        Identifier::Path(path)
    }
}

/// Keeps `rid -> path` and `path -> rid` as mutual inverses for every
/// resource reachable from `root`.
///
/// `path_to_rid` is ordered so the strict descendants of a path form one
/// contiguous range directly after it.
#[derive(Clone, Debug)]
pub struct IdentityIndex {
    root: NodeId,
    rid_to_path: HashMap<Rid, Path>,
    path_to_rid: BTreeMap<Path, Rid>,
}

impl IdentityIndex {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            rid_to_path: HashMap::new(),
            path_to_rid: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.rid_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rid_to_path.is_empty()
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.rid_to_path.contains_key(&rid)
    }

    pub fn contains_path(&self, path: &[String]) -> bool {
        self.path_to_rid.contains_key(path)
    }

    pub fn get(&self, rid: Rid) -> Option<&Path> {
        self.rid_to_path.get(&rid)
    }

    pub fn get_rid(&self, path: &[String]) -> Option<Rid> {
        self.path_to_rid.get(path).copied()
    }

    pub fn get_resource(&self, arena: &Arena, rid: Rid) -> Option<NodeId> {
        let path = self.rid_to_path.get(&rid)?;
        arena.resolve(self.root, path)
    }

    /// All `(rid, path)` pairs ordered by path.
    pub fn entries(&self) -> impl Iterator<Item = (Rid, &Path)> + '_ {
        self.path_to_rid.iter().map(|(p, r)| (*r, p))
    }

    /// Draw an unused, non-zero rid from `[-MAX_RID, MAX_RID]`.
    pub fn new_rid(&self) -> Rid {
        let mut rng = rand::thread_rng();
        loop {
            let rid = rng.gen_range(-MAX_RID..=MAX_RID);
            if rid != 0 && !self.rid_to_path.contains_key(&rid) {
                return rid;
            }
        }
    }

    /// Index `id` and its whole subtree. `id` must be the root or hang
    /// below it. Missing rids are allocated on the way.
    pub fn add(&mut self, arena: &mut Arena, id: NodeId) -> Result<Rid> {
        arena.node(id)?;
        if !arena.reaches(id, self.root) {
            return Err(TreeError::NotAttached);
        }
        self.add_subtree(arena, id)
    }

    /// Check every node of the subtree before touching either map, so a
    /// conflict anywhere below `id` leaves the index unchanged.
    fn add_subtree(&mut self, arena: &mut Arena, id: NodeId) -> Result<Rid> {
        let nodes = arena.subtree(id);
        let mut planned: Vec<(NodeId, Path, Rid, bool)> = Vec::with_capacity(nodes.len());
        let mut claimed = BTreeSet::new();
        for node in &nodes {
            let path = arena.path_of(*node);
            let rid = match arena.node(*node)?.rid {
                Some(rid) => rid,
                None => loop {
                    let rid = self.new_rid();
                    if !claimed.contains(&rid) {
                        break rid;
                    }
                },
            };
            if !claimed.insert(rid) {
                warn!(rid, path = %path.join("/"), "rid repeated inside subtree");
                return Err(TreeError::IdentityConflict(format!(
                    "rid {} appears twice below /{}",
                    rid,
                    arena.path_of(id).join("/")
                )));
            }
            let fresh = self.check_entry(&path, rid)?;
            planned.push((*node, path, rid, fresh));
        }

        for (node, path, rid, fresh) in planned {
            arena.node_mut(node)?.rid = Some(rid);
            if fresh {
                debug!(rid, path = %path.join("/"), "indexing resource");
                self.path_to_rid.insert(path.clone(), rid);
                self.rid_to_path.insert(rid, path);
            }
        }
        for node in &nodes {
            arena.sync_order_rids(*node);
        }
        arena.node(id)?.rid.ok_or(TreeError::NotAttached)
    }

    /// `Ok(true)` when `(path, rid)` is new to the index, `Ok(false)` when
    /// it is already recorded exactly.
    fn check_entry(&self, path: &Path, rid: Rid) -> Result<bool> {
        let existing = self.path_to_rid.get(path).copied();
        let indexed = self.rid_to_path.get(&rid);
        match (existing, indexed) {
            (None, None) => Ok(true),
            (Some(existing), Some(indexed)) if existing == rid && indexed == path => Ok(false),
            (Some(existing), _) => {
                warn!(rid, existing, path = %path.join("/"), "path already indexed");
                Err(TreeError::IdentityConflict(format!(
                    "path /{} already maps to rid {}",
                    path.join("/"),
                    existing
                )))
            }
            (None, Some(indexed)) => {
                warn!(rid, path = %path.join("/"), "rid already indexed");
                Err(TreeError::IdentityConflict(format!(
                    "rid {} already maps to /{}",
                    rid,
                    indexed.join("/")
                )))
            }
        }
    }

    /// Remove `rid` and every rid below it.
    pub fn remove(&mut self, rid: Rid) -> Result<BTreeSet<Rid>> {
        let mut doomed = self.contained_rids(Identifier::Rid(rid))?;
        doomed.insert(rid);
        for r in &doomed {
            if let Some(path) = self.rid_to_path.remove(r) {
                self.path_to_rid.remove(&path);
            }
        }
        debug!(rid, removed = doomed.len(), "removed from index");
        Ok(doomed)
    }

    /// Rids whose path strictly extends the path `item` resolves to.
    pub fn contained_rids(&self, item: impl Into<Identifier>) -> Result<BTreeSet<Rid>> {
        let path = match item.into() {
            Identifier::Rid(rid) => self
                .rid_to_path
                .get(&rid)
                .cloned()
                .ok_or_else(|| TreeError::rid_missing(rid))?,
            Identifier::Path(path) => {
                if !self.path_to_rid.contains_key(&path) {
                    return Err(TreeError::NotFound(format!("path /{}", path.join("/"))));
                }
                path
            }
        };
        let found = self
            .path_to_rid
            .range::<Path, _>((Bound::Excluded(path.clone()), Bound::Unbounded))
            .take_while(|(p, _)| p.starts_with(&path))
            .map(|(_, rid)| *rid)
            .collect();
        Ok(found)
    }

    /// Give every node below and including `id` a rid, replacing existing
    /// ones when `reset` is set. Works on detached subtrees.
    pub fn check_rids(&self, arena: &mut Arena, id: NodeId, reset: bool) -> Result<()> {
        let nodes = arena.subtree(id);
        let mut issued = BTreeSet::new();
        for node in &nodes {
            let resource = arena.node_mut(*node)?;
            if reset || resource.rid.is_none() {
                let rid = loop {
                    let rid = self.new_rid();
                    if issued.insert(rid) {
                        break rid;
                    }
                };
                resource.rid = Some(rid);
            }
        }
        for node in nodes {
            arena.sync_order_rids(node);
        }
        Ok(())
    }

    /// Drop both maps and index the tree again from the root.
    pub fn rebuild(&mut self, arena: &mut Arena) -> Result<()> {
        self.rid_to_path.clear();
        self.path_to_rid.clear();
        self.add_subtree(arena, self.root)?;
        Ok(())
    }

    /// Check bijectivity and that every indexed rid is a reachable node.
    pub fn verify(&self, arena: &Arena) -> Result<()> {
        let reachable = arena.subtree(self.root);
        for id in &reachable {
            let path = arena.path_of(*id);
            let rid = arena
                .node(*id)?
                .rid
                .ok_or_else(|| TreeError::IdentityConflict(format!("/{} has no rid", path.join("/"))))?;
            if self.get_rid(&path) != Some(rid) || self.get(rid) != Some(&path) {
                return Err(TreeError::IdentityConflict(format!(
                    "/{} (rid {}) is not indexed consistently",
                    path.join("/"),
                    rid
                )));
            }
        }
        if self.rid_to_path.len() != reachable.len() || self.path_to_rid.len() != reachable.len() {
            return Err(TreeError::IdentityConflict(format!(
                "index holds {} rids for {} reachable resources",
                self.rid_to_path.len(),
                reachable.len()
            )));
        }
        Ok(())
    }

    /// Restore maps from persisted pairs. Call [`verify`](Self::verify)
    /// afterwards.
    pub(crate) fn load_entries(&mut self, entries: impl IntoIterator<Item = (Rid, Path)>) -> Result<()> {
        for (rid, path) in entries {
            if self.rid_to_path.contains_key(&rid) || self.path_to_rid.contains_key(&path) {
                return Err(TreeError::IdentityConflict(format!(
                    "duplicate entry for rid {}",
                    rid
                )));
            }
            self.path_to_rid.insert(path.clone(), rid);
            self.rid_to_path.insert(rid, path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{AddOptions, ResourceKind, ResourceTree};

    fn names(parts: &[&str]) -> Path {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_is_indexed_with_empty_path() {
        let tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let rid = tree.resource(tree.root()).unwrap().rid().unwrap();
        assert_eq!(tree.index().get(rid), Some(&Vec::new()));
        assert_eq!(tree.index().get_rid(&[]), Some(rid));
    }

    #[test]
    fn add_requires_attachment() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let loose = tree.create(ResourceKind::Folder);
        let root = tree.index.root();
        let mut index = IdentityIndex::new(root);
        let err = index.add(&mut tree.arena, loose).unwrap_err();
        assert!(matches!(err, TreeError::NotAttached));
    }

    #[test]
    fn add_assigns_missing_rid_and_is_idempotent() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let node = tree.create(ResourceKind::Folder);
        tree.add(root, "n", node, AddOptions::default()).unwrap();
        let rid = tree.resource(node).unwrap().rid().unwrap();
        assert_ne!(rid, 0);
        assert!(rid.abs() <= MAX_RID);
        assert_eq!(tree.index().get(rid), Some(&names(&["n"])));
        let again = tree.index.add(&mut tree.arena, node).unwrap();
        assert_eq!(again, rid);
        assert_eq!(tree.index().len(), 2);
    }

    #[test]
    fn duplicate_rid_is_a_conflict() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let first = tree.create_with_rid(ResourceKind::Folder, 123);
        tree.add(root, "n", first, AddOptions::default()).unwrap();
        let other = tree.create_with_rid(ResourceKind::Folder, 123);
        let err = tree
            .add(root, "other", other, AddOptions::default())
            .unwrap_err();
        assert!(matches!(err, TreeError::IdentityConflict(_)));
        assert!(err.is_fatal());
        // the failed add left the tree as it was
        assert!(!tree.contains(root, "other"));
        assert_eq!(tree.index().get(123), Some(&names(&["n"])));
    }

    #[test]
    fn conflict_below_the_added_resource_leaves_no_entries() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let taken = tree.create_with_rid(ResourceKind::Folder, 123);
        tree.add(root, "taken", taken, AddOptions::default()).unwrap();

        let a = tree.create_with_rid(ResourceKind::Folder, 500);
        let fresh = tree.create(ResourceKind::Folder);
        let b = tree.create_with_rid(ResourceKind::Folder, 123);
        tree.add(a, "fresh", fresh, AddOptions::default()).unwrap();
        tree.add(a, "b", b, AddOptions::default()).unwrap();

        let err = tree.add(root, "a", a, AddOptions::default()).unwrap_err();
        assert!(matches!(err, TreeError::IdentityConflict(_)));
        assert!(!tree.contains(root, "a"));
        assert!(!tree.index().contains(500));
        assert_eq!(tree.index().get_rid(&names(&["a"])), None);
        assert_eq!(tree.index().get(123), Some(&names(&["taken"])));
        assert_eq!(tree.index().len(), 2);
        tree.verify_index().unwrap();
    }

    #[test]
    fn failed_move_restores_source_entries_only() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let d = tree.create_with_rid(ResourceKind::Folder, 40);
        tree.add(root, "d", d, AddOptions::default()).unwrap();
        let m = tree.create_with_rid(ResourceKind::Folder, 60);
        tree.add(root, "m", m, AddOptions::default()).unwrap();
        let y = tree.create_with_rid(ResourceKind::Folder, 61);
        tree.add(m, "y", y, AddOptions::default()).unwrap();
        // stale entry where the moved child would land
        tree.index.path_to_rid.insert(names(&["d", "m", "y"]), 99);
        tree.index.rid_to_path.insert(99, names(&["d", "m", "y"]));

        let err = tree.move_to(root, "m", d, None).unwrap_err();
        assert!(matches!(err, TreeError::IdentityConflict(_)));
        assert!(tree.contains(root, "m"));
        assert_eq!(tree.index().get(60), Some(&names(&["m"])));
        assert_eq!(tree.index().get(61), Some(&names(&["m", "y"])));
        assert_eq!(tree.index().get_rid(&names(&["d", "m"])), None);
    }

    #[test]
    fn repeated_rid_inside_one_subtree_is_a_conflict() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let a = tree.create_with_rid(ResourceKind::Folder, 7);
        let b = tree.create_with_rid(ResourceKind::Folder, 8);
        let c = tree.create_with_rid(ResourceKind::Folder, 8);
        tree.add(a, "b", b, AddOptions::default()).unwrap();
        tree.add(a, "c", c, AddOptions::default()).unwrap();

        let err = tree.add(root, "a", a, AddOptions::default()).unwrap_err();
        assert!(matches!(err, TreeError::IdentityConflict(_)));
        assert_eq!(tree.index().len(), 1);
        tree.verify_index().unwrap();
    }

    #[test]
    fn same_path_with_other_rid_is_a_conflict() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let first = tree.create_with_rid(ResourceKind::Folder, 123);
        tree.add(root, "n", first, AddOptions::default()).unwrap();
        // detach behind the index's back
        tree.detach(root, "n").unwrap();
        let second = tree.create_with_rid(ResourceKind::Folder, 456);
        let err = tree.add(root, "n", second, AddOptions::default()).unwrap_err();
        assert!(matches!(err, TreeError::IdentityConflict(_)));
    }

    #[test]
    fn contained_rids_are_strict_descendants() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let a = tree.create_with_rid(ResourceKind::Folder, 1);
        let b = tree.create_with_rid(ResourceKind::Folder, 2);
        let c = tree.create_with_rid(ResourceKind::Folder, 3);
        let other = tree.create_with_rid(ResourceKind::Folder, 100);
        let ab = tree.create_with_rid(ResourceKind::Folder, 4);
        tree.add(b, "c", c, AddOptions::default()).unwrap();
        tree.add(a, "b", b, AddOptions::default()).unwrap();
        tree.add(root, "a", a, AddOptions::default()).unwrap();
        tree.add(root, "other", other, AddOptions::default()).unwrap();
        // "ab" sorts between "a"'s descendants and "other" but is not below "a"
        tree.add(root, "ab", ab, AddOptions::default()).unwrap();

        let index = tree.index();
        let root_rid = tree.resource(root).unwrap().rid().unwrap();
        assert_eq!(
            index.contained_rids(root_rid).unwrap(),
            BTreeSet::from([1, 2, 3, 4, 100])
        );
        assert_eq!(index.contained_rids(1).unwrap(), BTreeSet::from([2, 3]));
        assert_eq!(index.contained_rids(2).unwrap(), BTreeSet::from([3]));
        assert!(index.contained_rids(3).unwrap().is_empty());
        assert_eq!(
            index.contained_rids(names(&["a"])).unwrap(),
            BTreeSet::from([2, 3])
        );
        assert_eq!(tree.contained_rids(b).unwrap(), BTreeSet::from([3]));
        assert!(matches!(
            index.contained_rids(999),
            Err(TreeError::NotFound(_))
        ));
    }

    #[test]
    fn remove_cascades_and_leaves_others() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let a = tree.create_with_rid(ResourceKind::Folder, 1);
        let b = tree.create_with_rid(ResourceKind::Folder, 2);
        let other = tree.create_with_rid(ResourceKind::Folder, 3);
        tree.add(a, "b", b, AddOptions::default()).unwrap();
        tree.add(root, "a", a, AddOptions::default()).unwrap();
        tree.add(root, "other", other, AddOptions::default()).unwrap();

        let removed = tree.index.remove(1).unwrap();
        assert_eq!(removed, BTreeSet::from([1, 2]));
        assert!(!tree.index().contains(1));
        assert!(!tree.index().contains_path(&names(&["a", "b"])));
        assert_eq!(tree.index().get(3), Some(&names(&["other"])));
    }

    #[test]
    fn check_rids_reset_replaces_every_rid() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let a = tree.create_with_rid(ResourceKind::Folder, 1);
        let b = tree.create(ResourceKind::Folder);
        tree.add(a, "b", b, AddOptions::default()).unwrap();
        assert_eq!(tree.resource(b).unwrap().rid(), None);

        tree.index.check_rids(&mut tree.arena, a, false).unwrap();
        assert_eq!(tree.resource(a).unwrap().rid(), Some(1));
        let b_rid = tree.resource(b).unwrap().rid().unwrap();

        tree.index.check_rids(&mut tree.arena, a, true).unwrap();
        assert_ne!(tree.resource(a).unwrap().rid(), Some(1));
        assert_ne!(tree.resource(b).unwrap().rid(), Some(b_rid));
    }

    #[test]
    fn rebuild_and_verify() {
        let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
        let root = tree.root();
        let a = tree.create(ResourceKind::Wall);
        tree.add(root, "a", a, AddOptions::default()).unwrap();
        tree.verify_index().unwrap();

        let rid = tree.resource(a).unwrap().rid().unwrap();
        tree.index.remove(rid).unwrap();
        assert!(tree.verify_index().is_err());
        tree.reindex().unwrap();
        tree.verify_index().unwrap();
    }
}
