//! Resource tree built on an arena of [`Resource`] nodes.
//!
//! Containers own their children by [`NodeId`]; children only keep a handle
//! back to their parent. Every structural mutation keeps the
//! [`IdentityIndex`] in step with the tree and reports itself through the
//! configured [`NotificationSink`].

use crate::error::{Result, TreeError};
use crate::events::{Event, NotificationSink};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod index;

pub use index::{Identifier, IdentityIndex};

/// Stable resource identifier.
pub type Rid = i64;
/// Integer user id used by role assignments.
pub type UserId = i64;
/// Names from the root down to a resource. The root's path is empty.
pub type Path = Vec<String>;

/// Handle into the tree's arena.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Capability tags a resource may provide. Role and ACL restrictions are
/// expressed in terms of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Resource,
    Folder,
    Root,
    Users,
    User,
    Wall,
    Collection,
    Card,
}

/// Different kinds of resources managed by the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Root,
    Users,
    User,
    Wall,
    Collection,
    Card,
    Folder,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Root => "Root",
            ResourceKind::Users => "Users",
            ResourceKind::User => "User",
            ResourceKind::Wall => "Wall",
            ResourceKind::Collection => "Collection",
            ResourceKind::Card => "Card",
            ResourceKind::Folder => "Folder",
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            ResourceKind::Root => &[Resource, Folder, Root],
            ResourceKind::Users => &[Resource, Folder, Users],
            ResourceKind::User => &[Resource, Folder, User],
            ResourceKind::Wall => &[Resource, Folder, Wall],
            ResourceKind::Collection => &[Resource, Folder, Collection],
            ResourceKind::Card => &[Resource, Folder, Card],
            ResourceKind::Folder => &[Resource, Folder],
        }
    }

    pub fn provides(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Kinds carrying a role table and an ACL name.
    pub fn is_security_aware(&self) -> bool {
        matches!(
            self,
            ResourceKind::Root | ResourceKind::User | ResourceKind::Wall
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "root" => Ok(ResourceKind::Root),
            "users" => Ok(ResourceKind::Users),
            "user" => Ok(ResourceKind::User),
            "wall" => Ok(ResourceKind::Wall),
            "collection" => Ok(ResourceKind::Collection),
            "card" => Ok(ResourceKind::Card),
            "folder" => Ok(ResourceKind::Folder),
            _ => Err(TreeError::InvalidOperation(format!(
                "unknown resource kind {:?}",
                s
            ))),
        }
    }
}

/// Role assignments and ACL name of a security-aware resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityData {
    pub acl_name: String,
    pub roles: BTreeMap<UserId, BTreeSet<String>>,
}

/// Named children of a container, with an optional explicit order kept in
/// lock-step with the children's rids.
#[derive(Clone, Debug, Default)]
pub struct Children {
    entries: HashMap<String, NodeId>,
    natural: Vec<String>,
    order: Option<Vec<String>>,
    order_rids: Option<Vec<Rid>>,
}

impl Children {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Child names, respecting the explicit order when one is set.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order
            .as_ref()
            .unwrap_or(&self.natural)
            .iter()
            .map(|s| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.keys().filter_map(move |k| self.entries.get(k).copied())
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.keys()
            .filter_map(move |k| self.entries.get(k).map(|id| (k, *id)))
    }

    pub fn is_ordered(&self) -> bool {
        self.order.is_some()
    }

    pub fn order_rids(&self) -> Option<&[Rid]> {
        self.order_rids.as_deref()
    }

    /// The explicit order, if one is set.
    pub fn order(&self) -> Option<&[String]> {
        self.order.as_deref()
    }

    /// Child names in insertion order, ignoring any explicit order.
    pub fn insertion_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.natural.iter().map(|s| s.as_str())
    }

    /// Names and rids of an explicit order move together, so an ordered
    /// container only accepts children that already carry a rid.
    fn insert(&mut self, name: String, id: NodeId, rid: Option<Rid>) -> Result<()> {
        if let (Some(order), Some(order_rids)) = (self.order.as_mut(), self.order_rids.as_mut()) {
            let rid = rid.ok_or_else(|| {
                TreeError::InvalidOperation(format!(
                    "{:?} has no rid and can't join an ordered container",
                    name
                ))
            })?;
            order.push(name.clone());
            order_rids.push(rid);
        }
        self.natural.push(name.clone());
        self.entries.insert(name, id);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Option<NodeId> {
        let id = self.entries.remove(name)?;
        self.natural.retain(|n| n != name);
        if let (Some(order), Some(order_rids)) = (self.order.as_mut(), self.order_rids.as_mut()) {
            if let Some(pos) = order.iter().position(|n| n == name) {
                order.remove(pos);
                if pos < order_rids.len() {
                    order_rids.remove(pos);
                }
            }
        }
        Some(id)
    }
}

/// A node in the resource tree.
#[derive(Clone, Debug)]
pub struct Resource {
    kind: ResourceKind,
    rid: Option<Rid>,
    name: Option<String>,
    parent: Option<NodeId>,
    children: Children,
    security: Option<SecurityData>,
}

impl Resource {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            rid: None,
            name: None,
            parent: None,
            children: Children::default(),
            security: kind.is_security_aware().then(SecurityData::default),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn provides(&self, capability: Capability) -> bool {
        self.kind.provides(capability)
    }

    pub fn security(&self) -> Option<&SecurityData> {
        self.security.as_ref()
    }

    pub(crate) fn security_mut(&mut self) -> Option<&mut SecurityData> {
        self.security.as_mut()
    }

    pub fn acl_name(&self) -> Option<&str> {
        self.security.as_ref().map(|s| s.acl_name.as_str())
    }
}

/// Storage for every node the tree knows about, attached or not.
#[derive(Clone, Debug, Default)]
pub struct Arena {
    nodes: Vec<Option<Resource>>,
}

impl Arena {
    fn alloc(&mut self, resource: Resource) -> NodeId {
        self.nodes.push(Some(resource));
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> Option<&Resource> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Resource> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Resource> {
        self.get(id)
            .ok_or_else(|| TreeError::NotFound(format!("node {}", id.0)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Resource> {
        self.get_mut(id)
            .ok_or_else(|| TreeError::NotFound(format!("node {}", id.0)))
    }

    /// Walk parent links from `id` up to the top of its tree.
    pub fn lineage(&self, id: NodeId) -> Lineage<'_> {
        Lineage {
            arena: self,
            current: self.get(id).map(|_| id),
        }
    }

    /// True when following parent links from `id` ends at `root`.
    pub fn reaches(&self, id: NodeId, root: NodeId) -> bool {
        self.lineage(id).last() == Some(root)
    }

    /// Path from the top of the node's tree down to the node.
    pub fn path_of(&self, id: NodeId) -> Path {
        let mut path: Path = self
            .lineage(id)
            .filter_map(|n| self.get(n).and_then(|r| r.name.clone()))
            .collect();
        path.reverse();
        path
    }

    pub fn resolve(&self, from: NodeId, path: &[String]) -> Option<NodeId> {
        let mut current = from;
        for name in path {
            current = self.get(current)?.children.get(name)?;
        }
        Some(current)
    }

    /// Nodes of the subtree rooted at `id`, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.get(next) {
                out.push(next);
                let children: Vec<NodeId> = node.children.values().collect();
                stack.extend(children.into_iter().rev());
            }
        }
        out
    }

    /// Recompute the rid half of an explicit order from the children.
    pub(crate) fn sync_order_rids(&mut self, id: NodeId) {
        let Some(node) = self.get(id) else { return };
        let Some(order) = node.children.order.as_ref() else {
            return;
        };
        let rids: Vec<Rid> = order
            .iter()
            .filter_map(|name| node.children.get(name))
            .filter_map(|child| self.get(child).and_then(|c| c.rid))
            .collect();
        if let Some(node) = self.get_mut(id) {
            node.children.order_rids = Some(rids);
        }
    }

    fn deep_clone(&mut self, id: NodeId) -> Result<NodeId> {
        let source = self.node(id)?.clone();
        let mut copy = Resource {
            children: Children::default(),
            name: None,
            parent: None,
            ..source.clone()
        };
        copy.children.order = source.children.order.clone();
        copy.children.order_rids = source.children.order_rids.clone();
        let new_id = self.alloc(copy);
        for name in &source.children.natural {
            let Some(child) = source.children.get(name) else {
                continue;
            };
            let child_copy = self.deep_clone(child)?;
            if let Some(c) = self.get_mut(child_copy) {
                c.parent = Some(new_id);
                c.name = Some(name.clone());
            }
            if let Some(n) = self.get_mut(new_id) {
                n.children.natural.push(name.clone());
                n.children.entries.insert(name.clone(), child_copy);
            }
        }
        Ok(new_id)
    }
}

/// Iterator over a node and its ancestors, nearest first.
pub struct Lineage<'a> {
    arena: &'a Arena,
    current: Option<NodeId>,
}

impl Iterator for Lineage<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.current?;
        self.current = self.arena.get(id).and_then(|r| r.parent);
        Some(id)
    }
}

/// Flags for [`ResourceTree::add`].
#[derive(Clone, Copy, Debug)]
pub struct AddOptions {
    pub send_notifications: bool,
    /// The resource this one is a copy of.
    pub duplicating: Option<NodeId>,
    /// The container the resource is moving from.
    pub moving: Option<NodeId>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            send_notifications: true,
            duplicating: None,
            moving: None,
        }
    }
}

/// Flags for [`ResourceTree::remove`].
#[derive(Clone, Copy, Debug)]
pub struct RemoveOptions {
    pub send_notifications: bool,
    /// The container the resource is moving to.
    pub moving: Option<NodeId>,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            send_notifications: true,
            moving: None,
        }
    }
}

/// A rooted resource tree together with its identity index.
#[derive(Clone)]
pub struct ResourceTree {
    pub(crate) arena: Arena,
    pub(crate) index: IdentityIndex,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTree")
            .field("root", &self.index.root())
            .field("indexed", &self.index.len())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl ResourceTree {
    /// Create a tree whose root is of the given kind. The root is indexed
    /// immediately.
    pub fn new(root_kind: ResourceKind) -> Result<Self> {
        let mut arena = Arena::default();
        let root = arena.alloc(Resource::new(root_kind));
        let mut index = IdentityIndex::new(root);
        index.add(&mut arena, root)?;
        Ok(Self {
            arena,
            index,
            sink: None,
        })
    }

    /// Create a tree around a root that already carries a rid.
    pub fn with_root_rid(root_kind: ResourceKind, rid: Rid) -> Result<Self> {
        let mut arena = Arena::default();
        let mut root = Resource::new(root_kind);
        root.rid = Some(rid);
        let root = arena.alloc(root);
        let mut index = IdentityIndex::new(root);
        index.add(&mut arena, root)?;
        Ok(Self {
            arena,
            index,
            sink: None,
        })
    }

    pub fn set_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sink = Some(sink);
    }

    pub fn root(&self) -> NodeId {
        self.index.root()
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn get(&self, id: NodeId) -> Option<&Resource> {
        self.arena.get(id)
    }

    pub fn resource(&self, id: NodeId) -> Result<&Resource> {
        self.arena.node(id)
    }

    pub(crate) fn resource_mut(&mut self, id: NodeId) -> Result<&mut Resource> {
        self.arena.node_mut(id)
    }

    /// Create a detached resource with no parent and no rid.
    pub fn create(&mut self, kind: ResourceKind) -> NodeId {
        self.arena.alloc(Resource::new(kind))
    }

    /// Create a detached resource carrying an explicit rid.
    pub fn create_with_rid(&mut self, kind: ResourceKind, rid: Rid) -> NodeId {
        let mut resource = Resource::new(kind);
        resource.rid = Some(rid);
        self.arena.alloc(resource)
    }

    /// Drop a detached subtree from the arena. Handles into it become stale.
    pub fn discard(&mut self, id: NodeId) -> Result<()> {
        if self.resource(id)?.parent.is_some() || id == self.root() {
            return Err(TreeError::InvalidOperation(
                "only detached resources can be discarded".into(),
            ));
        }
        for node in self.arena.subtree(id) {
            self.arena.nodes[node.0] = None;
        }
        Ok(())
    }

    pub fn lineage(&self, id: NodeId) -> Lineage<'_> {
        self.arena.lineage(id)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.arena.reaches(id, self.root())
    }

    pub fn path_of(&self, id: NodeId) -> Path {
        self.arena.path_of(id)
    }

    pub fn resolve_path(&self, path: &[String]) -> Option<NodeId> {
        self.arena.resolve(self.root(), path)
    }

    /// Resolve a rid through the index to the node currently holding it.
    pub fn get_resource(&self, rid: Rid) -> Option<NodeId> {
        self.index.get_resource(&self.arena, rid)
    }

    /// Rids of the strict descendants of `id`.
    pub fn contained_rids(&self, id: NodeId) -> Result<BTreeSet<Rid>> {
        let rid = self
            .resource(id)?
            .rid
            .ok_or(TreeError::NotAttached)?;
        self.index.contained_rids(Identifier::Rid(rid))
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.resource(parent)?
            .children
            .get(name)
            .ok_or_else(|| TreeError::child_missing(name))
    }

    pub fn contains(&self, parent: NodeId, name: &str) -> bool {
        self.get(parent)
            .map_or(false, |p| p.children.contains(name))
    }

    pub fn len(&self, parent: NodeId) -> usize {
        self.get(parent).map_or(0, |p| p.children.len())
    }

    pub fn keys(&self, parent: NodeId) -> Vec<String> {
        self.get(parent)
            .map(|p| p.children.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn values(&self, parent: NodeId) -> Vec<NodeId> {
        self.get(parent)
            .map(|p| p.children.values().collect())
            .unwrap_or_default()
    }

    pub fn items(&self, parent: NodeId) -> Vec<(String, NodeId)> {
        self.get(parent)
            .map(|p| {
                p.children
                    .items()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, event: Event) {
        if let Some(sink) = &self.sink {
            debug!(event = event.kind(), name = event.name(), "dispatching notification");
            sink.notify(&event);
        }
    }

    /// Attach `resource` to `parent` under `name` and index the subtree.
    pub fn add(
        &mut self,
        parent: NodeId,
        name: &str,
        resource: NodeId,
        opts: AddOptions,
    ) -> Result<()> {
        if opts.duplicating.is_some() && opts.moving.is_some() {
            return Err(TreeError::InvalidOperation(
                "a resource can't move and be duplicated at the same time".into(),
            ));
        }
        if let Some(existing) = self.resource(resource)?.parent {
            return Err(TreeError::AlreadyAttached(
                self.path_of(existing).join("/"),
            ));
        }
        if resource == self.root() || self.lineage(parent).any(|n| n == resource) {
            return Err(TreeError::Cycle);
        }
        if self.resource(parent)?.children.contains(name) {
            return Err(TreeError::NameConflict(name.to_string()));
        }

        let indexed = self.is_attached(parent);
        let ordered = self.resource(parent)?.children.is_ordered();
        if opts.duplicating.is_some() {
            self.index.check_rids(&mut self.arena, resource, true)?;
        } else if indexed || ordered {
            self.index.check_rids(&mut self.arena, resource, false)?;
        }

        if opts.send_notifications {
            self.notify(Event::WillBeAdded {
                resource,
                rid: self.resource(resource)?.rid,
                parent,
                name: name.to_string(),
                duplicating: opts.duplicating,
                moving: opts.moving,
            });
        }

        let rid = self.resource(resource)?.rid;
        self.resource_mut(parent)?
            .children
            .insert(name.to_string(), resource, rid)?;
        {
            let node = self.resource_mut(resource)?;
            node.parent = Some(parent);
            node.name = Some(name.to_string());
        }

        let mut contained_rids = BTreeSet::new();
        if indexed {
            if let Err(err) = self.index.add(&mut self.arena, resource) {
                warn!(error = %err, name, "indexing failed, detaching resource again");
                self.detach(parent, name)?;
                return Err(err);
            }
            let rid = self.resource(resource)?.rid.ok_or(TreeError::NotAttached)?;
            contained_rids = self.index.contained_rids(Identifier::Rid(rid))?;
        }

        if opts.send_notifications {
            self.notify(Event::Added {
                resource,
                rid: self.resource(resource)?.rid,
                parent,
                name: name.to_string(),
                duplicating: opts.duplicating,
                moving: opts.moving,
                contained_rids,
            });
        }
        Ok(())
    }

    fn detach(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let id = self
            .resource_mut(parent)?
            .children
            .remove(name)
            .ok_or_else(|| TreeError::child_missing(name))?;
        let node = self.resource_mut(id)?;
        node.parent = None;
        node.name = None;
        Ok(id)
    }

    /// Detach the child `name` from `parent` and drop its subtree from the
    /// index. The detached node is returned and can be added elsewhere.
    pub fn remove(&mut self, parent: NodeId, name: &str, opts: RemoveOptions) -> Result<NodeId> {
        let id = self.child(parent, name)?;
        let rid = self.resource(id)?.rid;
        let indexed_rid = rid.filter(|r| self.is_attached(parent) && self.index.contains(*r));
        let contained_rids = match indexed_rid {
            Some(r) => self.index.contained_rids(Identifier::Rid(r))?,
            None => BTreeSet::new(),
        };

        if opts.send_notifications {
            self.notify(Event::WillBeRemoved {
                resource: id,
                rid,
                parent,
                name: name.to_string(),
                moving: opts.moving,
                contained_rids,
            });
        }

        self.detach(parent, name)?;
        if let Some(r) = indexed_rid {
            self.index.remove(r)?;
        }

        if opts.send_notifications {
            self.notify(Event::Removed {
                resource: id,
                rid,
                parent,
                name: name.to_string(),
                moving: opts.moving,
            });
        }
        Ok(id)
    }

    /// Move child `name` of `source` into `destination`, keeping its rid.
    pub fn move_to(
        &mut self,
        source: NodeId,
        name: &str,
        destination: NodeId,
        new_name: Option<&str>,
    ) -> Result<NodeId> {
        let id = self.child(source, name)?;
        let new_name = new_name.unwrap_or(name);
        self.resource(destination)?;
        if self.lineage(destination).any(|n| n == id) {
            return Err(TreeError::Cycle);
        }
        let same_slot = source == destination && new_name == name;
        if !same_slot && self.contains(destination, new_name) {
            return Err(TreeError::NameConflict(new_name.to_string()));
        }

        self.remove(
            source,
            name,
            RemoveOptions {
                moving: Some(destination),
                ..Default::default()
            },
        )?;
        let added = self.add(
            destination,
            new_name,
            id,
            AddOptions {
                moving: Some(source),
                ..Default::default()
            },
        );
        if let Err(err) = added {
            warn!(error = %err, name, "move failed, restoring resource");
            self.add(
                source,
                name,
                id,
                AddOptions {
                    send_notifications: false,
                    ..Default::default()
                },
            )?;
            return Err(err);
        }
        Ok(id)
    }

    /// Copy child `name` of `source` into `destination`. The copy and all
    /// of its descendants receive fresh rids.
    pub fn copy(
        &mut self,
        source: NodeId,
        name: &str,
        destination: NodeId,
        new_name: Option<&str>,
    ) -> Result<NodeId> {
        let new_name = match new_name {
            Some(n) => n,
            None if source == destination => {
                return Err(TreeError::InvalidOperation(
                    "a copy within the same container needs a new name".into(),
                ))
            }
            None => name,
        };
        let original = self.child(source, name)?;
        let copy = self.arena.deep_clone(original)?;
        let added = self.add(
            destination,
            new_name,
            copy,
            AddOptions {
                duplicating: Some(original),
                ..Default::default()
            },
        );
        if let Err(err) = added {
            self.discard(copy)?;
            return Err(err);
        }
        Ok(copy)
    }

    pub fn rename(&mut self, parent: NodeId, old: &str, new: &str) -> Result<NodeId> {
        self.move_to(parent, old, parent, Some(new))
    }

    /// Set an explicit child order. `names` must be a permutation of the
    /// current child names.
    pub fn set_order<S: AsRef<str>>(&mut self, parent: NodeId, names: &[S]) -> Result<()> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let unique: BTreeSet<&str> = names.iter().map(|n| n.as_str()).collect();
        if unique.len() != names.len() {
            return Err(TreeError::OrderMismatch("repeated names".into()));
        }
        let children = &self.resource(parent)?.children;
        if unique.len() != children.len() || !unique.iter().all(|n| children.contains(n)) {
            return Err(TreeError::OrderMismatch(
                "names must match the current children".into(),
            ));
        }
        let ids: Vec<NodeId> = names.iter().filter_map(|n| children.get(n)).collect();
        for id in ids {
            self.index.check_rids(&mut self.arena, id, false)?;
        }
        let node = self.resource_mut(parent)?;
        node.children.order = Some(names);
        node.children.order_rids = Some(Vec::new());
        self.arena.sync_order_rids(parent);
        Ok(())
    }

    pub fn clear_order(&mut self, parent: NodeId) -> Result<()> {
        let node = self.resource_mut(parent)?;
        node.children.order = None;
        node.children.order_rids = None;
        Ok(())
    }

    pub fn is_ordered(&self, parent: NodeId) -> bool {
        self.get(parent)
            .map_or(false, |p| p.children.is_ordered())
    }

    pub fn get_order_rids(&self, parent: NodeId) -> Option<Vec<Rid>> {
        self.get(parent)
            .and_then(|p| p.children.order_rids())
            .map(|r| r.to_vec())
    }

    /// Run `f` as one unit of work. When it fails, the tree and index are
    /// restored to their state before the call.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let arena = self.arena.clone();
        let index = self.index.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    warn!(error = %err, "aborting transaction on identity conflict");
                } else {
                    debug!(error = %err, "rolling back transaction");
                }
                self.arena = arena;
                self.index = index;
                Err(err)
            }
        }
    }

    /// Rebuild the index from the tree.
    pub fn reindex(&mut self) -> Result<()> {
        self.index.rebuild(&mut self.arena)
    }

    /// Check that the index and the tree agree.
    pub fn verify_index(&self) -> Result<()> {
        self.index.verify(&self.arena)
    }
}
