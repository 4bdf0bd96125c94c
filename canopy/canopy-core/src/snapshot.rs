//! Durable JSON snapshots of a resource tree and its identity index.
//!
//! The tree and the index are written to one file, so they are committed
//! together or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, TreeError};
use crate::tree::{AddOptions, IdentityIndex, NodeId, ResourceKind, ResourceTree, Rid, UserId};

pub const SNAPSHOT_VERSION: u32 = 1;

/// One resource and its subtree. Children are kept in insertion order;
/// an explicit order is stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub kind: ResourceKind,
    pub rid: Option<Rid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<UserId, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    #[serde(default)]
    pub children: Vec<NodeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub rid: Rid,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub root: NodeRecord,
    pub index: Vec<IndexEntry>,
}

impl Snapshot {
    /// Capture the attached part of `tree`.
    pub fn capture(tree: &ResourceTree) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            root: record(tree, tree.root(), String::new())?,
            index: tree
                .index()
                .entries()
                .map(|(rid, path)| IndexEntry {
                    rid,
                    path: path.clone(),
                })
                .collect(),
        })
    }

    /// Rebuild the tree and check the stored index against it.
    pub fn restore(&self) -> Result<ResourceTree> {
        if self.version != SNAPSHOT_VERSION {
            return Err(TreeError::InvalidOperation(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let mut tree = match self.root.rid {
            Some(rid) => ResourceTree::with_root_rid(self.root.kind, rid)?,
            None => ResourceTree::new(self.root.kind)?,
        };
        let root = tree.root();
        apply_security(&mut tree, root, &self.root)?;
        restore_children(&mut tree, root, &self.root)?;

        let mut stored = IdentityIndex::new(root);
        stored.load_entries(self.index.iter().map(|e| (e.rid, e.path.clone())))?;
        stored.verify(tree.arena())?;
        tree.index = stored;
        Ok(tree)
    }

    /// Write to `path` through a temporary file in the same directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");
        {
            let mut temp_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            serde_json::to_writer_pretty(&mut temp_file, self)?;
            temp_file.write_all(b"\n")?;
            temp_file.sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        info!(path = %path.display(), entries = self.index.len(), "snapshot saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), saved_at = %snapshot.saved_at, "snapshot loaded");
        Ok(snapshot)
    }
}

/// Capture `tree` and save it to `path`.
pub fn save_tree(tree: &ResourceTree, path: impl AsRef<Path>) -> Result<()> {
    Snapshot::capture(tree)?.save(path)
}

/// Load and verify the tree stored at `path`.
pub fn load_tree(path: impl AsRef<Path>) -> Result<ResourceTree> {
    Snapshot::load(path)?.restore()
}

fn record(tree: &ResourceTree, id: NodeId, name: String) -> Result<NodeRecord> {
    let resource = tree.resource(id)?;
    let security = resource.security();
    let children = resource
        .children()
        .insertion_order()
        .map(|child_name| {
            let child = tree.child(id, child_name)?;
            record(tree, child, child_name.to_string())
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(NodeRecord {
        name,
        kind: resource.kind(),
        rid: resource.rid(),
        acl_name: security.map(|s| s.acl_name.clone()),
        roles: security.map(|s| s.roles.clone()).unwrap_or_default(),
        order: resource.children().order().map(|o| o.to_vec()),
        children,
    })
}

fn apply_security(tree: &mut ResourceTree, id: NodeId, record: &NodeRecord) -> Result<()> {
    let resource = tree.resource_mut(id)?;
    let kind = resource.kind();
    match resource.security_mut() {
        Some(security) => {
            security.acl_name = record.acl_name.clone().unwrap_or_default();
            security.roles = record.roles.clone();
        }
        None if record.acl_name.is_some() || !record.roles.is_empty() => {
            return Err(TreeError::InvalidOperation(format!(
                "{} resource {:?} can't carry roles or an ACL",
                kind, record.name
            )));
        }
        None => {}
    }
    Ok(())
}

fn restore_children(tree: &mut ResourceTree, parent: NodeId, record: &NodeRecord) -> Result<()> {
    for child in &record.children {
        let id = match child.rid {
            Some(rid) => tree.create_with_rid(child.kind, rid),
            None => tree.create(child.kind),
        };
        apply_security(tree, id, child)?;
        tree.add(
            parent,
            &child.name,
            id,
            AddOptions {
                send_notifications: false,
                ..Default::default()
            },
        )?;
        restore_children(tree, id, child)?;
    }
    if let Some(order) = &record.order {
        tree.set_order(parent, order.as_slice())?;
    }
    Ok(())
}
