//! Content types and creation of content on behalf of a user.

use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ContentTypeConfig;
use crate::error::Result;
use crate::security::SecurityRegistry;
use crate::tree::{AddOptions, NodeId, ResourceKind, ResourceTree, UserId};

/// Creation defaults for one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentType {
    pub default_acl: Option<String>,
    pub owner_role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    types: BTreeMap<ResourceKind, ContentType>,
}

impl ContentTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[ContentTypeConfig]) -> Self {
        let mut types = Self::new();
        for c in configs {
            types.insert(
                c.kind,
                ContentType {
                    default_acl: c.default_acl.clone(),
                    owner_role: c.owner_role.clone(),
                },
            );
        }
        types
    }

    pub fn insert(&mut self, kind: ResourceKind, content_type: ContentType) {
        self.types.insert(kind, content_type);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&ContentType> {
        self.types.get(&kind)
    }
}

impl ResourceTree {
    /// Create a resource of `kind` under `parent`, apply its default ACL
    /// and grant the ownership role to `actor`.
    ///
    /// Runs as one unit of work: on failure nothing is left behind.
    pub fn create_content(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: ResourceKind,
        actor: Option<UserId>,
        registry: &SecurityRegistry,
    ) -> Result<NodeId> {
        let content_type = registry.content_types().get(kind).cloned().unwrap_or_default();
        self.transaction(|tree| {
            let id = tree.create(kind);
            if kind.is_security_aware() {
                if let Some(acl) = &content_type.default_acl {
                    tree.set_acl_name(id, acl)?;
                }
                if let (Some(role), Some(userid)) = (&content_type.owner_role, actor) {
                    debug!(kind = %kind, role = %role, userid, "granting ownership role");
                    tree.add_user_roles(id, userid, [role.as_str()], registry)?;
                }
            }
            tree.add(parent, name, id, AddOptions::default())?;
            Ok(id)
        })
    }
}
