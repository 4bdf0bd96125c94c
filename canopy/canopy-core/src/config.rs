//! Configuration for the security registry and content types.
//!
//! Every field has a default, so an empty JSON object yields the built-in
//! profile. Configured roles are merged over the built-in ones, so the
//! default ACLs keep resolving when only `roles` is given. `acls` and
//! `content_types` replace their defaults wholesale.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::security::acl::{AclEntry, Action, Permissions, Principal, EVERYONE};
use crate::security::permissions::{Category, PermissionRegistry};
use crate::tree::{Capability, ResourceKind};

/// Role definition as found in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub id: String,
    /// Defaults to `role: <id>` when absent.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Option<BTreeSet<Capability>>,
}

/// Named ACL definition. `extends` names ACLs defined earlier in the file
/// whose entries are copied in before `entries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclConfig {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Option<BTreeSet<Capability>>,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub entries: Vec<AclEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeConfig {
    pub kind: ResourceKind,
    #[serde(default)]
    pub default_acl: Option<String>,
    /// Role granted to the creating user.
    #[serde(default)]
    pub owner_role: Option<String>,
}

/// Top level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanopyConfig {
    #[serde(default = "default_roles", deserialize_with = "merge_roles")]
    pub roles: Vec<RoleConfig>,

    #[serde(default = "default_acls")]
    pub acls: Vec<AclConfig>,

    #[serde(default = "default_content_types")]
    pub content_types: Vec<ContentTypeConfig>,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            roles: default_roles(),
            acls: default_acls(),
            content_types: default_content_types(),
        }
    }
}

impl CanopyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow!("invalid configuration: {}", e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_json(&raw)
    }
}

/// Built-in roles with configured ones laid over them by id.
fn merge_roles<'de, D>(deserializer: D) -> std::result::Result<Vec<RoleConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let configured = Vec::<RoleConfig>::deserialize(deserializer)?;
    let mut roles = default_roles();
    for rc in configured {
        match roles.iter_mut().find(|r| r.id == rc.id) {
            Some(existing) => *existing = rc,
            None => roles.push(rc),
        }
    }
    Ok(roles)
}

fn role(id: &str, title: &str, required: &[Capability]) -> RoleConfig {
    RoleConfig {
        id: id.to_string(),
        title: Some(title.to_string()),
        description: String::new(),
        required: Some(required.iter().copied().collect()),
    }
}

fn default_roles() -> Vec<RoleConfig> {
    vec![
        role("system.Everyone", "Everyone", &[]),
        role("system.Authenticated", "Authenticated users", &[]),
        role("ia", "Instance admin", &[Capability::Root]),
        role("pe", "Personal", &[Capability::User]),
        role("wo", "Wall owner", &[Capability::Wall]),
        role("co", "Collaborator", &[Capability::Wall]),
        role("gu", "Guest", &[Capability::Wall]),
    ]
}

fn allow(principal: &str, permissions: Permissions) -> AclEntry {
    AclEntry {
        action: Action::Allow,
        principal: Principal::from(principal),
        permissions,
    }
}

fn acl(name: &str, title: &str, required: Capability, entries: Vec<AclEntry>) -> AclConfig {
    AclConfig {
        name: name.to_string(),
        title: title.to_string(),
        description: String::new(),
        required: Some(BTreeSet::from([required])),
        extends: Vec::new(),
        entries,
    }
}

fn default_acls() -> Vec<AclConfig> {
    let perms = PermissionRegistry::new();
    let view = |kinds: &[ResourceKind]| -> Permissions {
        kinds
            .iter()
            .map(|k| perms.get(*k, Category::View))
            .collect::<Vec<_>>()
            .into()
    };
    let content = [ResourceKind::Card, ResourceKind::Collection, ResourceKind::Wall];

    let mut collaborator = perms.all_for(ResourceKind::Card);
    collaborator.extend(perms.all_for(ResourceKind::Collection));
    collaborator.extend(perms.for_kind(ResourceKind::Wall, &[Category::View, Category::Edit]));

    let mut public = acl(
        "public_wall",
        "Public",
        Capability::Wall,
        vec![allow(EVERYONE, view(&content))],
    );
    public.extends = vec!["private_wall".to_string()];

    vec![
        acl(
            "root",
            "Default root",
            Capability::Root,
            vec![
                allow("ia", Permissions::All),
                allow(EVERYONE, view(&[ResourceKind::Root])),
            ],
        ),
        acl(
            "private_wall",
            "Private",
            Capability::Wall,
            vec![
                allow("ia", Permissions::All),
                allow("wo", Permissions::All),
                allow("co", collaborator.into()),
                allow("gu", view(&content)),
            ],
        ),
        public,
        acl(
            "user",
            "Default user",
            Capability::User,
            vec![allow("pe", Permissions::All), allow("ia", Permissions::All)],
        ),
    ]
}

fn default_content_types() -> Vec<ContentTypeConfig> {
    let entry = |kind, default_acl: Option<&str>, owner_role: Option<&str>| ContentTypeConfig {
        kind,
        default_acl: default_acl.map(str::to_string),
        owner_role: owner_role.map(str::to_string),
    };
    vec![
        entry(ResourceKind::Root, Some("root"), None),
        entry(ResourceKind::Users, None, None),
        entry(ResourceKind::User, Some("user"), None),
        entry(ResourceKind::Wall, Some("private_wall"), Some("wo")),
        entry(ResourceKind::Collection, None, None),
        entry(ResourceKind::Card, None, None),
        entry(ResourceKind::Folder, None, None),
    ]
}
