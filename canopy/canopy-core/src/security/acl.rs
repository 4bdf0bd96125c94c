//! Access-control entries and reusable named ACLs.

use super::role::{satisfies, Role};
use crate::tree::{Capability, Resource};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

pub const EVERYONE: &str = "system.Everyone";
pub const AUTHENTICATED: &str = "system.Authenticated";
const ALL_PERMISSIONS: &str = "all";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Allow,
    Deny,
}

/// Subject of an entry in a [`NamedAcl`]: a role or a system principal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Principal {
    Everyone,
    Authenticated,
    Role(String),
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        match s.as_str() {
            EVERYONE => Principal::Everyone,
            AUTHENTICATED => Principal::Authenticated,
            _ => Principal::Role(s),
        }
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Principal::from(s.to_string())
    }
}

impl From<&Role> for Principal {
    fn from(role: &Role) -> Self {
        Principal::from(role.id())
    }
}

impl From<Principal> for String {
    fn from(p: Principal) -> Self {
        p.to_string()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Everyone => f.write_str(EVERYONE),
            Principal::Authenticated => f.write_str(AUTHENTICATED),
            Principal::Role(id) => f.write_str(id),
        }
    }
}

/// Subject of a computed entry: roles have been replaced by user ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Grantee {
    Everyone,
    Authenticated,
    User(String),
}

impl From<Grantee> for String {
    fn from(g: Grantee) -> Self {
        g.to_string()
    }
}

impl std::fmt::Display for Grantee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grantee::Everyone => f.write_str(EVERYONE),
            Grantee::Authenticated => f.write_str(AUTHENTICATED),
            Grantee::User(id) => f.write_str(id),
        }
    }
}

/// Either every permission or an explicit list of permission names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Permissions {
    All,
    Only(Vec<String>),
}

impl Permissions {
    pub fn is_all(&self) -> bool {
        matches!(self, Permissions::All)
    }

    pub fn contains(&self, permission: &str) -> bool {
        match self {
            Permissions::All => true,
            Permissions::Only(names) => names.iter().any(|n| n == permission),
        }
    }

    /// Explicit names; empty for [`Permissions::All`].
    pub fn names(&self) -> &[String] {
        match self {
            Permissions::All => &[],
            Permissions::Only(names) => names,
        }
    }
}

impl From<&str> for Permissions {
    fn from(s: &str) -> Self {
        Permissions::Only(vec![s.to_string()])
    }
}

impl From<String> for Permissions {
    fn from(s: String) -> Self {
        Permissions::Only(vec![s])
    }
}

impl From<Vec<String>> for Permissions {
    fn from(names: Vec<String>) -> Self {
        Permissions::Only(names)
    }
}

impl From<Vec<&str>> for Permissions {
    fn from(names: Vec<&str>) -> Self {
        Permissions::Only(names.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Permissions {
    fn from(names: [&str; N]) -> Self {
        Permissions::Only(names.iter().map(|s| s.to_string()).collect())
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Permissions::All => serializer.serialize_str(ALL_PERMISSIONS),
            Permissions::Only(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(s) if s == ALL_PERMISSIONS => Permissions::All,
            Repr::One(s) => Permissions::Only(vec![s]),
            Repr::Many(names) => Permissions::Only(names),
        })
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permissions::All => f.write_str("ALL_PERMISSIONS"),
            Permissions::Only(names) => write!(f, "({})", names.join(", ")),
        }
    }
}

/// One entry of a [`NamedAcl`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub action: Action,
    pub principal: Principal,
    pub permissions: Permissions,
}

/// A computed access-control entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Ace {
    pub action: Action,
    pub grantee: Grantee,
    pub permissions: Permissions,
}

impl Ace {
    pub fn new(action: Action, grantee: Grantee, permissions: Permissions) -> Self {
        Self {
            action,
            grantee,
            permissions,
        }
    }

    /// The terminating entry of every computed ACL.
    pub fn deny_all() -> Self {
        Self::new(Action::Deny, Grantee::Everyone, Permissions::All)
    }
}

impl std::fmt::Display for Ace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?}, {}, {})", self.action, self.grantee, self.permissions)
    }
}

/// Roles held by each user id in one context, in query order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RolesMap(Vec<(String, BTreeSet<String>)>);

impl RolesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `roles` into the entry for `userid`.
    pub fn insert(&mut self, userid: impl ToString, roles: impl IntoIterator<Item = impl Into<String>>) {
        let userid = userid.to_string();
        let roles = roles.into_iter().map(Into::into);
        match self.0.iter_mut().find(|(u, _)| *u == userid) {
            Some((_, existing)) => existing.extend(roles),
            None => self.0.push((userid, roles.collect())),
        }
    }

    pub fn get(&self, userid: &str) -> Option<&BTreeSet<String>> {
        self.0.iter().find(|(u, _)| u == userid).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> + '_ {
        self.0.iter().map(|(u, r)| (u.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Summary of a named ACL relative to one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AclDetails {
    pub active: bool,
    pub name: String,
    pub title: String,
    pub description: String,
}

/// A registered, reusable ordered list of entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedAcl {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Option<BTreeSet<Capability>>,
    #[serde(default)]
    entries: Vec<AclEntry>,
}

impl NamedAcl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict which resources this ACL is meant for. Advisory only.
    pub fn add_required(&mut self, capabilities: impl IntoIterator<Item = Capability>) {
        self.required
            .get_or_insert_with(BTreeSet::new)
            .extend(capabilities);
    }

    pub fn add_allow(&mut self, principal: impl Into<Principal>, permissions: impl Into<Permissions>) {
        self.push(Action::Allow, principal.into(), permissions.into());
    }

    pub fn add_deny(&mut self, principal: impl Into<Principal>, permissions: impl Into<Permissions>) {
        self.push(Action::Deny, principal.into(), permissions.into());
    }

    pub fn push(&mut self, action: Action, principal: Principal, permissions: Permissions) {
        self.entries.push(AclEntry {
            action,
            principal,
            permissions,
        });
    }

    /// Append every entry of `other`.
    pub fn extend(&mut self, other: &NamedAcl) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn usable_for(&self, resource: &Resource) -> bool {
        satisfies(self.required.as_ref(), resource)
    }

    pub fn details_for(&self, resource: &Resource) -> AclDetails {
        AclDetails {
            active: resource.acl_name() == Some(self.name.as_str()),
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }

    /// Replace role principals with the user ids holding them, keeping
    /// entry order. System principals pass through unchanged.
    pub fn translate<'a>(&'a self, roles: &'a RolesMap) -> impl Iterator<Item = Ace> + 'a {
        self.entries.iter().flat_map(move |entry| {
            let grantees: Vec<Grantee> = match &entry.principal {
                Principal::Everyone => vec![Grantee::Everyone],
                Principal::Authenticated => vec![Grantee::Authenticated],
                Principal::Role(role) => roles
                    .iter()
                    .filter(|(_, held)| held.contains(role))
                    .map(|(userid, _)| Grantee::User(userid.to_string()))
                    .collect(),
            };
            grantees
                .into_iter()
                .map(move |g| Ace::new(entry.action, g, entry.permissions.clone()))
        })
    }
}
