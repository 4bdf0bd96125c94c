//! Role assignment storage and ACL computation over the resource tree.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

use super::acl::{Ace, Action, NamedAcl, Permissions, Principal, RolesMap};
use super::policy::AuthorizationOracle;
use super::registry::SecurityRegistry;
use super::role::Role;
use crate::error::{Result, TreeError};
use crate::tree::{Lineage, NodeId, ResourceKind, ResourceTree, UserId};

/// Who is acting, and against which registry names are resolved.
#[derive(Clone, Copy, Debug)]
pub struct SecurityContext<'r> {
    pub userid: Option<UserId>,
    pub registry: &'r SecurityRegistry,
}

impl<'r> SecurityContext<'r> {
    pub fn new(userid: Option<UserId>, registry: &'r SecurityRegistry) -> Self {
        Self { userid, registry }
    }

    pub fn anonymous(registry: &'r SecurityRegistry) -> Self {
        Self::new(None, registry)
    }
}

/// Outcome of [`ResourceTree::simplified_permissions`]. `allowed` and
/// `denied` never overlap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimplifiedPermissions {
    pub allowed: BTreeSet<String>,
    pub denied: BTreeSet<String>,
    pub all_other_allowed: bool,
}

/// Lazily computed ACE stream for one resource, nearest ancestor first,
/// terminated by a deny-all entry.
///
/// Borrows the tree, so the tree can't change while it is consumed.
pub struct ComputedAcl<'a> {
    tree: &'a ResourceTree,
    registry: &'a SecurityRegistry,
    lineage: Lineage<'a>,
    userids: Vec<UserId>,
    buffer: VecDeque<Ace>,
    finished: bool,
}

impl<'a> ComputedAcl<'a> {
    fn fill(&mut self, node: NodeId) {
        let (tree, registry) = (self.tree, self.registry);
        let Some(resource) = tree.get(node) else {
            return;
        };
        let Some(security) = resource.security() else {
            return;
        };
        let Some(acl) = registry.acl(&security.acl_name) else {
            debug!(
                acl = %security.acl_name,
                kind = %resource.kind(),
                "no named ACL registered, skipping"
            );
            return;
        };
        for entry in acl.entries() {
            if let Principal::Role(id) = &entry.principal {
                if registry.role(id).is_none() {
                    warn!(acl = %acl.name, role = %id, "ACL references an unregistered role");
                }
            }
        }
        let roles = tree.get_roles_map(node, &self.userids);
        self.buffer.extend(acl.translate(&roles));
    }
}

impl Iterator for ComputedAcl<'_> {
    type Item = Ace;

    fn next(&mut self) -> Option<Ace> {
        loop {
            if let Some(ace) = self.buffer.pop_front() {
                return Some(ace);
            }
            if self.finished {
                return None;
            }
            match self.lineage.next() {
                Some(node) => self.fill(node),
                None => {
                    self.finished = true;
                    return Some(Ace::deny_all());
                }
            }
        }
    }
}

fn not_security_aware(kind: ResourceKind) -> TreeError {
    TreeError::InvalidOperation(format!("{} resources don't carry roles or an ACL", kind))
}

impl ResourceTree {
    /// Grant `roles` to `userid` on `node`. Every role is resolved and
    /// checked before anything is stored.
    pub fn add_user_roles<I, S>(
        &mut self,
        node: NodeId,
        userid: UserId,
        roles: I,
        registry: &SecurityRegistry,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolved: Vec<&Role> = roles
            .into_iter()
            .map(|r| registry.require_role(r.as_ref()))
            .collect::<Result<_>>()?;
        self.grant_roles(node, userid, &resolved)
    }

    /// Same as [`add_user_roles`](Self::add_user_roles) for already
    /// resolved roles.
    pub fn grant_roles(&mut self, node: NodeId, userid: UserId, roles: &[&Role]) -> Result<()> {
        let resource = self.resource(node)?;
        if resource.security().is_none() {
            return Err(not_security_aware(resource.kind()));
        }
        if let Some(role) = roles.iter().find(|r| !r.assignable(resource)) {
            return Err(TreeError::RoleNotPermitted {
                role: role.id().to_string(),
                kind: resource.kind().to_string(),
            });
        }
        if roles.is_empty() {
            return Ok(());
        }
        let security = self
            .resource_mut(node)?
            .security_mut()
            .ok_or_else(|| TreeError::InvalidOperation("role table missing".into()))?;
        security
            .roles
            .entry(userid)
            .or_default()
            .extend(roles.iter().map(|r| r.id().to_string()));
        Ok(())
    }

    /// Remove `roles` from `userid`. Missing roles and users are ignored.
    pub fn remove_user_roles<I, S>(&mut self, node: NodeId, userid: UserId, roles: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(security) = self.resource_mut(node)?.security_mut() else {
            return Ok(());
        };
        let Some(held) = security.roles.get_mut(&userid) else {
            return Ok(());
        };
        for role in roles {
            held.remove(role.as_ref());
        }
        if held.is_empty() {
            security.roles.remove(&userid);
        }
        Ok(())
    }

    pub fn get_roles(&self, node: NodeId, userid: UserId) -> BTreeSet<String> {
        self.get(node)
            .and_then(|r| r.security())
            .and_then(|s| s.roles.get(&userid))
            .cloned()
            .unwrap_or_default()
    }

    /// Roles held on `node` by each of `userids`, in query order. Users
    /// holding nothing are left out.
    pub fn get_roles_map(&self, node: NodeId, userids: &[UserId]) -> RolesMap {
        let mut map = RolesMap::new();
        for userid in userids {
            let roles = self.get_roles(node, *userid);
            if !roles.is_empty() {
                map.insert(userid, roles);
            }
        }
        map
    }

    pub fn set_acl_name(&mut self, node: NodeId, name: &str) -> Result<()> {
        let resource = self.resource_mut(node)?;
        let kind = resource.kind();
        let security = resource
            .security_mut()
            .ok_or_else(|| not_security_aware(kind))?;
        security.acl_name = name.to_string();
        Ok(())
    }

    /// The named ACL declared on `node`, if it resolves.
    pub fn get_acl<'r>(&self, node: NodeId, registry: &'r SecurityRegistry) -> Option<&'r NamedAcl> {
        let name = self.get(node)?.acl_name()?;
        let acl = registry.acl(name);
        if acl.is_none() {
            debug!(acl = name, "acl name doesn't resolve");
        }
        acl
    }

    /// Compute the ACE stream for `node`. The acting user of `ctx` is
    /// queried first unless already part of `userids`.
    pub fn computed_acl<'a>(
        &'a self,
        node: NodeId,
        userids: &[UserId],
        ctx: SecurityContext<'a>,
    ) -> ComputedAcl<'a> {
        let mut query = Vec::with_capacity(userids.len() + 1);
        if let Some(acting) = ctx.userid {
            if !userids.contains(&acting) {
                query.push(acting);
            }
        }
        query.extend_from_slice(userids);
        ComputedAcl {
            tree: self,
            registry: ctx.registry,
            lineage: self.lineage(node),
            userids: query,
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// Reduce the computed ACL of `node` into allowed and denied
    /// permission names, asking `oracle` about each candidate.
    pub fn simplified_permissions(
        &self,
        node: NodeId,
        ctx: SecurityContext<'_>,
        oracle: &dyn AuthorizationOracle,
    ) -> SimplifiedPermissions {
        let mut out = SimplifiedPermissions::default();
        for ace in self.computed_acl(node, &[], ctx) {
            match (ace.action, &ace.permissions) {
                (Action::Allow, Permissions::All) => {
                    out.all_other_allowed = true;
                    break;
                }
                (Action::Deny, Permissions::All) => break,
                (Action::Allow, Permissions::Only(names)) => {
                    for name in names {
                        if !out.denied.contains(name) && oracle.has_permission(name, self, node) {
                            out.allowed.insert(name.clone());
                        }
                    }
                }
                (Action::Deny, Permissions::Only(names)) => {
                    for name in names {
                        if !out.allowed.contains(name) && !oracle.has_permission(name, self, node) {
                            out.denied.insert(name.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Normalize role tables: every `User` resource holds only its own
    /// personal role and every wall member becomes a wall owner.
    ///
    /// Returns the number of resources whose table changed.
    pub fn repair_roles(&mut self, registry: &SecurityRegistry) -> Result<usize> {
        let personal = registry.require_role("pe")?.id().to_string();
        let owner = registry.require_role("wo")?.id().to_string();
        let mut changed = 0;
        for node in self.arena.subtree(self.root()) {
            let resource = self.resource_mut(node)?;
            let kind = resource.kind();
            let rid = resource.rid();
            let Some(security) = resource.security_mut() else {
                continue;
            };
            let repaired: BTreeMap<UserId, BTreeSet<String>> = match (kind, rid) {
                (ResourceKind::User, Some(rid)) => {
                    BTreeMap::from([(rid, BTreeSet::from([personal.clone()]))])
                }
                (ResourceKind::Wall, _) => security
                    .roles
                    .keys()
                    .map(|userid| (*userid, BTreeSet::from([owner.clone()])))
                    .collect(),
                _ => continue,
            };
            if repaired != security.roles {
                debug!(kind = %kind, ?rid, "repairing role table");
                security.roles = repaired;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests;
