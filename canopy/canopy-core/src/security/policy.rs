use super::acl::{Action, Grantee};
use super::evaluator::SecurityContext;
use crate::tree::{NodeId, ResourceTree};

/// Decides whether the current principal holds a permission on a resource.
pub trait AuthorizationOracle {
    fn has_permission(&self, permission: &str, tree: &ResourceTree, node: NodeId) -> bool;
}

impl<F> AuthorizationOracle for F
where
    F: Fn(&str, &ResourceTree, NodeId) -> bool,
{
    fn has_permission(&self, permission: &str, tree: &ResourceTree, node: NodeId) -> bool {
        self(permission, tree, node)
    }
}

/// First-match-wins evaluation of the computed ACL for the acting user.
///
/// The acting principals are `system.Everyone`, plus
/// `system.Authenticated` and the user id when a user is present.
#[derive(Clone, Copy, Debug)]
pub struct FirstMatchPolicy<'r> {
    ctx: SecurityContext<'r>,
}

impl<'r> FirstMatchPolicy<'r> {
    pub fn new(ctx: SecurityContext<'r>) -> Self {
        Self { ctx }
    }

    fn matches(&self, grantee: &Grantee) -> bool {
        match (grantee, self.ctx.userid) {
            (Grantee::Everyone, _) => true,
            (Grantee::Authenticated, Some(_)) => true,
            (Grantee::User(id), Some(userid)) => *id == userid.to_string(),
            _ => false,
        }
    }
}

impl AuthorizationOracle for FirstMatchPolicy<'_> {
    fn has_permission(&self, permission: &str, tree: &ResourceTree, node: NodeId) -> bool {
        tree.computed_acl(node, &[], self.ctx)
            .find(|ace| self.matches(&ace.grantee) && ace.permissions.contains(permission))
            .map_or(false, |ace| ace.action == Action::Allow)
    }
}
