//! Roles, named ACLs and the evaluator that turns them into effective
//! permissions for a resource.

pub mod acl;
pub mod evaluator;
pub mod permissions;
pub mod policy;
pub mod registry;
pub mod role;

pub use acl::{
    AclDetails, AclEntry, Ace, Action, Grantee, NamedAcl, Permissions, Principal, RolesMap,
    AUTHENTICATED, EVERYONE,
};
pub use evaluator::{ComputedAcl, SecurityContext, SimplifiedPermissions};
pub use permissions::{permission_name, Category, PermissionRegistry};
pub use policy::{AuthorizationOracle, FirstMatchPolicy};
pub use registry::SecurityRegistry;
pub use role::Role;
