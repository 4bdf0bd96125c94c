use super::*;
use crate::security::acl::{Grantee, EVERYONE};
use crate::security::policy::FirstMatchPolicy;
use crate::tree::AddOptions;

/// Registry with roles `R` and `S` and ACLs `parent` / `child` granting
/// `comment` and `edit` respectively.
fn layered_registry() -> SecurityRegistry {
    let mut registry = SecurityRegistry::new();
    registry.add_role(Role::new("R"));
    registry.add_role(Role::new("S"));
    let mut parent = NamedAcl::new("parent");
    parent.add_allow("R", "comment");
    let mut child = NamedAcl::new("child");
    child.add_allow("S", "edit");
    registry.add_acl(parent).unwrap();
    registry.add_acl(child).unwrap();
    registry
}

fn layered_tree() -> (ResourceTree, NodeId, NodeId) {
    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    let outer = tree.create(ResourceKind::Wall);
    tree.add(root, "outer", outer, AddOptions::default()).unwrap();
    let inner = tree.create(ResourceKind::Wall);
    tree.add(outer, "inner", inner, AddOptions::default()).unwrap();
    tree.set_acl_name(outer, "parent").unwrap();
    tree.set_acl_name(inner, "child").unwrap();
    (tree, outer, inner)
}

#[test]
fn parent_grant_precedes_deny_all() {
    let registry = layered_registry();
    let (mut tree, outer, inner) = layered_tree();
    tree.add_user_roles(outer, 5, ["R"], &registry).unwrap();

    let ctx = SecurityContext::new(Some(5), &registry);
    let aces: Vec<Ace> = tree.computed_acl(inner, &[], ctx).collect();
    assert_eq!(
        aces,
        vec![
            Ace::new(Action::Allow, Grantee::User("5".into()), Permissions::from("comment")),
            Ace::deny_all(),
        ]
    );
}

#[test]
fn user_without_roles_sees_only_deny_all() {
    let registry = layered_registry();
    let (tree, _, inner) = layered_tree();
    let ctx = SecurityContext::new(Some(9), &registry);
    let aces: Vec<Ace> = tree.computed_acl(inner, &[], ctx).collect();
    assert_eq!(aces, vec![Ace::deny_all()]);
}

#[test]
fn nearest_ancestor_entries_come_first() {
    let registry = layered_registry();
    let (mut tree, outer, inner) = layered_tree();
    tree.add_user_roles(outer, 1, ["R"], &registry).unwrap();
    tree.add_user_roles(inner, 2, ["S"], &registry).unwrap();

    let ctx = SecurityContext::new(Some(1), &registry);
    let rendered: Vec<String> = tree
        .computed_acl(inner, &[2], ctx)
        .map(|a| a.to_string())
        .collect();
    assert_eq!(
        rendered,
        vec![
            "(Allow, 2, (edit))",
            "(Allow, 1, (comment))",
            "(Deny, system.Everyone, ALL_PERMISSIONS)",
        ]
    );
}

#[test]
fn unresolvable_acl_name_is_skipped() {
    let registry = layered_registry();
    let (mut tree, outer, inner) = layered_tree();
    tree.set_acl_name(inner, "does-not-exist").unwrap();
    tree.add_user_roles(outer, 3, ["R"], &registry).unwrap();
    assert!(tree.get_acl(inner, &registry).is_none());
    assert_eq!(tree.get_acl(outer, &registry).unwrap().name, "parent");

    let ctx = SecurityContext::new(Some(3), &registry);
    assert_eq!(tree.computed_acl(inner, &[], ctx).count(), 2);
}

#[test]
fn computed_acl_is_lazy() {
    let registry = layered_registry();
    let (mut tree, outer, inner) = layered_tree();
    tree.add_user_roles(inner, 4, ["S"], &registry).unwrap();
    tree.add_user_roles(outer, 4, ["R"], &registry).unwrap();
    let ctx = SecurityContext::new(Some(4), &registry);

    let mut acl = tree.computed_acl(inner, &[], ctx);
    let first = acl.next().unwrap();
    assert_eq!(first.permissions, Permissions::from("edit"));
    assert!(acl.buffer.is_empty());
    assert!(!acl.finished);
}

#[test]
fn roles_map_keeps_query_order_and_skips_empty() {
    let registry = layered_registry();
    let (mut tree, outer, _) = layered_tree();
    tree.add_user_roles(outer, 20, ["R"], &registry).unwrap();
    tree.add_user_roles(outer, 10, ["R", "S"], &registry).unwrap();

    let map = tree.get_roles_map(outer, &[20, 30, 10]);
    let users: Vec<&str> = map.iter().map(|(u, _)| u).collect();
    assert_eq!(users, vec!["20", "10"]);
    assert_eq!(map.get("10").unwrap().len(), 2);
}

#[test]
fn role_restrictions_are_validated_before_mutating() {
    let registry = SecurityRegistry::default_profile().unwrap();
    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    let wall = tree.create(ResourceKind::Wall);
    tree.add(root, "w", wall, AddOptions::default()).unwrap();

    let err = tree
        .add_user_roles(wall, 1, ["wo", "ia"], &registry)
        .unwrap_err();
    assert!(matches!(err, TreeError::RoleNotPermitted { ref role, .. } if role == "ia"));
    assert!(tree.get_roles(wall, 1).is_empty());

    let err = tree.add_user_roles(wall, 1, ["nope"], &registry).unwrap_err();
    assert!(matches!(err, TreeError::UnknownRole(_)));

    let err = tree
        .add_user_roles(wall, 1, [EVERYONE], &registry)
        .unwrap_err();
    assert!(matches!(err, TreeError::RoleNotPermitted { .. }));

    let folder = tree.create(ResourceKind::Collection);
    tree.add(wall, "f", folder, AddOptions::default()).unwrap();
    let err = tree.add_user_roles(folder, 1, ["wo"], &registry).unwrap_err();
    assert!(matches!(err, TreeError::InvalidOperation(_)));
}

#[test]
fn remove_user_roles_prunes_empty_entries() {
    let registry = SecurityRegistry::default_profile().unwrap();
    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    let wall = tree.create(ResourceKind::Wall);
    tree.add(root, "w", wall, AddOptions::default()).unwrap();
    tree.add_user_roles(wall, 1, ["co", "gu"], &registry).unwrap();

    tree.remove_user_roles(wall, 1, ["gu", "wo"]).unwrap();
    assert_eq!(tree.get_roles(wall, 1), BTreeSet::from(["co".to_string()]));
    tree.remove_user_roles(wall, 2, ["co"]).unwrap();
    tree.remove_user_roles(wall, 1, ["co"]).unwrap();
    let security = tree.resource(wall).unwrap().security().unwrap();
    assert!(!security.roles.contains_key(&1));
}

#[test]
fn simplified_permissions_follow_first_match() {
    let registry = SecurityRegistry::default_profile().unwrap();
    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    tree.set_acl_name(root, "root").unwrap();
    let wall = tree
        .create_content(root, "w", ResourceKind::Wall, Some(1), &registry)
        .unwrap();
    tree.add_user_roles(wall, 2, ["gu"], &registry).unwrap();

    let owner = SecurityContext::new(Some(1), &registry);
    let perms = tree.simplified_permissions(wall, owner, &FirstMatchPolicy::new(owner));
    assert!(perms.all_other_allowed);
    assert!(perms.allowed.is_empty());

    let guest = SecurityContext::new(Some(2), &registry);
    let perms = tree.simplified_permissions(wall, guest, &FirstMatchPolicy::new(guest));
    assert!(!perms.all_other_allowed);
    assert_eq!(
        perms.allowed,
        BTreeSet::from([
            "Card:View".to_string(),
            "Collection:View".to_string(),
            "Wall:View".to_string(),
            "Root:View".to_string(),
        ])
    );
    assert!(perms.denied.is_empty());
}

#[test]
fn simplified_permissions_keep_sets_disjoint() {
    let mut registry = SecurityRegistry::new();
    registry.add_role(Role::new("R"));
    let mut acl = NamedAcl::new("mixed");
    acl.add_allow("R", ["a", "b"]);
    acl.add_deny("R", ["a", "c"]);
    acl.add_allow("R", "c");
    registry.add_acl(acl).unwrap();

    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    tree.set_acl_name(root, "mixed").unwrap();
    tree.add_user_roles(root, 1, ["R"], &registry).unwrap();

    let ctx = SecurityContext::new(Some(1), &registry);
    let oracle = |permission: &str, _: &ResourceTree, _: NodeId| permission == "a";
    let perms = tree.simplified_permissions(root, ctx, &oracle);
    assert_eq!(perms.allowed, BTreeSet::from(["a".to_string()]));
    assert_eq!(perms.denied, BTreeSet::from(["c".to_string()]));
    assert!(!perms.all_other_allowed);
}

#[test]
fn repair_roles_normalizes_tables() {
    let registry = SecurityRegistry::default_profile().unwrap();
    let mut tree = ResourceTree::new(ResourceKind::Root).unwrap();
    let root = tree.root();
    let users = tree.create(ResourceKind::Users);
    tree.add(root, "users", users, AddOptions::default()).unwrap();
    let user = tree.create(ResourceKind::User);
    tree.add(users, "alice", user, AddOptions::default()).unwrap();
    let wall = tree.create(ResourceKind::Wall);
    tree.add(root, "w", wall, AddOptions::default()).unwrap();
    tree.add_user_roles(wall, 7, ["co", "gu"], &registry).unwrap();
    tree.add_user_roles(user, 99, ["pe"], &registry).unwrap();

    assert_eq!(tree.repair_roles(&registry).unwrap(), 2);
    let user_rid = tree.resource(user).unwrap().rid().unwrap();
    assert_eq!(tree.get_roles(user, user_rid), BTreeSet::from(["pe".to_string()]));
    assert!(tree.get_roles(user, 99).is_empty());
    assert_eq!(tree.get_roles(wall, 7), BTreeSet::from(["wo".to_string()]));
    assert_eq!(tree.repair_roles(&registry).unwrap(), 0);
}
