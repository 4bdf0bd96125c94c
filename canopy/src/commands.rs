use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use canopy_core::config::CanopyConfig;
use canopy_core::events::{Event, EventBus};
use canopy_core::security::{FirstMatchPolicy, SecurityContext, SecurityRegistry};
use canopy_core::snapshot;
use canopy_core::tree::{NodeId, RemoveOptions, ResourceKind, ResourceTree};

use crate::Command;

/// Build the registry from `path` (or the built-in profile) and install it
/// process-wide.
pub(crate) fn load_registry(path: Option<&Path>) -> Result<&'static SecurityRegistry> {
    let config = match path {
        Some(path) => CanopyConfig::load(path)?,
        None => CanopyConfig::default(),
    };
    let registry = SecurityRegistry::from_config(&config)?;
    Ok(registry.install()?)
}

/// Run one command against the snapshot at `snapshot_path` and return what
/// should be printed.
pub(crate) async fn run(
    command: Command,
    snapshot_path: &Path,
    registry: &SecurityRegistry,
) -> Result<String> {
    let bus = EventBus::new();
    let logger = spawn_event_logger(&bus);
    let output = execute(command, snapshot_path, registry, &bus);
    drop(bus);
    logger.await?;
    output
}

fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &Event) {
    match event {
        Event::Added { rid, contained_rids, .. } => info!(
            event = event.kind(),
            name = event.name(),
            ?rid,
            descendants = contained_rids.len(),
            moving = event.moving().is_some(),
            "resource added"
        ),
        Event::Removed { rid, .. } => info!(
            event = event.kind(),
            name = event.name(),
            ?rid,
            moving = event.moving().is_some(),
            "resource removed"
        ),
        _ => {}
    }
}

fn display_path(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn resolve(tree: &ResourceTree, path: &str) -> Result<NodeId> {
    tree.resolve_path(&split_path(path))
        .ok_or_else(|| anyhow!("no resource at {}", display_path(&split_path(path))))
}

/// Parent and name of the resource at `path`.
fn locate(tree: &ResourceTree, path: &str) -> Result<(NodeId, String)> {
    let id = resolve(tree, path)?;
    let resource = tree.resource(id)?;
    match (resource.parent(), resource.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_string())),
        _ => Err(anyhow!("the root can't be moved, copied or removed")),
    }
}

fn load(snapshot_path: &Path, bus: &EventBus) -> Result<ResourceTree> {
    let mut tree = snapshot::load_tree(snapshot_path)
        .map_err(|e| anyhow!("failed to load {}: {}", snapshot_path.display(), e))?;
    tree.set_sink(Arc::new(bus.clone()));
    Ok(tree)
}

fn execute(
    command: Command,
    snapshot_path: &Path,
    registry: &SecurityRegistry,
    bus: &EventBus,
) -> Result<String> {
    if let Command::Init { force } = command {
        if snapshot_path.exists() && !force {
            return Err(anyhow!(
                "{} already exists, pass --force to overwrite",
                snapshot_path.display()
            ));
        }
        let mut tree = ResourceTree::new(ResourceKind::Root)?;
        let root = tree.root();
        if let Some(acl) = registry
            .content_types()
            .get(ResourceKind::Root)
            .and_then(|c| c.default_acl.as_deref())
        {
            tree.set_acl_name(root, acl)?;
        }
        tree.create_content(root, "users", ResourceKind::Users, None, registry)?;
        snapshot::save_tree(&tree, snapshot_path)?;
        return Ok(format!("initialized {}", snapshot_path.display()));
    }

    let mut tree = load(snapshot_path, bus)?;
    let (output, changed) = match command {
        Command::Init { .. } => return Err(anyhow!("init doesn't run against a loaded tree")),
        Command::Add {
            parent,
            name,
            kind,
            actor,
        } => {
            let parent = resolve(&tree, &parent)?;
            let kind: ResourceKind = kind.parse()?;
            let id = tree.create_content(parent, &name, kind, actor, registry)?;
            let rid = tree.resource(id)?.rid();
            (
                format!(
                    "added {} {} (rid {})",
                    kind,
                    display_path(&tree.path_of(id)),
                    rid.unwrap_or_default()
                ),
                true,
            )
        }
        Command::Remove { path } => {
            let (parent, name) = locate(&tree, &path)?;
            let removed = tree.remove(parent, &name, RemoveOptions::default())?;
            tree.discard(removed)?;
            (format!("removed {}", display_path(&split_path(&path))), true)
        }
        Command::Move { path, dest, name } => {
            let (parent, old) = locate(&tree, &path)?;
            let dest = resolve(&tree, &dest)?;
            let id = tree.move_to(parent, &old, dest, name.as_deref())?;
            (format!("moved to {}", display_path(&tree.path_of(id))), true)
        }
        Command::Copy { path, dest, name } => {
            let (parent, old) = locate(&tree, &path)?;
            let dest = resolve(&tree, &dest)?;
            let id = tree.copy(parent, &old, dest, name.as_deref())?;
            (format!("copied to {}", display_path(&tree.path_of(id))), true)
        }
        Command::Order { path, names, clear } => {
            let id = resolve(&tree, &path)?;
            if clear {
                tree.clear_order(id)?;
            } else {
                tree.set_order(id, names.as_slice())?;
            }
            (tree.keys(id).join("\n"), true)
        }
        Command::Grant { path, user, roles } => {
            let id = resolve(&tree, &path)?;
            tree.add_user_roles(id, user, &roles, registry)?;
            (format_roles(&tree, id, user), true)
        }
        Command::Revoke { path, user, roles } => {
            let id = resolve(&tree, &path)?;
            tree.remove_user_roles(id, user, &roles)?;
            (format_roles(&tree, id, user), true)
        }
        Command::Acl { path, user } => {
            let id = resolve(&tree, &path)?;
            let ctx = SecurityContext::new(user, registry);
            let lines: Vec<String> = tree
                .computed_acl(id, &[], ctx)
                .map(|ace| ace.to_string())
                .collect();
            (lines.join("\n"), false)
        }
        Command::Permissions { path, user } => {
            let id = resolve(&tree, &path)?;
            let ctx = SecurityContext::new(user, registry);
            let perms = tree.simplified_permissions(id, ctx, &FirstMatchPolicy::new(ctx));
            (serde_json::to_string_pretty(&perms)?, false)
        }
        Command::Lookup { rid } => {
            let path = tree
                .index()
                .get(rid)
                .ok_or_else(|| anyhow!("rid {} is not indexed", rid))?;
            (display_path(path), false)
        }
        Command::Verify => {
            tree.verify_index()?;
            (format!("index ok: {} entries", tree.index().len()), false)
        }
        Command::RepairRoles => {
            let repaired = tree.repair_roles(registry)?;
            (format!("repaired {} role tables", repaired), repaired > 0)
        }
    };

    if changed {
        snapshot::save_tree(&tree, snapshot_path)?;
    }
    Ok(output)
}

fn format_roles(tree: &ResourceTree, id: NodeId, user: i64) -> String {
    let roles: Vec<String> = tree.get_roles(id, user).into_iter().collect();
    format!("{}: [{}]", user, roles.join(", "))
}
