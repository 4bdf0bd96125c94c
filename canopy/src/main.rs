//! Command-line front end over a canopy snapshot file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Resource tree with stable ids and role based ACLs")]
struct Cli {
    /// Security profile (roles, ACLs, content types) as JSON
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file holding the tree
    #[arg(short, long, global = true, default_value = "canopy.json")]
    snapshot: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create an empty tree
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },

    /// Create a resource under a container
    Add {
        parent: String,
        name: String,

        #[arg(short, long, default_value = "folder")]
        kind: String,

        /// Acting user id; receives the kind's ownership role
        #[arg(long = "as")]
        actor: Option<i64>,
    },

    /// Remove a resource and its subtree
    Remove { path: String },

    /// Move a resource into another container
    Move {
        path: String,
        dest: String,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Copy a resource; the copy gets fresh rids
    Copy {
        path: String,
        dest: String,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Set or clear the explicit child order of a container
    Order {
        path: String,
        names: Vec<String>,

        #[arg(long, conflicts_with = "names")]
        clear: bool,
    },

    /// Grant roles to a user on a resource
    Grant {
        path: String,
        user: i64,
        #[arg(required = true)]
        roles: Vec<String>,
    },

    /// Revoke roles from a user on a resource
    Revoke {
        path: String,
        user: i64,
        #[arg(required = true)]
        roles: Vec<String>,
    },

    /// Print the computed ACL of a resource
    Acl {
        path: String,

        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Print the simplified permissions of a user as JSON
    Permissions {
        path: String,

        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Print the path of a rid
    Lookup { rid: i64 },

    /// Check that the stored index matches the tree
    Verify,

    /// Normalize user and wall role tables
    RepairRoles,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let registry = commands::load_registry(cli.config.as_deref())?;
    let output = commands::run(cli.command, &cli.snapshot, registry).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
