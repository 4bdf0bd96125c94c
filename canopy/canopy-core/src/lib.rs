pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod security;
pub mod snapshot;
pub mod tree;

pub use error::{Result, TreeError};
pub use tree::{NodeId, Resource, ResourceKind, ResourceTree, Rid, UserId};
