use crate::tree::Rid;

/// Errors raised by tree, index and security operations.
///
/// Structural and identity errors are never retried internally. Callers
/// running inside [`ResourceTree::transaction`](crate::tree::ResourceTree::transaction)
/// get the tree restored before the error reaches them.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("resource already has a parent ({0}); remove it before adding it elsewhere")]
    AlreadyAttached(String),
    #[error("container already holds a resource named {0:?}")]
    NameConflict(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("identity index conflict: {0}")]
    IdentityConflict(String),
    #[error("resource is not attached to the indexed root")]
    NotAttached,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("order must name every child exactly once: {0}")]
    OrderMismatch(String),
    #[error("role {role:?} can't be assigned to a {kind} resource")]
    RoleNotPermitted { role: String, kind: String },
    #[error("unknown role {0:?}")]
    UnknownRole(String),
    #[error("cannot move a container into itself or one of its descendants")]
    Cycle,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TreeError {
    pub(crate) fn rid_missing(rid: Rid) -> Self {
        TreeError::NotFound(format!("rid {}", rid))
    }

    pub(crate) fn child_missing(name: &str) -> Self {
        TreeError::NotFound(format!("child {:?}", name))
    }

    /// True when the tree and index have diverged and the enclosing unit of
    /// work must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TreeError::IdentityConflict(_))
    }
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;
