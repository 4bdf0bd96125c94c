use crate::tree::{Capability, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named capability marker that can be granted to users on a resource.
///
/// `required` restricts where the role may be assigned: `None` means
/// anywhere, an empty set means nowhere, otherwise the resource must
/// provide at least one of the listed capabilities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    id: String,
    pub title: String,
    pub description: String,
    pub required: Option<BTreeSet<Capability>>,
}

impl Role {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: format!("role: {}", id),
            id,
            description: String::new(),
            required: None,
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

    pub fn restricted_to(mut self, required: impl IntoIterator<Item = Capability>) -> Self {
        self.required = Some(required.into_iter().collect());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn assignable(&self, resource: &Resource) -> bool {
        satisfies(self.required.as_ref(), resource)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

pub(crate) fn satisfies(required: Option<&BTreeSet<Capability>>, resource: &Resource) -> bool {
    match required {
        None => true,
        Some(tags) => tags.iter().any(|tag| resource.provides(*tag)),
    }
}
