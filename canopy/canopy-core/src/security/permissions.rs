use crate::tree::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Permission categories every content type exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Add,
    View,
    Edit,
    Delete,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Add, Category::View, Category::Edit, Category::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Add => "Add",
            Category::View => "View",
            Category::Edit => "Edit",
            Category::Delete => "Delete",
        }
    }
}

/// Namespaced permission name, e.g. `Wall:Edit`.
pub fn permission_name(kind: ResourceKind, category: Category) -> String {
    format!("{}:{}", kind.as_str(), category.as_str())
}

/// Maps `(kind, category)` to the namespaced permission name.
///
/// Lookups fall back to [`permission_name`] when no override is registered.
#[derive(Clone, Debug, Default)]
pub struct PermissionRegistry {
    overrides: HashMap<(ResourceKind, Category), String>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ResourceKind, category: Category, name: impl Into<String>) {
        self.overrides.insert((kind, category), name.into());
    }

    pub fn get(&self, kind: ResourceKind, category: Category) -> String {
        self.overrides
            .get(&(kind, category))
            .cloned()
            .unwrap_or_else(|| permission_name(kind, category))
    }

    /// Names for the given categories of one kind, in category order.
    pub fn for_kind(&self, kind: ResourceKind, categories: &[Category]) -> Vec<String> {
        categories.iter().map(|c| self.get(kind, *c)).collect()
    }

    pub fn all_for(&self, kind: ResourceKind) -> Vec<String> {
        self.for_kind(kind, &Category::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_are_namespaced() {
        let registry = PermissionRegistry::new();
        assert_eq!(registry.get(ResourceKind::Wall, Category::Edit), "Wall:Edit");
        assert_eq!(
            registry.all_for(ResourceKind::Card),
            vec!["Card:Add", "Card:View", "Card:Edit", "Card:Delete"]
        );
    }

    #[test]
    fn overrides_win() {
        let mut registry = PermissionRegistry::new();
        registry.register(ResourceKind::Root, Category::View, "Site:View");
        assert_eq!(registry.get(ResourceKind::Root, Category::View), "Site:View");
        assert_eq!(registry.get(ResourceKind::Root, Category::Edit), "Root:Edit");
    }
}
