use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::acl::{NamedAcl, Principal};
use super::permissions::PermissionRegistry;
use super::role::Role;
use crate::config::CanopyConfig;
use crate::content::ContentTypes;
use crate::error::{Result, TreeError};

static GLOBAL: OnceLock<SecurityRegistry> = OnceLock::new();

/// Registration table of roles, named ACLs and content types.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SecurityRegistry {
    roles: BTreeMap<String, Role>,
    acls: BTreeMap<String, NamedAcl>,
    permissions: PermissionRegistry,
    content_types: ContentTypes,
}

impl SecurityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CanopyConfig) -> Result<Self> {
        let mut registry = Self::new();
        for rc in &config.roles {
            let mut role = Role::new(rc.id.as_str()).with_description(rc.description.as_str());
            if let Some(title) = &rc.title {
                role = role.with_title(title.as_str());
            }
            role.required = rc.required.clone();
            registry.add_role(role);
        }

        for ac in &config.acls {
            let mut acl = NamedAcl::new(ac.name.as_str())
                .with_title(ac.title.as_str())
                .with_description(ac.description.as_str());
            acl.required = ac.required.clone();
            for base in &ac.extends {
                let base = registry
                    .acl(base)
                    .ok_or_else(|| TreeError::NotFound(format!("acl {:?}", base)))?;
                acl.extend(base);
            }
            for entry in &ac.entries {
                acl.push(entry.action, entry.principal.clone(), entry.permissions.clone());
            }
            registry.add_acl(acl)?;
        }

        registry.content_types = ContentTypes::from_config(&config.content_types);
        debug!(
            roles = registry.roles.len(),
            acls = registry.acls.len(),
            "security registry loaded"
        );
        Ok(registry)
    }

    /// The built-in profile: the registry for [`CanopyConfig::default`].
    pub fn default_profile() -> Result<Self> {
        Self::from_config(&CanopyConfig::default())
    }

    pub fn add_role(&mut self, role: Role) {
        if self.roles.contains_key(role.id()) {
            warn!(role = role.id(), "replacing registered role");
        }
        self.roles.insert(role.id().to_string(), role);
    }

    /// Register `acl`. Every role it references must already be registered.
    pub fn add_acl(&mut self, acl: NamedAcl) -> Result<()> {
        for entry in acl.entries() {
            if let Principal::Role(id) = &entry.principal {
                if !self.roles.contains_key(id) {
                    return Err(TreeError::UnknownRole(id.clone()));
                }
            }
        }
        self.acls.insert(acl.name.clone(), acl);
        Ok(())
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    /// Resolve a role id, failing with `UnknownRole`.
    pub fn require_role(&self, id: &str) -> Result<&Role> {
        self.role(id)
            .ok_or_else(|| TreeError::UnknownRole(id.to_string()))
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> + '_ {
        self.roles.values()
    }

    pub fn acl(&self, name: &str) -> Option<&NamedAcl> {
        self.acls.get(name)
    }

    pub fn acls(&self) -> impl Iterator<Item = &NamedAcl> + '_ {
        self.acls.values()
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    /// Install `self` as the process-wide registry. Fails if one is
    /// already installed.
    pub fn install(self) -> Result<&'static SecurityRegistry> {
        GLOBAL
            .set(self)
            .map_err(|_| TreeError::InvalidOperation("security registry already installed".into()))?;
        Self::global().ok_or_else(|| TreeError::NotFound("security registry".into()))
    }

    pub fn global() -> Option<&'static SecurityRegistry> {
        GLOBAL.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AclConfig, RoleConfig};
    use crate::security::acl::EVERYONE;

    #[test]
    fn default_profile_resolves() {
        let registry = SecurityRegistry::default_profile().unwrap();
        assert_eq!(registry.role("ia").unwrap().title, "Instance admin");
        let public = registry.acl("public_wall").unwrap();
        let private = registry.acl("private_wall").unwrap();
        assert_eq!(public.len(), private.len() + 1);
        assert_eq!(&public.entries()[..private.len()], private.entries());
        assert_eq!(
            public.entries().last().unwrap().principal,
            Principal::from(EVERYONE)
        );
    }

    #[test]
    fn unknown_role_in_acl_is_rejected() {
        let config = CanopyConfig {
            roles: vec![],
            acls: vec![AclConfig {
                name: "x".into(),
                title: String::new(),
                description: String::new(),
                required: None,
                extends: vec![],
                entries: CanopyConfig::default().acls[0].entries.clone(),
            }],
            content_types: vec![],
        };
        let err = SecurityRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, TreeError::UnknownRole(id) if id == "ia"));
    }

    #[test]
    fn role_title_defaults_to_id() {
        let config = CanopyConfig {
            roles: vec![RoleConfig {
                id: "editor".into(),
                title: None,
                description: String::new(),
                required: None,
            }],
            acls: vec![],
            content_types: vec![],
        };
        let registry = SecurityRegistry::from_config(&config).unwrap();
        assert_eq!(registry.require_role("editor").unwrap().title, "role: editor");
        assert!(matches!(
            registry.require_role("nope"),
            Err(TreeError::UnknownRole(_))
        ));
    }
}
