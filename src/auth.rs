//! Staff authentication and per-model permissions.
//!
//! Staff members are listed in a JSON users file, each with a bearer token
//! and a set of permissions. Handlers extract a [`Principal`] (which rejects
//! unauthenticated callers) and call [`Principal::require`] before mutating.

use crate::errors::{AppError, CatalogError, CatalogResult};
use anyhow::{Context, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
    sync::Arc,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    AddFolder,
    ChangeFolder,
    DeleteFolder,
    ChangeEntry,
    DeleteEntry,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::AddFolder => "add_folder",
            Permission::ChangeFolder => "change_folder",
            Permission::DeleteFolder => "delete_folder",
            Permission::ChangeEntry => "change_entry",
            Permission::DeleteEntry => "delete_entry",
        };
        f.write_str(name)
    }
}

/// One staff member as listed in the users file.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffUser {
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub permissions: HashSet<Permission>,
    /// Holds every permission.
    #[serde(default)]
    pub superuser: bool,
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    permissions: HashSet<Permission>,
    superuser: bool,
}

impl Principal {
    pub fn has(&self, permission: Permission) -> bool {
        self.superuser || self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> CatalogResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            warn!("{} denied {}", self.username, permission);
            Err(CatalogError::PermissionDenied(permission.to_string()))
        }
    }
}

/// Token → principal lookup shared by all requests.
#[derive(Clone, Default)]
pub struct AuthRegistry {
    by_token: Arc<HashMap<String, Principal>>,
}

impl AuthRegistry {
    pub fn from_users(users: Vec<StaffUser>) -> Self {
        let by_token = users
            .into_iter()
            .filter(|u| !u.token.is_empty())
            .map(|u| {
                (
                    u.token,
                    Principal {
                        username: u.username,
                        permissions: u.permissions,
                        superuser: u.superuser,
                    },
                )
            })
            .collect();
        Self {
            by_token: Arc::new(by_token),
        }
    }

    /// Load the users file. A missing file yields an empty registry, which
    /// rejects every request except the health checks.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "users file {} not found; every authenticated request will be refused",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading users file {}", path.display()))?;
        let users: Vec<StaffUser> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing users file {}", path.display()))?;
        info!("loaded {} staff users from {}", users.len(), path.display());
        Ok(Self::from_users(users))
    }

    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        self.by_token.get(token).cloned()
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    AuthRegistry: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let registry = AuthRegistry::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        token
            .and_then(|t| registry.authenticate(t))
            .ok_or_else(|| CatalogError::Unauthenticated.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superuser_holds_everything() {
        let registry = AuthRegistry::from_users(vec![
            StaffUser {
                username: "admin".into(),
                token: "t-admin".into(),
                permissions: HashSet::new(),
                superuser: true,
            },
            StaffUser {
                username: "editor".into(),
                token: "t-editor".into(),
                permissions: [Permission::ChangeEntry].into_iter().collect(),
                superuser: false,
            },
        ]);

        let admin = registry.authenticate("t-admin").unwrap();
        assert!(admin.require(Permission::DeleteFolder).is_ok());

        let editor = registry.authenticate("t-editor").unwrap();
        assert!(editor.require(Permission::ChangeEntry).is_ok());
        assert!(matches!(
            editor.require(Permission::DeleteEntry),
            Err(CatalogError::PermissionDenied(p)) if p == "delete_entry"
        ));

        assert!(registry.authenticate("nope").is_none());
    }

    #[test]
    fn users_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"[
                {"username": "sync-client", "token": "abc"},
                {"username": "curator", "token": "def",
                 "permissions": ["add_folder", "change_folder"]}
            ]"#,
        )
        .unwrap();

        let registry = AuthRegistry::load(&path).unwrap();
        let client = registry.authenticate("abc").unwrap();
        assert!(!client.has(Permission::AddFolder));
        let curator = registry.authenticate("def").unwrap();
        assert!(curator.has(Permission::AddFolder));
        assert!(!curator.has(Permission::DeleteFolder));

        let missing = AuthRegistry::load(dir.path().join("absent.json")).unwrap();
        assert!(missing.authenticate("abc").is_none());
    }
}
