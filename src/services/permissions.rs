//! Permission checks.
//!
//! The permission engine itself is external: [`PermissionBackend`] answers
//! yes/no for an account, permission and ref. [`ChangePermissions`] adds the
//! rights a change owner has implicitly and turns denials into errors.

use std::sync::RwLock;

use crate::error::ReviewError;
use crate::models::{AccountId, Change};

/// Ref-level permissions consulted by review operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    AddPatchSet,
    Rebase,
    Submit,
    Abandon,
    ForgeAuthor,
    ForgeCommitter,
    ForgeServer,
    ViewPrivateChanges,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::AddPatchSet => "add patch set",
            Self::Rebase => "rebase",
            Self::Submit => "submit",
            Self::Abandon => "abandon",
            Self::ForgeAuthor => "forge author",
            Self::ForgeCommitter => "forge committer",
            Self::ForgeServer => "forge server",
            Self::ViewPrivateChanges => "view private changes",
        };
        write!(f, "{}", s)
    }
}

/// Answers whether an account holds a permission on a ref.
pub trait PermissionBackend: Send + Sync {
    fn allows(&self, account: AccountId, permission: Permission, project: &str, ref_name: &str) -> bool;
}

/// One allow rule of [`StaticPermissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// `None` grants to every account.
    pub account: Option<AccountId>,
    pub permission: Permission,

    /// `None` applies to every project.
    pub project: Option<String>,

    /// Exact ref name, or a prefix ending in `*`.
    pub ref_pattern: String,
}

impl Grant {
    fn applies(&self, account: AccountId, permission: Permission, project: &str, ref_name: &str) -> bool {
        if self.permission != permission {
            return false;
        }
        if self.account.is_some_and(|a| a != account) {
            return false;
        }
        if self.project.as_deref().is_some_and(|p| p != project) {
            return false;
        }
        match self.ref_pattern.strip_suffix('*') {
            Some(prefix) => ref_name.starts_with(prefix),
            None => ref_name == self.ref_pattern,
        }
    }
}

/// A fixed list of grants held in memory.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: RwLock<Vec<Grant>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `permission` to `account` on every ref of every project.
    pub fn grant(&self, account: AccountId, permission: Permission) {
        self.add(Grant {
            account: Some(account),
            permission,
            project: None,
            ref_pattern: "refs/*".to_string(),
        });
    }

    /// Grant `permission` to every account on every ref of every project.
    pub fn grant_all(&self, permission: Permission) {
        self.add(Grant {
            account: None,
            permission,
            project: None,
            ref_pattern: "refs/*".to_string(),
        });
    }

    pub fn add(&self, grant: Grant) {
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants.push(grant);
    }

    /// Remove every grant of `permission` to `account`.
    pub fn revoke(&self, account: AccountId, permission: Permission) {
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants.retain(|g| !(g.account == Some(account) && g.permission == permission));
    }
}

impl PermissionBackend for StaticPermissions {
    fn allows(&self, account: AccountId, permission: Permission, project: &str, ref_name: &str) -> bool {
        let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
        grants
            .iter()
            .any(|g| g.applies(account, permission, project, ref_name))
    }
}

/// Permissions of accounts on one change.
pub struct ChangePermissions<'a> {
    backend: &'a dyn PermissionBackend,
    change: &'a Change,
}

impl<'a> ChangePermissions<'a> {
    pub fn new(backend: &'a dyn PermissionBackend, change: &'a Change) -> Self {
        Self { backend, change }
    }

    pub fn test(&self, account: AccountId, permission: Permission) -> bool {
        let is_owner = account == self.change.owner;
        let allowed = |p: Permission| {
            self.backend
                .allows(account, p, &self.change.project, &self.change.branch)
        };
        match permission {
            Permission::Read => {
                is_owner
                    || (allowed(Permission::Read)
                        && (!self.change.is_private || allowed(Permission::ViewPrivateChanges)))
            }
            Permission::AddPatchSet | Permission::Abandon => is_owner || allowed(permission),
            _ => allowed(permission),
        }
    }

    /// Whether `account` may rebase: owner, or REBASE or SUBMIT on the branch.
    pub fn can_rebase(&self, account: AccountId) -> bool {
        account == self.change.owner
            || self.test(account, Permission::Rebase)
            || self.test(account, Permission::Submit)
    }

    /// Fail with "<permission> not permitted" unless allowed.
    pub fn check(&self, account: AccountId, permission: Permission) -> Result<(), ReviewError> {
        if self.test(account, permission) {
            Ok(())
        } else {
            Err(ReviewError::permission_denied(format!("{} not permitted", permission)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeId, ChangeStatus};
    use chrono::Utc;

    fn change(owner: i64) -> Change {
        Change {
            id: ChangeId(1),
            project: "app".to_string(),
            branch: "refs/heads/main".to_string(),
            status: ChangeStatus::New,
            owner: AccountId(owner),
            subject: "s".to_string(),
            topic: None,
            is_private: false,
            work_in_progress: false,
            current_patch_set: 1,
            unresolved_comment_count: 0,
            submitted_bypassing_requirements: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ref_patterns() {
        let perms = StaticPermissions::new();
        perms.add(Grant {
            account: Some(AccountId(2)),
            permission: Permission::Submit,
            project: Some("app".to_string()),
            ref_pattern: "refs/heads/main".to_string(),
        });
        assert!(perms.allows(AccountId(2), Permission::Submit, "app", "refs/heads/main"));
        assert!(!perms.allows(AccountId(2), Permission::Submit, "app", "refs/heads/dev"));
        assert!(!perms.allows(AccountId(2), Permission::Submit, "other", "refs/heads/main"));
    }

    #[test]
    fn test_owner_has_implicit_rights() {
        let perms = StaticPermissions::new();
        let change = change(1);
        let cp = ChangePermissions::new(&perms, &change);
        assert!(cp.test(AccountId(1), Permission::Read));
        assert!(cp.test(AccountId(1), Permission::AddPatchSet));
        assert!(cp.can_rebase(AccountId(1)));
        assert!(!cp.can_rebase(AccountId(2)));

        let err = cp.check(AccountId(2), Permission::Rebase).unwrap_err();
        assert_eq!(err.message(), "rebase not permitted");
    }

    #[test]
    fn test_private_change_needs_view_private() {
        let perms = StaticPermissions::new();
        perms.grant_all(Permission::Read);
        let mut change = change(1);
        change.is_private = true;
        let cp = ChangePermissions::new(&perms, &change);
        assert!(!cp.test(AccountId(2), Permission::Read));
        perms.grant(AccountId(2), Permission::ViewPrivateChanges);
        assert!(cp.test(AccountId(2), Permission::Read));
    }
}
