//! Account and group directory.
//!
//! Accounts and group membership are owned by an external directory. The
//! engines only ask membership and lookup questions through [`AccountDirectory`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::models::{Account, AccountId};

/// Read-only view of accounts and groups.
pub trait AccountDirectory: Send + Sync {
    fn account(&self, id: AccountId) -> Option<Account>;

    /// Find the account owning a verified email.
    fn account_by_email(&self, email: &str) -> Option<AccountId>;

    /// Whether `account` is a member of the group named or identified by `group`.
    fn is_member(&self, account: AccountId, group: &str) -> bool;
}

/// Directory kept in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    groups: RwLock<HashMap<String, BTreeSet<AccountId>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: Account) {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(account.id, account);
    }

    /// Create or replace a group.
    pub fn add_group(&self, name: &str, members: impl IntoIterator<Item = AccountId>) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups.insert(name.to_string(), members.into_iter().collect());
    }
}

impl AccountDirectory for InMemoryDirectory {
    fn account(&self, id: AccountId) -> Option<Account> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(&id).cloned()
    }

    fn account_by_email(&self, email: &str) -> Option<AccountId> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.values().find(|a| a.has_email(email)).map(|a| a.id)
    }

    fn is_member(&self, account: AccountId, group: &str) -> bool {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.get(group).is_some_and(|members| members.contains(&account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_membership() {
        let dir = InMemoryDirectory::new();
        dir.add_account(Account::new(1, "Ursula", "ursula@example.com"));
        dir.add_group("maintainers", [AccountId(1)]);

        assert_eq!(dir.account_by_email("URSULA@example.com"), Some(AccountId(1)));
        assert!(dir.account(AccountId(2)).is_none());
        assert!(dir.is_member(AccountId(1), "maintainers"));
        assert!(!dir.is_member(AccountId(1), "unknown"));
    }
}
