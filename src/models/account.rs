//! Accounts and the identities stamped on commits and ref updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl AccountId {
    /// The placeholder used for this account in change messages.
    ///
    /// Messages are stored with placeholders so that renames never rewrite history.
    pub fn template(&self) -> String {
        format!("<ACCOUNT_{}>", self.0)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub full_name: String,
    pub preferred_email: String,

    /// Additional verified emails, not including the preferred one.
    #[serde(default)]
    pub secondary_emails: Vec<String>,
}

impl Account {
    pub fn new(id: i64, full_name: impl Into<String>, preferred_email: impl Into<String>) -> Self {
        Self {
            id: AccountId(id),
            full_name: full_name.into(),
            preferred_email: preferred_email.into(),
            secondary_emails: Vec::new(),
        }
    }

    /// Whether `email` is one of this account's verified emails.
    pub fn has_email(&self, email: &str) -> bool {
        self.preferred_email.eq_ignore_ascii_case(email)
            || self
                .secondary_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(email))
    }

    /// Commit identity for this account at the current time.
    pub fn ident(&self) -> PersonIdent {
        PersonIdent::now(&self.full_name, &self.preferred_email)
    }
}

/// Name, email and timestamp recorded as a commit author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl PersonIdent {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
        }
    }

    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(name, email, Utc::now())
    }
}

/// Identity recorded in the reflog for a ref update.
///
/// Only used for rendering audit entries; permission decisions always use the
/// acting account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditIdentity {
    Single(AccountId),
    Combined(Vec<AccountId>),
}

impl AuditIdentity {
    /// Collapse the identities of several updates into one.
    ///
    /// Returns `None` for an empty input.
    pub fn from_accounts(accounts: impl IntoIterator<Item = AccountId>) -> Option<Self> {
        let mut distinct: Vec<AccountId> = Vec::new();
        for account in accounts {
            if !distinct.contains(&account) {
                distinct.push(account);
            }
        }
        match distinct.len() {
            0 => None,
            1 => Some(Self::Single(distinct[0])),
            _ => Some(Self::Combined(distinct)),
        }
    }

    /// Render the identity as stored in reflog entries.
    pub fn render(&self) -> String {
        match self {
            Self::Single(id) => format!("account-{}", id),
            Self::Combined(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| format!("account-{}", id)).collect();
                format!("combined({})", parts.join(","))
            }
        }
    }
}
