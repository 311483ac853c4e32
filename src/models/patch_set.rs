//! Patch set model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::change::ChangeId;

/// Hex-encoded commit id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in messages.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one patch set of one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchSetId {
    pub change_id: ChangeId,
    pub number: i32,
}

impl PatchSetId {
    pub fn new(change_id: ChangeId, number: i32) -> Self {
        Self { change_id, number }
    }

    pub fn next(&self) -> Self {
        Self::new(self.change_id, self.number + 1)
    }

    /// Ref under which the patch set commit is stored, e.g. `refs/changes/01/1/2`.
    pub fn ref_name(&self) -> String {
        format!(
            "refs/changes/{:02}/{}/{}",
            self.change_id.0 % 100,
            self.change_id.0,
            self.number
        )
    }

    /// Parse a ref produced by [`PatchSetId::ref_name`].
    pub fn from_ref(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("refs/changes/")?;
        let mut parts = rest.split('/');
        let shard = parts.next()?;
        let change: i64 = parts.next()?.parse().ok()?;
        let number: i32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || shard != format!("{:02}", change % 100) {
            return None;
        }
        Some(Self::new(ChangeId(change), number))
    }
}

impl std::fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.change_id, self.number)
    }
}

/// An immutable revision of a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: PatchSetId,
    pub commit_id: CommitId,
    pub uploader: AccountId,

    /// The acting user when the patch set was uploaded on behalf of `uploader`.
    pub real_uploader: Option<AccountId>,

    pub created_at: DateTime<Utc>,
}

impl PatchSet {
    pub fn number(&self) -> i32 {
        self.id.number
    }

    /// The account that actually performed the upload.
    pub fn real_uploader_or_uploader(&self) -> AccountId {
        self.real_uploader.unwrap_or(self.uploader)
    }
}

/// How a patch set differs from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Rework,
    TrivialRebase,
    MergeFirstParentUpdate,
    NoCodeChange,
    NoChange,
}

impl ChangeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "REWORK" => Some(Self::Rework),
            "TRIVIAL_REBASE" => Some(Self::TrivialRebase),
            "MERGE_FIRST_PARENT_UPDATE" => Some(Self::MergeFirstParentUpdate),
            "NO_CODE_CHANGE" => Some(Self::NoCodeChange),
            "NO_CHANGE" => Some(Self::NoChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rework => write!(f, "REWORK"),
            Self::TrivialRebase => write!(f, "TRIVIAL_REBASE"),
            Self::MergeFirstParentUpdate => write!(f, "MERGE_FIRST_PARENT_UPDATE"),
            Self::NoCodeChange => write!(f, "NO_CODE_CHANGE"),
            Self::NoChange => write!(f, "NO_CHANGE"),
        }
    }
}
