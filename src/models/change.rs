//! Change model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::patch_set::PatchSetId;

/// Numeric change id, unique across projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub i64);

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    /// Merged and abandoned changes are closed.
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::New)
    }
}

impl From<&str> for ChangeStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MERGED" => Self::Merged,
            "ABANDONED" => Self::Abandoned,
            _ => Self::New,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Merged => write!(f, "MERGED"),
            Self::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// A logical review unit proposing one commit to a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,

    /// Project name.
    pub project: String,

    /// Full destination ref name (e.g., "refs/heads/main").
    pub branch: String,

    pub status: ChangeStatus,
    pub owner: AccountId,
    pub subject: String,
    pub topic: Option<String>,
    pub is_private: bool,
    pub work_in_progress: bool,

    /// Number of the current patch set.
    pub current_patch_set: i32,

    /// Unresolved comment threads, as reported by the comment subsystem.
    pub unresolved_comment_count: i64,

    /// Set when the change was submitted bypassing submit requirements.
    pub submitted_bypassing_requirements: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Change {
    pub fn current_patch_set_id(&self) -> PatchSetId {
        PatchSetId::new(self.id, self.current_patch_set)
    }

    pub fn is_new(&self) -> bool {
        self.status == ChangeStatus::New
    }

    /// Short branch name without the `refs/heads/` prefix.
    pub fn short_branch(&self) -> &str {
        self.branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.branch)
    }
}

/// Normalize a branch name to a full `refs/heads/` ref.
pub fn full_branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}
