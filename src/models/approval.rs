//! Approval (vote) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::patch_set::PatchSetId;

/// A vote cast by an account on one label of one patch set.
///
/// At most one approval exists per (patch set, label, account); a later vote
/// overwrites the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetApproval {
    pub patch_set_id: PatchSetId,
    pub label: String,
    pub account_id: AccountId,
    pub value: i16,

    /// Whether this approval was materialized by the approval copier.
    pub copied: bool,

    pub granted: DateTime<Utc>,

    /// The acting user when the vote was cast on behalf of `account_id`.
    pub real_account_id: Option<AccountId>,
}

impl PatchSetApproval {
    pub fn new(
        patch_set_id: PatchSetId,
        label: impl Into<String>,
        account_id: AccountId,
        value: i16,
        granted: DateTime<Utc>,
    ) -> Self {
        Self {
            patch_set_id,
            label: label.into(),
            account_id,
            value,
            copied: false,
            granted,
            real_account_id: None,
        }
    }

    /// A copy of this approval on another patch set.
    pub fn copy_to(&self, patch_set_id: PatchSetId) -> Self {
        Self {
            patch_set_id,
            copied: true,
            ..self.clone()
        }
    }

    pub fn label_vote(&self) -> LabelVote {
        LabelVote::new(&self.label, self.value)
    }

    /// Whether this approval occupies the same slot as `other`, ignoring patch set.
    pub fn same_voter(&self, other: &PatchSetApproval) -> bool {
        self.label == other.label && self.account_id == other.account_id
    }
}

/// A label name with a vote value, e.g. `Code-Review+2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelVote {
    pub label: String,
    pub value: i16,
}

impl LabelVote {
    pub fn new(label: impl Into<String>, value: i16) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }

    /// Render as `Label=value`, which reads better for zero votes.
    pub fn format_with_equals(&self) -> String {
        format!("{}={}", self.label, self.value)
    }
}

impl std::fmt::Display for LabelVote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value == 0 {
            write!(f, "-{}", self.label)
        } else if self.value > 0 {
            write!(f, "{}+{}", self.label, self.value)
        } else {
            write!(f, "{}{}", self.label, self.value)
        }
    }
}
