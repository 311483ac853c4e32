//! Change message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::change::ChangeId;

/// Tag for messages written by a rebase.
pub const TAG_REBASE: &str = "autogenerated:review:rebase";

/// Tag for messages written when a patch set is uploaded.
pub const TAG_UPLOADED_PATCH_SET: &str = "autogenerated:review:newPatchSet";

/// Tag for messages written on abandon/restore/merge.
pub const TAG_STATUS: &str = "autogenerated:review:status";

/// An audit message appended to a change's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub id: i64,
    pub change_id: ChangeId,

    /// Patch set the message refers to, if any.
    pub patch_set: Option<i32>,

    pub author: AccountId,
    pub real_author: Option<AccountId>,
    pub message: String,
    pub tag: Option<String>,
    pub written_on: DateTime<Utc>,
}

/// A message about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeMessage {
    pub change_id: ChangeId,
    pub patch_set: Option<i32>,
    pub author: AccountId,
    pub real_author: Option<AccountId>,
    pub message: String,
    pub tag: Option<String>,
}

impl NewChangeMessage {
    pub fn new(change_id: ChangeId, patch_set: i32, author: AccountId, message: impl Into<String>) -> Self {
        Self {
            change_id,
            patch_set: Some(patch_set),
            author,
            real_author: None,
            message: message.into(),
            tag: None,
        }
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// Record `real_author` when it differs from the author.
    pub fn on_behalf(mut self, real_author: AccountId) -> Self {
        if real_author != self.author {
            self.real_author = Some(real_author);
        }
        self
    }
}
