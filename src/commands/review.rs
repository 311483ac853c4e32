//! Voting on patch sets.
//!
//! A vote on an older patch set is carried to the follow-up patch sets that
//! only hold copies, as long as the label's copy condition keeps matching.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::models::{AccountId, LabelVote, NewChangeMessage, PatchSetApproval, PatchSetId};
use crate::server::ReviewServer;
use crate::services::approval_formatter::format_follow_up_updates;
use crate::services::change_store;
use crate::services::permissions::{ChangePermissions, Permission};

use super::change::{hierarchy, record_update, require_open};

/// Input for review command.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    /// Votes by label name. A value of 0 deletes the vote.
    #[serde(default)]
    pub labels: BTreeMap<String, i16>,

    /// Free-form comment appended to the change message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of a review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub labels: BTreeMap<String, i16>,

    /// Text of the change message written for the review.
    pub message: String,
}

/// Cast, change or delete votes on a patch set.
///
/// # Arguments
/// * `actor` - The voter
/// * `patch_set_id` - Patch set being voted on; need not be current
/// * `input` - Votes and an optional comment
///
/// # Returns
/// The applied votes and the change message
pub async fn review(
    server: &ReviewServer,
    actor: AccountId,
    patch_set_id: PatchSetId,
    input: ReviewInput,
) -> Result<ReviewResult, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, patch_set_id.change_id).await?;
    require_open(&notes.change)?;
    ChangePermissions::new(server.permissions(), &notes.change).check(actor, Permission::Read)?;
    if notes.patch_set(patch_set_id.number).is_none() {
        return Err(ReviewError::not_found_with_id("PatchSet", patch_set_id.to_string()));
    }

    let label_types = hierarchy(server, &notes.change.project)?.label_types();
    for (label, value) in &input.labels {
        let Some(label_type) = label_types.by_label(label) else {
            return Err(ReviewError::bad_request_field(
                format!("label \"{}\" is not a configured label", label),
                "labels",
            ));
        };
        if !label_type.allows(*value) {
            return Err(ReviewError::bad_request_field(
                format!("label \"{}\": {} is not a valid value", label, value),
                "labels",
            ));
        }
    }

    let copier = server.copier();
    let now = Utc::now();
    let mut votes = Vec::new();
    let mut follow_up_texts = Vec::new();

    for (label, value) in &input.labels {
        let existing = notes.approval(patch_set_id.number, label, actor).cloned();
        if *value == 0 && existing.is_none() {
            continue;
        }
        let vote = PatchSetApproval::new(patch_set_id, label.as_str(), actor, *value, now);
        if *value == 0 {
            change_store::delete_approval(&mut tx, patch_set_id, label, actor).await?;
            notes.remove_approval(patch_set_id, label, actor);
        } else {
            change_store::upsert_approval(&mut tx, &vote).await?;
            notes.upsert_approval(vote.clone());
        }
        votes.push(vote.label_vote());

        let plan = copier.update_follow_ups(&notes, &label_types, &vote)?;
        for copy in &plan.upserts {
            change_store::upsert_approval(&mut tx, copy).await?;
            notes.upsert_approval(copy.clone());
        }
        for target in &plan.removals {
            change_store::delete_approval(&mut tx, *target, label, actor).await?;
            notes.remove_approval(*target, label, actor);
        }
        if let Some(text) = format_follow_up_updates(&vote.label_vote(), &plan) {
            follow_up_texts.push(text);
        }
    }

    let mut text = format!("Patch Set {}:", patch_set_id.number);
    if !votes.is_empty() {
        let rendered: Vec<String> = votes.iter().map(LabelVote::to_string).collect();
        text.push(' ');
        text.push_str(&rendered.join(" "));
    }
    if let Some(comment) = input.message.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        text.push_str("\n\n");
        text.push_str(comment);
    }
    for follow_up in &follow_up_texts {
        text.push_str("\n\n");
        text.push_str(follow_up);
    }

    let message = NewChangeMessage::new(notes.change.id, patch_set_id.number, actor, text.clone());
    record_update(&mut tx, &mut notes.change, &message).await?;
    tx.commit().await?;

    log::debug!(
        "Account {} voted {} on patch set {}",
        actor,
        votes.len(),
        patch_set_id
    );
    Ok(ReviewResult {
        labels: input.labels,
        message: text,
    })
}
