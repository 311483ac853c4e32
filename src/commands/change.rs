//! Change lifecycle commands: create, upload, abandon, restore and submit.
//!
//! Each command runs in one SQLite transaction. Ref updates go to git storage
//! last, right before the commit, so a failed ref update leaves no rows behind.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::ReviewError;
use crate::models::change_message::{TAG_STATUS, TAG_UPLOADED_PATCH_SET};
use crate::models::{
    full_branch_ref, AccountId, AuditIdentity, Change, ChangeId, ChangeNotes, ChangeStatus,
    CommitId, NewChangeMessage, PatchSet, PatchSetId, ProjectHierarchy,
};
use crate::server::ReviewServer;
use crate::services::approval_copier::ApprovalCopierResult;
use crate::services::approval_formatter::{format_approval_copier_result, outdated_vote_notices};
use crate::services::change_store;
use crate::services::git::{self, RefUpdate};
use crate::services::permissions::{ChangePermissions, Permission};

use super::approval::persist_copied_approvals;

/// Input for create_change command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChangeInput {
    pub project: String,
    /// Destination branch, short or full ref name.
    pub branch: String,
    /// Commit of patch set 1; must already be in git storage.
    pub commit_id: CommitId,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub work_in_progress: bool,
}

/// Input for upload_patch_set command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPatchSetInput {
    pub change_id: ChangeId,
    pub commit_id: CommitId,
}

/// Outcome of uploading a patch set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSetUploaded {
    pub patch_set: PatchSet,
    pub copier_result: ApprovalCopierResult,

    /// Text of the change message written for the upload.
    pub message: String,

    /// Per voter notice about votes that did not survive. Empty for WIP changes.
    pub outdated_notices: BTreeMap<AccountId, String>,
}

/// Input for submit command.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInput {
    /// Skip submit requirement checks; every requirement is then reported as FORCED.
    #[serde(default)]
    pub bypass_requirements: bool,
}

pub(crate) fn hierarchy(server: &ReviewServer, project: &str) -> Result<ProjectHierarchy, ReviewError> {
    server.projects().hierarchy(project)
}

pub(crate) fn require_open(change: &Change) -> Result<(), ReviewError> {
    if change.is_new() {
        Ok(())
    } else {
        Err(ReviewError::conflict_on_change(
            format!("change {} is {}", change.id, change.status.to_string().to_lowercase()),
            change.id.0,
        ))
    }
}

/// Write `message` and bump the change's update time.
pub(crate) async fn record_update(
    conn: &mut SqliteConnection,
    change: &mut Change,
    message: &NewChangeMessage,
) -> Result<(), ReviewError> {
    let now = Utc::now();
    change_store::insert_message(conn, message, now).await?;
    change.updated_at = now;
    change_store::update_change(conn, change).await
}

/// Create a change with its first patch set.
///
/// # Arguments
/// * `actor` - Owner and uploader of the change
/// * `input` - Destination and commit
///
/// # Returns
/// The stored change
pub async fn create_change(
    server: &ReviewServer,
    actor: AccountId,
    input: CreateChangeInput,
) -> Result<ChangeNotes, ReviewError> {
    hierarchy(server, &input.project)?;
    let commit = server.git().read_commit(&input.project, &input.commit_id)?;

    let now = Utc::now();
    let mut change = Change {
        id: ChangeId(0),
        project: input.project.clone(),
        branch: full_branch_ref(&input.branch),
        status: ChangeStatus::New,
        owner: actor,
        subject: commit.subject().to_string(),
        topic: input.topic,
        is_private: input.is_private,
        work_in_progress: input.work_in_progress,
        current_patch_set: 1,
        unresolved_comment_count: 0,
        submitted_bypassing_requirements: false,
        created_at: now,
        updated_at: now,
    };

    let mut tx = server.pool().begin().await?;
    change.id = change_store::insert_change(&mut tx, &change).await?;
    let patch_set = PatchSet {
        id: PatchSetId::new(change.id, 1),
        commit_id: commit.id.clone(),
        uploader: actor,
        real_uploader: None,
        created_at: now,
    };
    change_store::insert_patch_set(&mut tx, &patch_set).await?;
    let message = NewChangeMessage::new(change.id, 1, actor, "Uploaded patch set 1.")
        .tagged(TAG_UPLOADED_PATCH_SET);
    change_store::insert_message(&mut tx, &message, now).await?;

    let notes = change_store::load_notes(&mut tx, change.id).await?;
    server.git().update_refs(
        &change.project,
        &[RefUpdate {
            name: patch_set.id.ref_name(),
            old: None,
            new: patch_set.commit_id.clone(),
        }],
        &AuditIdentity::Single(actor),
        "create change",
    )?;
    tx.commit().await?;

    log::info!("Created change {} in {} on {}", change.id, change.project, change.branch);
    Ok(notes)
}

/// Upload a new patch set to an open change.
///
/// Votes on the previous patch set are copied per label copy condition; the
/// change message lists copied and outdated votes.
pub async fn upload_patch_set(
    server: &ReviewServer,
    actor: AccountId,
    input: UploadPatchSetInput,
) -> Result<PatchSetUploaded, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, input.change_id).await?;
    require_open(&notes.change)?;
    ChangePermissions::new(server.permissions(), &notes.change).check(actor, Permission::AddPatchSet)?;

    let project = notes.change.project.clone();
    let commit = server.git().read_commit(&project, &input.commit_id)?;
    let current = notes.current_patch_set()?.clone();
    if current.commit_id == commit.id {
        return Err(ReviewError::conflict_on_change(
            format!("commit {} is already patch set {}", commit.id.short(), current.number()),
            notes.change.id.0,
        ));
    }

    let label_types = hierarchy(server, &project)?.label_types();
    let number = notes.patch_sets.keys().next_back().copied().unwrap_or(0) + 1;
    let patch_set = PatchSet {
        id: PatchSetId::new(notes.change.id, number),
        commit_id: commit.id.clone(),
        uploader: actor,
        real_uploader: None,
        created_at: Utc::now(),
    };
    change_store::insert_patch_set(&mut tx, &patch_set).await?;
    notes.add_patch_set(patch_set.clone());

    let copier_result =
        persist_copied_approvals(&mut tx, &server.copier(), &mut notes, &label_types, patch_set.id).await?;

    let mut text = format!("Uploaded patch set {}.", number);
    if let Some(formatted) = format_approval_copier_result(&copier_result, &label_types) {
        text.push_str("\n\n");
        text.push_str(&formatted);
    }
    let message = NewChangeMessage::new(notes.change.id, number, actor, text.clone())
        .tagged(TAG_UPLOADED_PATCH_SET);
    notes.change.subject = commit.subject().to_string();
    record_update(&mut tx, &mut notes.change, &message).await?;

    server.git().update_refs(
        &project,
        &[RefUpdate {
            name: patch_set.id.ref_name(),
            old: None,
            new: patch_set.commit_id.clone(),
        }],
        &AuditIdentity::Single(actor),
        "upload patch set",
    )?;
    tx.commit().await?;

    let outdated_notices = if notes.change.work_in_progress {
        BTreeMap::new()
    } else {
        outdated_vote_notices(&copier_result)
    };
    Ok(PatchSetUploaded {
        patch_set,
        copier_result,
        message: text,
        outdated_notices,
    })
}

/// Abandon an open change, freezing its submit requirement results.
pub async fn abandon_change(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    message: Option<String>,
) -> Result<ChangeNotes, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, change_id).await?;
    require_open(&notes.change)?;
    ChangePermissions::new(server.permissions(), &notes.change).check(actor, Permission::Abandon)?;

    notes.change.status = ChangeStatus::Abandoned;
    let results = server
        .evaluator()
        .evaluate_all(&notes, &hierarchy(server, &notes.change.project)?)?;
    change_store::insert_snapshot(&mut tx, change_id, ChangeStatus::Abandoned, &results).await?;

    let text = with_comment("Abandoned", message.as_deref());
    let patch_set = notes.change.current_patch_set;
    let entry = NewChangeMessage::new(change_id, patch_set, actor, text).tagged(TAG_STATUS);
    record_update(&mut tx, &mut notes.change, &entry).await?;
    tx.commit().await?;

    log::info!("Change {} abandoned by account {}", change_id, actor);
    Ok(notes)
}

/// Restore an abandoned change. Its submit requirements are evaluated live again.
pub async fn restore_change(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    message: Option<String>,
) -> Result<ChangeNotes, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, change_id).await?;
    if notes.change.status != ChangeStatus::Abandoned {
        return Err(ReviewError::conflict_on_change(
            format!("change {} is {}", change_id, notes.change.status.to_string().to_lowercase()),
            change_id.0,
        ));
    }
    ChangePermissions::new(server.permissions(), &notes.change).check(actor, Permission::Abandon)?;

    notes.change.status = ChangeStatus::New;
    let text = with_comment("Restored", message.as_deref());
    let patch_set = notes.change.current_patch_set;
    let entry = NewChangeMessage::new(change_id, patch_set, actor, text).tagged(TAG_STATUS);
    record_update(&mut tx, &mut notes.change, &entry).await?;
    tx.commit().await?;

    log::info!("Change {} restored by account {}", change_id, actor);
    Ok(notes)
}

/// Merge the current patch set into the destination branch.
///
/// The patch set must be based on the branch tip. Unless requirements are
/// bypassed, every submit requirement must allow submission.
pub async fn submit_change(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    input: SubmitInput,
) -> Result<ChangeNotes, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, change_id).await?;
    require_open(&notes.change)?;
    ChangePermissions::new(server.permissions(), &notes.change).check(actor, Permission::Submit)?;

    let project = notes.change.project.clone();
    let branch = notes.change.branch.clone();
    let hierarchy = hierarchy(server, &project)?;

    if input.bypass_requirements {
        log::warn!("Change {} submitted by account {} bypassing submit requirements", change_id, actor);
        notes.change.submitted_bypassing_requirements = true;
    }
    let results = server.evaluator().evaluate_all(&notes, &hierarchy)?;
    if let Some(blocking) = results.iter().find(|r| !r.fulfilled()) {
        return Err(ReviewError::conflict_on_change(
            format!(
                "change {}: submit requirement {} is not satisfied",
                change_id,
                blocking.name()
            ),
            change_id.0,
        ));
    }

    let current = notes.current_patch_set()?.clone();
    let tip = server.git().resolve_ref(&project, &branch)?;
    if let Some(tip) = &tip {
        if !git::is_ancestor(server.git(), &project, tip, &current.commit_id)? {
            return Err(ReviewError::conflict_on_change(
                format!("change {}: patch set {} needs rebase", change_id, current.number()),
                change_id.0,
            ));
        }
    }

    notes.change.status = ChangeStatus::Merged;
    change_store::insert_snapshot(&mut tx, change_id, ChangeStatus::Merged, &results).await?;
    let entry = NewChangeMessage::new(
        change_id,
        current.number(),
        actor,
        "Change has been successfully merged",
    )
    .tagged(TAG_STATUS);
    record_update(&mut tx, &mut notes.change, &entry).await?;

    server.git().update_refs(
        &project,
        &[RefUpdate {
            name: branch.clone(),
            old: tip,
            new: current.commit_id.clone(),
        }],
        &AuditIdentity::Single(actor),
        &format!("merge change {}", change_id),
    )?;
    tx.commit().await?;

    log::info!("Change {} merged into {} of {}", change_id, branch, project);
    Ok(notes)
}

fn with_comment(head: &str, comment: Option<&str>) -> String {
    match comment.map(str::trim).filter(|c| !c.is_empty()) {
        Some(comment) => format!("{}\n\n{}", head, comment),
        None => head.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_comment() {
        assert_eq!(with_comment("Abandoned", None), "Abandoned");
        assert_eq!(with_comment("Abandoned", Some("  ")), "Abandoned");
        assert_eq!(with_comment("Restored", Some("needed after all")), "Restored\n\nneeded after all");
    }
}
