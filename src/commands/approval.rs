//! Copying votes onto new patch sets.

use sqlx::SqliteConnection;

use crate::error::ReviewError;
use crate::models::{ChangeNotes, LabelTypes, PatchSetId};
use crate::server::ReviewServer;
use crate::services::approval_copier::{ApprovalCopier, ApprovalCopierResult};
use crate::services::change_store;

/// Compute the copies for `patch_set` and store them on the change.
///
/// `notes` must already contain the patch set; copied approvals are added to it.
pub(crate) async fn persist_copied_approvals(
    conn: &mut SqliteConnection,
    copier: &ApprovalCopier<'_>,
    notes: &mut ChangeNotes,
    label_types: &LabelTypes,
    patch_set_id: PatchSetId,
) -> Result<ApprovalCopierResult, ReviewError> {
    let target = notes
        .patch_set(patch_set_id.number)
        .cloned()
        .ok_or_else(|| ReviewError::not_found_with_id("PatchSet", patch_set_id.to_string()))?;
    let result = copier.for_patch_set(notes, label_types, &target)?;

    for data in &result.copied_approvals {
        change_store::upsert_approval(conn, &data.approval).await?;
        notes.upsert_approval(data.approval.clone());
    }
    log::debug!(
        "Patch set {}: {} vote(s) copied, {} outdated",
        patch_set_id,
        result.copied_approvals.len(),
        result.outdated_approvals.len()
    );
    Ok(result)
}

/// Copy eligible votes from the predecessor of a patch set onto it.
///
/// Running it again is harmless: direct votes on the patch set are never
/// touched and existing copies are rewritten with the same values.
///
/// # Arguments
/// * `patch_set_id` - The new patch set
///
/// # Returns
/// The copied and outdated votes
pub async fn copy_approvals_for_new_patch_set(
    server: &ReviewServer,
    patch_set_id: PatchSetId,
) -> Result<ApprovalCopierResult, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let mut notes = change_store::load_notes(&mut tx, patch_set_id.change_id).await?;
    let label_types = server.projects().hierarchy(&notes.change.project)?.label_types();

    let result = persist_copied_approvals(
        &mut tx,
        &server.copier(),
        &mut notes,
        &label_types,
        patch_set_id,
    )
    .await?;
    tx.commit().await?;
    Ok(result)
}
