//! Rebase commands.
//!
//! The whole request is validated and planned before anything is stored.
//! All new patch sets, copied votes and messages are then written in one
//! transaction, and the patch set refs are created in one batched update.

use chrono::Utc;

use crate::error::ReviewError;
use crate::models::{AccountId, ChangeId, PatchSet};
use crate::server::ReviewServer;
use crate::services::approval_formatter::format_approval_copier_result;
use crate::services::change_store;
use crate::services::rebase_chain::{BaseSpec, RebaseInput, RebasePlan, RebaseSnapshot};

use super::approval::persist_copied_approvals;
use super::change::hierarchy;

/// Rebase a change together with its open ancestors.
///
/// # Arguments
/// * `actor` - The acting user
/// * `change_id` - Head of the chain
/// * `input` - Base and flags
///
/// # Returns
/// The new patch sets, ancestors first
pub async fn rebase_chain(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    input: RebaseInput,
) -> Result<Vec<PatchSet>, ReviewError> {
    run(server, actor, change_id, &input, true).await
}

/// Rebase a single change.
///
/// Without a base the change moves onto the current patch set of its open
/// parent change, or onto the branch tip when it has none.
pub async fn rebase_change(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    input: RebaseInput,
) -> Result<PatchSet, ReviewError> {
    let mut patch_sets = run(server, actor, change_id, &input, false).await?;
    patch_sets
        .pop()
        .ok_or_else(|| ReviewError::internal("rebase produced no patch set"))
}

async fn run(
    server: &ReviewServer,
    actor: AccountId,
    change_id: ChangeId,
    input: &RebaseInput,
    chain: bool,
) -> Result<Vec<PatchSet>, ReviewError> {
    let mut tx = server.pool().begin().await?;
    let head = change_store::load_notes(&mut tx, change_id).await?;
    let mut candidates =
        change_store::load_unmerged_for_branch(&mut tx, &head.change.project, &head.change.branch).await?;
    if !candidates.iter().any(|n| n.change.id == change_id) {
        candidates.push(head.clone());
    }
    let base_change = match BaseSpec::parse(input.base.as_deref()).change_id() {
        Some(id) => change_store::load_notes_opt(&mut tx, id).await?,
        None => None,
    };

    let plan: RebasePlan = {
        let snapshot = RebaseSnapshot {
            head: change_id,
            changes: &candidates,
            base_change: base_change.as_ref(),
        };
        server.rebaser().plan(actor, input, &snapshot, chain)?
    };

    let label_types = hierarchy(server, &plan.project)?.label_types();
    let copier = server.copier();
    let mut created = Vec::with_capacity(plan.hops.len());

    for hop in &plan.hops {
        let notes = candidates
            .iter_mut()
            .find(|n| n.change.id == hop.change_id)
            .ok_or_else(|| ReviewError::internal(format!("change {} left the chain", hop.change_id)))?;

        change_store::insert_patch_set(&mut tx, &hop.patch_set).await?;
        notes.add_patch_set(hop.patch_set.clone());
        let copied =
            persist_copied_approvals(&mut tx, &copier, notes, &label_types, hop.patch_set.id).await?;

        let mut message = hop.message.clone();
        if let Some(formatted) = format_approval_copier_result(&copied, &label_types) {
            message.message.push_str("\n\n");
            message.message.push_str(&formatted);
        }
        let now = Utc::now();
        change_store::insert_message(&mut tx, &message, now).await?;
        notes.change.updated_at = now;
        change_store::update_change(&mut tx, &notes.change).await?;
        created.push(hop.patch_set.clone());
    }

    server.git().update_refs(
        &plan.project,
        &plan.ref_updates(),
        &plan.audit_identity,
        &plan.reflog_message(),
    )?;
    tx.commit().await?;

    server
        .metrics()
        .record_rebase(plan.on_behalf_of_uploader, plan.rebase_chain, plan.allow_conflicts);
    log::info!(
        "Rebased {} change(s) of {} for account {}{}",
        created.len(),
        plan.project,
        actor,
        if plan.on_behalf_of_uploader { " on behalf of the uploaders" } else { "" }
    );
    Ok(created)
}
