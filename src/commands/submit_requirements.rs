//! Submit requirement queries.

use crate::error::ReviewError;
use crate::models::{ChangeId, SubmitRequirement, SubmitRequirementResult};
use crate::server::ReviewServer;
use crate::services::change_store;

use super::change::hierarchy;

/// Submit requirement results of a change.
///
/// Open changes are evaluated against the current configuration. Merged and
/// abandoned changes return the results frozen when they were closed.
///
/// # Arguments
/// * `change_id` - The change to evaluate
pub async fn evaluate_submit_requirements(
    server: &ReviewServer,
    change_id: ChangeId,
) -> Result<Vec<SubmitRequirementResult>, ReviewError> {
    let mut conn = server.pool().acquire().await?;
    let notes = change_store::load_notes(&mut conn, change_id).await?;

    if notes.change.status.is_closed() {
        if let Some(frozen) = change_store::latest_snapshot(&mut conn, change_id).await? {
            return Ok(frozen);
        }
        log::warn!(
            "Change {} is {} but has no frozen submit requirements, evaluating live",
            change_id,
            notes.change.status
        );
    }

    let hierarchy = hierarchy(server, &notes.change.project)?;
    server.evaluator().evaluate_all(&notes, &hierarchy)
}

/// Evaluate a requirement definition against a change without storing it.
///
/// # Errors
///
/// `BadRequest` when the definition has no submittability expression.
pub async fn check_submit_requirement(
    server: &ReviewServer,
    change_id: ChangeId,
    requirement: SubmitRequirement,
) -> Result<SubmitRequirementResult, ReviewError> {
    let mut conn = server.pool().acquire().await?;
    let notes = change_store::load_notes(&mut conn, change_id).await?;
    let hierarchy = hierarchy(server, &notes.change.project)?;
    server.evaluator().check_requirement(&notes, &hierarchy, &requirement)
}
