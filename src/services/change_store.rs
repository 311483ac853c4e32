//! Database queries for changes, patch sets, votes, messages and snapshots.
//!
//! Every function takes a connection so callers decide the transaction
//! boundary: a single command runs all of its writes on one transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::ReviewError;
use crate::models::{
    AccountId, Change, ChangeId, ChangeMessage, ChangeNotes, ChangeStatus, CommitId,
    NewChangeMessage, PatchSet, PatchSetApproval, PatchSetId, SubmitRequirementResult,
};

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    project: String,
    branch: String,
    status: String,
    owner_id: i64,
    subject: String,
    topic: Option<String>,
    is_private: bool,
    work_in_progress: bool,
    current_patch_set: i32,
    unresolved_comment_count: i64,
    submitted_bypassing_requirements: bool,
    created_at: i64,
    updated_at: i64,
}

impl From<ChangeRow> for Change {
    fn from(row: ChangeRow) -> Self {
        Change {
            id: ChangeId(row.id),
            project: row.project,
            branch: row.branch,
            status: ChangeStatus::from(row.status.as_str()),
            owner: AccountId(row.owner_id),
            subject: row.subject,
            topic: row.topic,
            is_private: row.is_private,
            work_in_progress: row.work_in_progress,
            current_patch_set: row.current_patch_set,
            unresolved_comment_count: row.unresolved_comment_count,
            submitted_bypassing_requirements: row.submitted_bypassing_requirements,
            created_at: from_unix(row.created_at),
            updated_at: from_unix(row.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PatchSetRow {
    change_id: i64,
    number: i32,
    commit_id: String,
    uploader_id: i64,
    real_uploader_id: Option<i64>,
    created_at: i64,
}

impl From<PatchSetRow> for PatchSet {
    fn from(row: PatchSetRow) -> Self {
        PatchSet {
            id: PatchSetId::new(ChangeId(row.change_id), row.number),
            commit_id: CommitId(row.commit_id),
            uploader: AccountId(row.uploader_id),
            real_uploader: row.real_uploader_id.map(AccountId),
            created_at: from_unix(row.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApprovalRow {
    change_id: i64,
    patch_set: i32,
    label: String,
    account_id: i64,
    value: i16,
    copied: bool,
    granted: i64,
    real_account_id: Option<i64>,
}

impl From<ApprovalRow> for PatchSetApproval {
    fn from(row: ApprovalRow) -> Self {
        PatchSetApproval {
            patch_set_id: PatchSetId::new(ChangeId(row.change_id), row.patch_set),
            label: row.label,
            account_id: AccountId(row.account_id),
            value: row.value,
            copied: row.copied,
            granted: from_unix(row.granted),
            real_account_id: row.real_account_id.map(AccountId),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    change_id: i64,
    patch_set: Option<i32>,
    author_id: i64,
    real_author_id: Option<i64>,
    message: String,
    tag: Option<String>,
    written_on: i64,
}

impl From<MessageRow> for ChangeMessage {
    fn from(row: MessageRow) -> Self {
        ChangeMessage {
            id: row.id,
            change_id: ChangeId(row.change_id),
            patch_set: row.patch_set,
            author: AccountId(row.author_id),
            real_author: row.real_author_id.map(AccountId),
            message: row.message,
            tag: row.tag,
            written_on: from_unix(row.written_on),
        }
    }
}

const CHANGE_COLUMNS: &str = "id, project, branch, status, owner_id, subject, topic, is_private, \
     work_in_progress, current_patch_set, unresolved_comment_count, \
     submitted_bypassing_requirements, created_at, updated_at";

/// Insert a change row, ignoring `change.id`, and return the assigned id.
pub async fn insert_change(conn: &mut SqliteConnection, change: &Change) -> Result<ChangeId, ReviewError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO changes (
            project, branch, status, owner_id, subject, topic, is_private, work_in_progress,
            current_patch_set, unresolved_comment_count, submitted_bypassing_requirements,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&change.project)
    .bind(&change.branch)
    .bind(change.status.to_string())
    .bind(change.owner.0)
    .bind(&change.subject)
    .bind(&change.topic)
    .bind(change.is_private)
    .bind(change.work_in_progress)
    .bind(change.current_patch_set)
    .bind(change.unresolved_comment_count)
    .bind(change.submitted_bypassing_requirements)
    .bind(change.created_at.timestamp())
    .bind(change.updated_at.timestamp())
    .fetch_one(&mut *conn)
    .await?;

    Ok(ChangeId(id))
}

/// Write back the mutable fields of a change.
pub async fn update_change(conn: &mut SqliteConnection, change: &Change) -> Result<(), ReviewError> {
    let result = sqlx::query(
        r#"
        UPDATE changes
        SET status = ?,
            subject = ?,
            topic = ?,
            is_private = ?,
            work_in_progress = ?,
            current_patch_set = ?,
            unresolved_comment_count = ?,
            submitted_bypassing_requirements = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(change.status.to_string())
    .bind(&change.subject)
    .bind(&change.topic)
    .bind(change.is_private)
    .bind(change.work_in_progress)
    .bind(change.current_patch_set)
    .bind(change.unresolved_comment_count)
    .bind(change.submitted_bypassing_requirements)
    .bind(change.updated_at.timestamp())
    .bind(change.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ReviewError::not_found_with_id("Change", change.id.to_string()));
    }
    Ok(())
}

pub async fn insert_patch_set(conn: &mut SqliteConnection, patch_set: &PatchSet) -> Result<(), ReviewError> {
    sqlx::query(
        r#"
        INSERT INTO patch_sets (change_id, number, commit_id, uploader_id, real_uploader_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(patch_set.id.change_id.0)
    .bind(patch_set.id.number)
    .bind(patch_set.commit_id.as_str())
    .bind(patch_set.uploader.0)
    .bind(patch_set.real_uploader.map(|a| a.0))
    .bind(patch_set.created_at.timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => ReviewError::conflict_on_change(
            format!("patch set {} already exists", patch_set.id),
            patch_set.id.change_id.0,
        ),
        other => other.into(),
    })?;
    Ok(())
}

/// Insert a vote or replace the existing one of the same voter.
pub async fn upsert_approval(conn: &mut SqliteConnection, approval: &PatchSetApproval) -> Result<(), ReviewError> {
    sqlx::query(
        r#"
        INSERT INTO approvals (change_id, patch_set, label, account_id, value, copied, granted, real_account_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(change_id, patch_set, label, account_id) DO UPDATE SET
            value = excluded.value,
            copied = excluded.copied,
            granted = excluded.granted,
            real_account_id = excluded.real_account_id
        "#,
    )
    .bind(approval.patch_set_id.change_id.0)
    .bind(approval.patch_set_id.number)
    .bind(&approval.label)
    .bind(approval.account_id.0)
    .bind(approval.value)
    .bind(approval.copied)
    .bind(approval.granted.timestamp())
    .bind(approval.real_account_id.map(|a| a.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_approval(
    conn: &mut SqliteConnection,
    patch_set_id: PatchSetId,
    label: &str,
    account: AccountId,
) -> Result<(), ReviewError> {
    sqlx::query("DELETE FROM approvals WHERE change_id = ? AND patch_set = ? AND label = ? AND account_id = ?")
        .bind(patch_set_id.change_id.0)
        .bind(patch_set_id.number)
        .bind(label)
        .bind(account.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Append a change message and return its id.
pub async fn insert_message(
    conn: &mut SqliteConnection,
    message: &NewChangeMessage,
    written_on: DateTime<Utc>,
) -> Result<i64, ReviewError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO change_messages (change_id, patch_set, author_id, real_author_id, message, tag, written_on)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(message.change_id.0)
    .bind(message.patch_set)
    .bind(message.author.0)
    .bind(message.real_author.map(|a| a.0))
    .bind(&message.message)
    .bind(&message.tag)
    .bind(written_on.timestamp())
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn load_change(conn: &mut SqliteConnection, id: ChangeId) -> Result<Option<Change>, ReviewError> {
    let row = sqlx::query_as::<_, ChangeRow>(&format!("SELECT {} FROM changes WHERE id = ?", CHANGE_COLUMNS))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Change::from))
}

async fn load_history(conn: &mut SqliteConnection, change: Change) -> Result<ChangeNotes, ReviewError> {
    let id = change.id.0;

    let patch_sets = sqlx::query_as::<_, PatchSetRow>(
        "SELECT change_id, number, commit_id, uploader_id, real_uploader_id, created_at \
         FROM patch_sets WHERE change_id = ? ORDER BY number",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let approvals = sqlx::query_as::<_, ApprovalRow>(
        "SELECT change_id, patch_set, label, account_id, value, copied, granted, real_account_id \
         FROM approvals WHERE change_id = ? ORDER BY patch_set, label, account_id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let messages = sqlx::query_as::<_, MessageRow>(
        "SELECT id, change_id, patch_set, author_id, real_author_id, message, tag, written_on \
         FROM change_messages WHERE change_id = ? ORDER BY id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ChangeNotes {
        change,
        patch_sets: patch_sets
            .into_iter()
            .map(|row| (row.number, PatchSet::from(row)))
            .collect(),
        approvals: approvals.into_iter().map(PatchSetApproval::from).collect(),
        messages: messages.into_iter().map(ChangeMessage::from).collect(),
    })
}

/// Load a change with its full history, if it exists.
pub async fn load_notes_opt(conn: &mut SqliteConnection, id: ChangeId) -> Result<Option<ChangeNotes>, ReviewError> {
    match load_change(conn, id).await? {
        Some(change) => Ok(Some(load_history(conn, change).await?)),
        None => Ok(None),
    }
}

/// Load a change with its full history.
///
/// # Errors
///
/// `NotFound` if the change does not exist.
pub async fn load_notes(conn: &mut SqliteConnection, id: ChangeId) -> Result<ChangeNotes, ReviewError> {
    load_notes_opt(conn, id)
        .await?
        .ok_or_else(|| ReviewError::not_found_with_id("Change", id.to_string()))
}

/// Load every change targeting a branch that is not merged.
pub async fn load_unmerged_for_branch(
    conn: &mut SqliteConnection,
    project: &str,
    branch: &str,
) -> Result<Vec<ChangeNotes>, ReviewError> {
    let rows = sqlx::query_as::<_, ChangeRow>(&format!(
        "SELECT {} FROM changes WHERE project = ? AND branch = ? AND status != 'MERGED' ORDER BY id",
        CHANGE_COLUMNS
    ))
    .bind(project)
    .bind(branch)
    .fetch_all(&mut *conn)
    .await?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in rows {
        notes.push(load_history(conn, Change::from(row)).await?);
    }
    Ok(notes)
}

/// Freeze the submit requirement results of a change entering `status`.
pub async fn insert_snapshot(
    conn: &mut SqliteConnection,
    change_id: ChangeId,
    status: ChangeStatus,
    results: &[SubmitRequirementResult],
) -> Result<(), ReviewError> {
    let json = serde_json::to_string(results)?;
    sqlx::query(
        "INSERT INTO submit_requirement_snapshots (change_id, status, results, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(change_id.0)
    .bind(status.to_string())
    .bind(json)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The most recent frozen results of a change.
pub async fn latest_snapshot(
    conn: &mut SqliteConnection,
    change_id: ChangeId,
) -> Result<Option<Vec<SubmitRequirementResult>>, ReviewError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT results FROM submit_requirement_snapshots WHERE change_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(change_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}
