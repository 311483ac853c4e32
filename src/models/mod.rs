//! Data models for the review engine.
//!
//! These are plain values shared by the pure engines in `services` and the
//! database layer. Row mapping lives next to the queries in `services::change_store`.

pub mod account;
pub mod approval;
pub mod change;
pub mod change_message;
pub mod change_notes;
pub mod label_type;
pub mod patch_set;
pub mod project;
pub mod submit_requirement;

// Re-exports for convenient access
pub use account::{Account, AccountId, AuditIdentity, PersonIdent};
pub use approval::{LabelVote, PatchSetApproval};
pub use change::{full_branch_ref, Change, ChangeId, ChangeStatus};
pub use change_message::{ChangeMessage, NewChangeMessage};
pub use change_notes::ChangeNotes;
pub use label_type::{LabelFunction, LabelType, LabelTypes, LabelValue};
pub use patch_set::{ChangeKind, CommitId, PatchSet, PatchSetId};
pub use project::{ProjectConfig, ProjectHierarchy};
pub use submit_requirement::{
    ExpressionResult, ExpressionStatus, SubmitRequirement, SubmitRequirementResult,
    SubmitRequirementStatus,
};
