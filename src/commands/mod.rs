//! Command handlers.
//!
//! Every command takes the [`ReviewServer`](crate::server::ReviewServer) it
//! runs against and the acting account. Commands are organized by functionality:
//! - `change`: creating changes, uploading patch sets, abandon, restore and submit
//! - `review`: voting
//! - `approval`: copying votes onto a new patch set
//! - `submit_requirements`: evaluating and checking submit requirements
//! - `rebase`: rebasing a change or a chain of changes

pub mod approval;
pub mod change;
pub mod rebase;
pub mod review;
pub mod submit_requirements;

pub use approval::copy_approvals_for_new_patch_set;
pub use change::{
    abandon_change, create_change, restore_change, submit_change, upload_patch_set,
    CreateChangeInput, PatchSetUploaded, SubmitInput, UploadPatchSetInput,
};
pub use rebase::{rebase_chain, rebase_change};
pub use review::{review, ReviewInput, ReviewResult};
pub use submit_requirements::{check_submit_requirement, evaluate_submit_requirements};
