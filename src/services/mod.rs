//! Review engines and the collaborator seams they run against.
//!
//! The engines (approval copier, submit requirement evaluator, rebaser) are
//! synchronous and take their collaborators by reference, so they can be
//! driven from tests without a database. The change store is the only
//! service that touches SQLite.

pub mod approval_copier;
pub mod approval_formatter;
pub mod change_store;
pub mod directory;
pub mod git;
pub mod legacy_rules;
pub mod metrics;
pub mod permissions;
pub mod project_cache;
pub mod rebase_chain;
pub mod rule_registry;
pub mod submit_requirements;

pub use approval_copier::{ApprovalCopier, ApprovalCopierResult, ApprovalData, FollowUpPlan};
pub use directory::{AccountDirectory, InMemoryDirectory};
pub use git::{GitRepository, InMemoryRepository};
pub use metrics::RebaseMetrics;
pub use permissions::{ChangePermissions, Permission, PermissionBackend, StaticPermissions};
pub use project_cache::ProjectCache;
pub use rebase_chain::{BaseSpec, RebaseInput, RebasePlan, Rebaser};
pub use rule_registry::{ExternalSubmitRule, RegistrationHandle, SubmitRuleRegistry};
pub use submit_requirements::{SubmitRequirementsEvaluator, SubmitRule};
