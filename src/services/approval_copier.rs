//! Approval copier.
//!
//! Decides which votes survive onto a new patch set. Each label's copy
//! condition is evaluated against the approval and the pair of patch sets it
//! would move between. A label may also configure a forced copy rule
//! (enforcement) and a forced non-copy rule (restriction); when one of them
//! matches it decides the outcome instead of the plain condition. Restriction
//! is checked first and wins when both match.
//!
//! Votes are also propagated forward when someone votes on an older patch
//! set: the vote is copied to consecutive follow-up patch sets while it stays
//! copyable, stale copies are removed, and propagation stops at the first
//! follow-up that carries a direct vote from the same account.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::ReviewError;
use crate::models::{
    AccountId, ChangeKind, ChangeNotes, LabelType, LabelTypes, PatchSet, PatchSetApproval,
    PatchSetId,
};
use crate::query::approval::{parse_copy_condition, ApprovalContext};
use crate::services::directory::AccountDirectory;
use crate::services::git::{self, GitRepository};

/// Which forced rule decided a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedRule {
    Enforcement,
    Restriction,
}

/// The forced rule that decided a copy, with its condition text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ForcedCondition {
    pub rule: ForcedRule,
    pub condition: String,
}

/// One copy decision, kept for the audit message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalData {
    /// The approval as it would appear on the target patch set.
    pub approval: PatchSetApproval,

    /// The label's plain copy condition.
    pub copy_condition: Option<String>,

    /// Set when a forced rule decided the outcome.
    pub forced: Option<ForcedCondition>,

    /// The decisive condition could not be parsed.
    pub non_parseable: bool,

    pub passing_atoms: BTreeSet<String>,
    pub failing_atoms: BTreeSet<String>,
}

impl ApprovalData {
    /// The condition shown to users: the forced rule if one decided, else the copy condition.
    pub fn decisive_condition(&self) -> Option<&str> {
        match &self.forced {
            Some(forced) => Some(forced.condition.as_str()),
            None => self.copy_condition.as_deref(),
        }
    }
}

/// Votes copied to and votes outdated on a new patch set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalCopierResult {
    pub copied_approvals: Vec<ApprovalData>,
    pub outdated_approvals: Vec<ApprovalData>,
}

impl ApprovalCopierResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn create(copied: Vec<ApprovalData>, outdated: Vec<ApprovalData>) -> Self {
        Self {
            copied_approvals: copied,
            outdated_approvals: outdated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.copied_approvals.is_empty() && self.outdated_approvals.is_empty()
    }
}

/// Kind of update applied to a follow-up patch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpUpdateKind {
    Copied,
    Removed,
}

/// One copy added, replaced or removed on a follow-up patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowUpUpdate {
    pub patch_set: i32,
    pub kind: FollowUpUpdateKind,

    /// Value of the copy that was there before, if any.
    pub previous_value: Option<i16>,
}

/// Writes needed to propagate one vote to follow-up patch sets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FollowUpPlan {
    pub upserts: Vec<PatchSetApproval>,
    pub removals: Vec<PatchSetId>,
    pub updates: Vec<FollowUpUpdate>,

    /// The label's copy condition, for the audit message.
    pub copy_condition: Option<String>,
}

impl FollowUpPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Facts about moving from one patch set to another.
#[derive(Debug, Clone, Copy)]
struct Transition {
    change_kind: ChangeKind,
    is_merge: bool,
    unchanged_files: bool,
    target_uploader: AccountId,
}

/// Computes copy decisions against git and the account directory.
pub struct ApprovalCopier<'a> {
    git: &'a dyn GitRepository,
    directory: &'a dyn AccountDirectory,
}

impl<'a> ApprovalCopier<'a> {
    pub fn new(git: &'a dyn GitRepository, directory: &'a dyn AccountDirectory) -> Self {
        Self { git, directory }
    }

    fn transition(&self, project: &str, source: &PatchSet, target: &PatchSet) -> Result<Transition, ReviewError> {
        let change_kind = git::change_kind(self.git, project, &source.commit_id, &target.commit_id)?;
        let is_merge = self.git.read_commit(project, &target.commit_id)?.is_merge();
        let unchanged_files = git::modified_files(self.git, project, &source.commit_id)?
            == git::modified_files(self.git, project, &target.commit_id)?;
        Ok(Transition {
            change_kind,
            is_merge,
            unchanged_files,
            target_uploader: target.uploader,
        })
    }

    /// Decide whether `approval` may be copied across `transition`.
    fn decide(&self, label: &LabelType, approval: &PatchSetApproval, transition: &Transition) -> (bool, ApprovalData) {
        let ctx = ApprovalContext {
            approval,
            label,
            change_kind: transition.change_kind,
            is_merge: transition.is_merge,
            target_uploader: transition.target_uploader,
            unchanged_files: transition.unchanged_files,
            directory: self.directory,
        };
        let mut data = ApprovalData {
            approval: approval.clone(),
            copy_condition: label.copy_condition.clone(),
            forced: None,
            non_parseable: false,
            passing_atoms: BTreeSet::new(),
            failing_atoms: BTreeSet::new(),
        };

        let forced_rules = [
            (ForcedRule::Restriction, &label.copy_restriction, false),
            (ForcedRule::Enforcement, &label.copy_enforcement, true),
        ];
        for (rule, condition, outcome) in forced_rules {
            let Some(condition) = condition else {
                continue;
            };
            match parse_copy_condition(condition) {
                Ok(parsed) => {
                    let evaluation = ctx.evaluate(&parsed);
                    if evaluation.matched {
                        data.forced = Some(ForcedCondition {
                            rule,
                            condition: condition.clone(),
                        });
                        data.passing_atoms = evaluation.passing_atoms;
                        data.failing_atoms = evaluation.failing_atoms;
                        return (outcome, data);
                    }
                }
                Err(e) => log::warn!(
                    "Ignoring non-parseable copy {:?} rule of label {}: {}",
                    rule,
                    label.name,
                    e
                ),
            }
        }

        let Some(condition) = &label.copy_condition else {
            return (false, data);
        };
        match parse_copy_condition(condition) {
            Ok(parsed) => {
                let evaluation = ctx.evaluate(&parsed);
                data.passing_atoms = evaluation.passing_atoms;
                data.failing_atoms = evaluation.failing_atoms;
                (evaluation.matched, data)
            }
            Err(e) => {
                log::warn!(
                    "Non-parseable copy condition of label {}: {}",
                    label.name,
                    e
                );
                data.non_parseable = true;
                (false, data)
            }
        }
    }

    /// Compute the votes copied to and outdated on patch set `target` from its predecessor.
    ///
    /// Direct votes already present on the target are left alone and not reported.
    pub fn for_patch_set(
        &self,
        notes: &ChangeNotes,
        label_types: &LabelTypes,
        target: &PatchSet,
    ) -> Result<ApprovalCopierResult, ReviewError> {
        let Some(source) = notes.prior_patch_set(target.number()) else {
            return Ok(ApprovalCopierResult::empty());
        };
        let project = &notes.change.project;
        let transition = self.transition(project, source, target)?;

        let mut copied = Vec::new();
        let mut outdated = Vec::new();
        for approval in notes.approvals_on(source.number()) {
            if approval.value == 0 {
                continue;
            }
            let Some(label) = label_types.by_label(&approval.label) else {
                log::debug!(
                    "Skipping approval on unknown label {} of patch set {}",
                    approval.label,
                    source.id
                );
                continue;
            };
            if notes
                .approval(target.number(), &approval.label, approval.account_id)
                .is_some_and(|a| !a.copied)
            {
                continue;
            }

            let (copyable, mut data) = self.decide(label, approval, &transition);
            log::debug!(
                "Approval {} of account {} on patch set {} {} be copied to patch set {} ({})",
                approval.label_vote(),
                approval.account_id,
                source.id,
                if copyable { "can" } else { "cannot" },
                target.number(),
                transition.change_kind
            );
            data.approval = approval.copy_to(target.id);
            if copyable {
                copied.push(data);
            } else {
                outdated.push(data);
            }
        }

        sort_data(&mut copied);
        sort_data(&mut outdated);
        Ok(ApprovalCopierResult::create(copied, outdated))
    }

    /// Plan how a vote just cast on a non-current patch set propagates forward.
    pub fn update_follow_ups(
        &self,
        notes: &ChangeNotes,
        label_types: &LabelTypes,
        vote: &PatchSetApproval,
    ) -> Result<FollowUpPlan, ReviewError> {
        let mut plan = FollowUpPlan::default();
        let Some(label) = label_types.by_label(&vote.label) else {
            return Ok(plan);
        };
        plan.copy_condition = label.copy_condition.clone();

        let project = &notes.change.project;
        let Some(mut source) = notes.patch_set(vote.patch_set_id.number) else {
            return Ok(plan);
        };
        let mut transitions: HashMap<(i32, i32), Transition> = HashMap::new();
        let mut still_copyable = vote.value != 0;

        for follow_up in notes.follow_ups(source.number()) {
            let existing = notes.approval(follow_up.number(), &vote.label, vote.account_id);
            if existing.is_some_and(|a| !a.copied) {
                break;
            }
            if vote.value == 0 && existing.is_none() {
                break;
            }

            if still_copyable {
                let key = (source.number(), follow_up.number());
                let transition = match transitions.get(&key) {
                    Some(t) => *t,
                    None => {
                        let t = self.transition(project, source, follow_up)?;
                        transitions.insert(key, t);
                        t
                    }
                };
                let (copyable, _) = self.decide(label, vote, &transition);
                still_copyable = copyable;
            }

            if still_copyable {
                source = follow_up;
                if existing.is_some_and(|a| a.value == vote.value) {
                    continue;
                }
                plan.upserts.push(vote.copy_to(follow_up.id));
                plan.updates.push(FollowUpUpdate {
                    patch_set: follow_up.number(),
                    kind: FollowUpUpdateKind::Copied,
                    previous_value: existing.map(|a| a.value),
                });
            } else if let Some(copy) = existing {
                plan.removals.push(follow_up.id);
                plan.updates.push(FollowUpUpdate {
                    patch_set: follow_up.number(),
                    kind: FollowUpUpdateKind::Removed,
                    previous_value: Some(copy.value),
                });
            }
        }

        Ok(plan)
    }
}

fn sort_data(data: &mut [ApprovalData]) {
    data.sort_by(|a, b| {
        (&a.approval.label, a.approval.value, a.approval.account_id)
            .cmp(&(&b.approval.label, b.approval.value, b.approval.account_id))
    });
}
