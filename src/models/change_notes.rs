//! Loaded state of one change: the change row, its patch sets, votes and messages.

use std::collections::BTreeMap;

use crate::error::ReviewError;

use super::account::AccountId;
use super::approval::PatchSetApproval;
use super::change::Change;
use super::change_message::ChangeMessage;
use super::patch_set::{PatchSet, PatchSetId};

/// Snapshot of a change's history as read in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotes {
    pub change: Change,
    pub patch_sets: BTreeMap<i32, PatchSet>,
    pub approvals: Vec<PatchSetApproval>,
    pub messages: Vec<ChangeMessage>,
}

impl ChangeNotes {
    pub fn current_patch_set(&self) -> Result<&PatchSet, ReviewError> {
        self.patch_set(self.change.current_patch_set).ok_or_else(|| {
            ReviewError::internal(format!(
                "change {} has no current patch set {}",
                self.change.id, self.change.current_patch_set
            ))
        })
    }

    pub fn patch_set(&self, number: i32) -> Option<&PatchSet> {
        self.patch_sets.get(&number)
    }

    /// The patch set immediately before `number`.
    pub fn prior_patch_set(&self, number: i32) -> Option<&PatchSet> {
        self.patch_sets.range(..number).next_back().map(|(_, ps)| ps)
    }

    /// Patch sets after `number`, in increasing order.
    pub fn follow_ups(&self, number: i32) -> impl Iterator<Item = &PatchSet> {
        self.patch_sets.range(number + 1..).map(|(_, ps)| ps)
    }

    /// Every approval on a patch set, copied ones included.
    pub fn approvals_on(&self, number: i32) -> impl Iterator<Item = &PatchSetApproval> {
        self.approvals
            .iter()
            .filter(move |a| a.patch_set_id.number == number)
    }

    pub fn approval(&self, number: i32, label: &str, account: AccountId) -> Option<&PatchSetApproval> {
        self.approvals_on(number)
            .find(|a| a.label == label && a.account_id == account)
    }

    /// Insert or overwrite the approval for its (patch set, label, account).
    pub fn upsert_approval(&mut self, approval: PatchSetApproval) {
        match self.approvals.iter_mut().find(|a| {
            a.patch_set_id == approval.patch_set_id && a.same_voter(&approval)
        }) {
            Some(existing) => *existing = approval,
            None => self.approvals.push(approval),
        }
    }

    pub fn remove_approval(&mut self, patch_set_id: PatchSetId, label: &str, account: AccountId) {
        self.approvals.retain(|a| {
            !(a.patch_set_id == patch_set_id && a.label == label && a.account_id == account)
        });
    }

    /// Record a new patch set and make it current.
    pub fn add_patch_set(&mut self, patch_set: PatchSet) {
        self.change.current_patch_set = patch_set.number();
        self.patch_sets.insert(patch_set.number(), patch_set);
    }
}
