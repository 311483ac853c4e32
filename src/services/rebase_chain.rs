//! Rebasing a change, or the chain of open changes it depends on, onto a new base.
//!
//! Planning validates every hop before anything is written: the chain walk,
//! the base, and permissions of the acting user (and of the uploader when
//! rebasing on their behalf). Only then are the rebased commits created. The
//! resulting [`RebasePlan`] carries the new patch sets and messages; the
//! caller persists them and moves the refs in one step.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ServerIdent;
use crate::error::ReviewError;
use crate::models::change_message::TAG_REBASE;
use crate::models::{
    AccountId, AuditIdentity, ChangeId, ChangeNotes, ChangeStatus, CommitId, NewChangeMessage,
    PatchSet, PatchSetId, PersonIdent,
};

use super::directory::AccountDirectory;
use super::git::{self, Commit, GitRepository, NewCommit, RefUpdate};
use super::permissions::{ChangePermissions, Permission, PermissionBackend};

const REBASE_NOT_PERMITTED: &str = "rebase not permitted (change owners and users with the 'Submit' or \
     'Rebase' permission can rebase if they have the 'Push' permission)";

const REBASE_ON_BEHALF_NOT_PERMITTED: &str = "rebase on behalf of uploader not permitted (change owners and \
     users with the 'Submit' or 'Rebase' permission can rebase on behalf of the uploader)";

/// Options of a rebase request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebaseInput {
    /// Change number, patch set ref, commit, or branch ref. Empty means the branch tip.
    pub base: Option<String>,

    pub on_behalf_of_uploader: bool,

    /// Create patch sets with conflict markers instead of failing.
    pub allow_conflicts: bool,
}

/// A parsed `base` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseSpec {
    /// No base given: the parent change or the branch tip.
    Default,
    BranchTip,
    Change(ChangeId),
    PatchSet(PatchSetId),
    Ref(String),
    Revision(String),
}

impl BaseSpec {
    pub fn parse(base: Option<&str>) -> Self {
        let Some(base) = base.map(str::trim) else {
            return Self::Default;
        };
        if base.is_empty() {
            return Self::BranchTip;
        }
        if let Some(id) = PatchSetId::from_ref(base) {
            return Self::PatchSet(id);
        }
        if let Ok(n) = base.parse::<i64>() {
            return Self::Change(ChangeId(n));
        }
        if base.starts_with("refs/") {
            return Self::Ref(base.to_string());
        }
        Self::Revision(base.to_string())
    }

    /// The change the base refers to by number, if any.
    pub fn change_id(&self) -> Option<ChangeId> {
        match self {
            Self::Change(id) => Some(*id),
            Self::PatchSet(ps) => Some(ps.change_id),
            _ => None,
        }
    }
}

/// Change state the planner works on.
pub struct RebaseSnapshot<'a> {
    pub head: ChangeId,

    /// Unmerged changes on the head's branch, the head included.
    pub changes: &'a [ChangeNotes],

    /// The change named by the base option, when it names one.
    pub base_change: Option<&'a ChangeNotes>,
}

/// One change receiving a new patch set.
#[derive(Debug, Clone)]
pub struct RebaseHop {
    pub change_id: ChangeId,
    pub previous: PatchSet,
    pub patch_set: PatchSet,

    /// Files left with conflict markers.
    pub conflicts: Vec<String>,

    /// Rebased by someone other than the uploader, on the uploader's behalf.
    pub on_behalf: bool,

    pub message: NewChangeMessage,
}

/// Validated result of planning a rebase.
#[derive(Debug, Clone)]
pub struct RebasePlan {
    pub project: String,

    /// Hops in ancestor-to-descendant order.
    pub hops: Vec<RebaseHop>,

    pub audit_identity: AuditIdentity,

    /// Whether any hop was rebased on behalf of a different uploader.
    pub on_behalf_of_uploader: bool,

    pub rebase_chain: bool,
    pub allow_conflicts: bool,
}

impl RebasePlan {
    /// Ref creations for the new patch sets.
    pub fn ref_updates(&self) -> Vec<RefUpdate> {
        self.hops
            .iter()
            .map(|hop| RefUpdate {
                name: hop.patch_set.id.ref_name(),
                old: None,
                new: hop.patch_set.commit_id.clone(),
            })
            .collect()
    }

    pub fn reflog_message(&self) -> String {
        let ids: Vec<String> = self.hops.iter().map(|h| h.patch_set.id.to_string()).collect();
        format!("rebase: {}", ids.join(" "))
    }
}

struct Hop<'a> {
    notes: &'a ChangeNotes,
    patch_set: &'a PatchSet,
    commit: Commit,
}

/// Open changes of a branch indexed by id and by patch set commit.
struct Candidates<'a> {
    by_id: HashMap<ChangeId, &'a ChangeNotes>,
    by_commit: HashMap<&'a CommitId, PatchSetId>,
}

impl<'a> Candidates<'a> {
    fn new(changes: &'a [ChangeNotes]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_commit = HashMap::new();
        for notes in changes {
            by_id.insert(notes.change.id, notes);
            for ps in notes.patch_sets.values() {
                by_commit.insert(&ps.commit_id, ps.id);
            }
        }
        Self { by_id, by_commit }
    }

    fn owner_of(&self, commit: &CommitId) -> Option<(&'a ChangeNotes, PatchSetId)> {
        let ps = self.by_commit.get(commit)?;
        self.by_id.get(&ps.change_id).map(|notes| (*notes, *ps))
    }
}

/// Plans rebases against git, permissions and the account directory.
pub struct Rebaser<'a> {
    git: &'a dyn GitRepository,
    permissions: &'a dyn PermissionBackend,
    directory: &'a dyn AccountDirectory,
    server_ident: &'a ServerIdent,
}

impl<'a> Rebaser<'a> {
    pub fn new(
        git: &'a dyn GitRepository,
        permissions: &'a dyn PermissionBackend,
        directory: &'a dyn AccountDirectory,
        server_ident: &'a ServerIdent,
    ) -> Self {
        Self {
            git,
            permissions,
            directory,
            server_ident,
        }
    }

    /// Validate a rebase of `snapshot.head` (and its open ancestors if `chain`)
    /// and create the rebased commits.
    ///
    /// # Errors
    ///
    /// Any failed check rejects the whole request; no patch set is planned.
    pub fn plan(
        &self,
        actor: AccountId,
        input: &RebaseInput,
        snapshot: &RebaseSnapshot<'_>,
        chain: bool,
    ) -> Result<RebasePlan, ReviewError> {
        if input.allow_conflicts && input.on_behalf_of_uploader {
            return Err(ReviewError::bad_request(
                "allow_conflicts and on_behalf_of_uploader are mutually exclusive",
            ));
        }

        let candidates = Candidates::new(snapshot.changes);
        let head = candidates
            .by_id
            .get(&snapshot.head)
            .copied()
            .ok_or_else(|| ReviewError::not_found_with_id("Change", snapshot.head.to_string()))?;
        if !head.change.is_new() {
            return Err(ReviewError::conflict_on_change(
                format!("Change {} is {}", head.change.id, head.change.status.to_string().to_lowercase()),
                head.change.id.0,
            ));
        }
        let project = head.change.project.clone();

        let chain_notes = if chain {
            self.ancestry(head, &candidates)?
        } else {
            vec![head]
        };
        let mut hops = Vec::with_capacity(chain_notes.len());
        for notes in chain_notes {
            let patch_set = notes.current_patch_set()?;
            let commit = self.git.read_commit(&project, &patch_set.commit_id)?;
            match commit.parents.len() {
                1 => {}
                0 => {
                    return Err(ReviewError::unprocessable(format!(
                        "change {}: cannot rebase a change without any parents (is this the initial commit?)",
                        notes.change.id
                    )))
                }
                _ => {
                    return Err(ReviewError::unprocessable(format!(
                        "change {}: cannot rebase a change with multiple parents",
                        notes.change.id
                    )))
                }
            }
            hops.push(Hop {
                notes,
                patch_set,
                commit,
            });
        }

        let base = self.resolve_base(actor, input, &candidates, snapshot.base_change, &hops[0])?;

        // A hop needs a new patch set if its parent moves.
        let mut needs_rebase = Vec::with_capacity(hops.len());
        let mut expected_parent = base.clone();
        let mut below_moved = false;
        for hop in &hops {
            let moved = below_moved || hop.commit.first_parent() != Some(&expected_parent);
            needs_rebase.push(moved);
            below_moved = moved;
            expected_parent = hop.patch_set.commit_id.clone();
        }
        if !needs_rebase.iter().any(|n| *n) {
            let message = if chain {
                "The whole chain is already up to date."
            } else {
                "Change is already up to date."
            };
            return Err(ReviewError::conflict_on_change(message, head.change.id.0));
        }

        for (hop, _) in hops.iter().zip(&needs_rebase).filter(|(_, n)| **n) {
            self.check_permissions(actor, input, hop)?;
        }

        let mut planned = Vec::new();
        let mut new_parent = base;
        for (hop, needed) in hops.iter().zip(&needs_rebase) {
            if !needed {
                new_parent = hop.patch_set.commit_id.clone();
                continue;
            }
            let rebased = self.rebase_hop(actor, input, &project, hop, &new_parent)?;
            log::debug!(
                "Rebased patch set {} of change {} onto {} as {}",
                hop.patch_set.id,
                hop.notes.change.id,
                new_parent.short(),
                rebased.patch_set.commit_id.short()
            );
            new_parent = rebased.patch_set.commit_id.clone();
            planned.push(rebased);
        }

        let audit_identity = AuditIdentity::from_accounts(planned.iter().map(|h| h.patch_set.uploader))
            .ok_or_else(|| ReviewError::internal("rebase planned no patch sets"))?;
        let on_behalf_of_uploader = planned.iter().any(|h| h.on_behalf);

        log::info!(
            "Planned rebase of {} change(s) in {} by account {}{}",
            planned.len(),
            project,
            actor,
            if on_behalf_of_uploader { " on behalf of the uploader" } else { "" }
        );

        Ok(RebasePlan {
            project,
            hops: planned,
            audit_identity,
            on_behalf_of_uploader,
            rebase_chain: chain,
            allow_conflicts: input.allow_conflicts,
        })
    }

    /// Open ancestors of `head` followed by `head`, oldest first.
    fn ancestry<'n>(
        &self,
        head: &'n ChangeNotes,
        candidates: &Candidates<'n>,
    ) -> Result<Vec<&'n ChangeNotes>, ReviewError> {
        let mut chain = vec![head];
        let mut visited = HashSet::from([head.change.id]);
        let mut current = head;
        loop {
            let patch_set = current.current_patch_set()?;
            let commit = self.git.read_commit(&current.change.project, &patch_set.commit_id)?;
            let Some(parent) = commit.first_parent() else {
                break;
            };
            let Some((parent_notes, _)) = candidates.owner_of(parent) else {
                break;
            };
            if parent_notes.change.status == ChangeStatus::Abandoned {
                return Err(ReviewError::conflict_on_change(
                    format!(
                        "change {}: cannot rebase a change with an abandoned parent: {}",
                        current.change.id, parent_notes.change.id
                    ),
                    current.change.id.0,
                ));
            }
            if !visited.insert(parent_notes.change.id) {
                return Err(ReviewError::conflict_on_change(
                    format!("change {}: recursion not allowed", parent_notes.change.id),
                    parent_notes.change.id.0,
                ));
            }
            chain.push(parent_notes);
            current = parent_notes;
        }
        chain.reverse();
        Ok(chain)
    }

    fn branch_tip(&self, project: &str, branch: &str) -> Result<CommitId, ReviewError> {
        self.git.resolve_ref(project, branch)?.ok_or_else(|| {
            ReviewError::unprocessable(format!("The destination branch does not exist: {}", branch))
        })
    }

    fn resolve_base(
        &self,
        actor: AccountId,
        input: &RebaseInput,
        candidates: &Candidates<'_>,
        base_change: Option<&ChangeNotes>,
        bottom: &Hop<'_>,
    ) -> Result<CommitId, ReviewError> {
        let change = &bottom.notes.change;
        let raw = input.base.as_deref().unwrap_or_default().trim();
        let missing = || {
            ReviewError::conflict_on_change(
                format!("base revision is missing from the destination branch: {}", raw),
                change.id.0,
            )
        };

        match BaseSpec::parse(input.base.as_deref()) {
            BaseSpec::Default => {
                if let Some(parent) = bottom.commit.first_parent() {
                    if let Some((parent_notes, _)) = candidates.owner_of(parent) {
                        if parent_notes.change.id != change.id {
                            if parent_notes.change.status == ChangeStatus::Abandoned {
                                return Err(ReviewError::conflict_on_change(
                                    format!(
                                        "Cannot rebase a change with an abandoned parent: {}",
                                        parent_notes.change.id
                                    ),
                                    change.id.0,
                                ));
                            }
                            return Ok(parent_notes.current_patch_set()?.commit_id.clone());
                        }
                    }
                }
                self.branch_tip(&change.project, &change.branch)
            }
            BaseSpec::BranchTip => self.branch_tip(&change.project, &change.branch),
            spec @ (BaseSpec::Change(_) | BaseSpec::PatchSet(_)) => {
                let not_found = || ReviewError::unprocessable(format!("Base change not found: {}", raw));
                let base_notes = base_change
                    .filter(|n| Some(n.change.id) == spec.change_id())
                    .ok_or_else(not_found)?;
                let base_ps = match spec {
                    BaseSpec::PatchSet(id) => base_notes.patch_set(id.number).ok_or_else(not_found)?,
                    _ => base_notes.current_patch_set()?,
                };
                self.check_base_change(actor, bottom, base_notes, base_ps)
            }
            BaseSpec::Revision(rev) => {
                let commit = CommitId(rev);
                if let Some((base_notes, ps_id)) = candidates.owner_of(&commit) {
                    let base_ps = base_notes.patch_set(ps_id.number).ok_or_else(missing)?;
                    return self.check_base_change(actor, bottom, base_notes, base_ps);
                }
                if self.git.read_commit(&change.project, &commit).is_err() {
                    return Err(missing());
                }
                let tip = self.branch_tip(&change.project, &change.branch)?;
                if git::is_ancestor(self.git, &change.project, &commit, &tip)? {
                    Ok(commit)
                } else {
                    Err(missing())
                }
            }
            BaseSpec::Ref(name) => {
                let Some(commit) = self.git.resolve_ref(&change.project, &name)? else {
                    return Err(missing());
                };
                let tip = self.branch_tip(&change.project, &change.branch)?;
                if git::is_ancestor(self.git, &change.project, &commit, &tip)? {
                    Ok(commit)
                } else {
                    Err(missing())
                }
            }
        }
    }

    fn check_base_change(
        &self,
        actor: AccountId,
        bottom: &Hop<'_>,
        base_notes: &ChangeNotes,
        base_ps: &PatchSet,
    ) -> Result<CommitId, ReviewError> {
        let child = &bottom.notes.change;
        let base = &base_notes.change;
        let conflict = |message: String| ReviewError::conflict_on_change(message, child.id.0);

        if base.id == child.id {
            return Err(conflict(format!("cannot rebase change {} onto itself", child.id)));
        }
        if !ChangePermissions::new(self.permissions, base).test(actor, Permission::Read) {
            return Err(ReviewError::cannot_read(format!("base change {} is not visible", base.id)));
        }
        if base.project != child.project {
            return Err(conflict(format!("base change is in wrong project: {}", base.project)));
        }
        if base.branch != child.branch {
            return Err(conflict(format!("base change is targeting wrong branch: {}", base.branch)));
        }
        if base.status == ChangeStatus::Abandoned {
            return Err(conflict(format!("base change is abandoned: {}", base.id)));
        }
        if git::is_ancestor(self.git, &child.project, &bottom.patch_set.commit_id, &base_ps.commit_id)? {
            return Err(conflict(format!(
                "base change {} is a descendant of the current change - recursion not allowed",
                base.id
            )));
        }
        Ok(base_ps.commit_id.clone())
    }

    fn loggable_name(&self, account: AccountId) -> String {
        self.directory
            .account(account)
            .map(|a| a.preferred_email)
            .unwrap_or_else(|| account.template())
    }

    fn check_permissions(&self, actor: AccountId, input: &RebaseInput, hop: &Hop<'_>) -> Result<(), ReviewError> {
        let change = &hop.notes.change;
        let perms = ChangePermissions::new(self.permissions, change);
        if !perms.test(actor, Permission::Read) {
            return Err(ReviewError::cannot_read(format!("change {}: cannot read change", change.id)));
        }

        let uploader = hop.patch_set.uploader;
        if !input.on_behalf_of_uploader || uploader == actor {
            if perms.can_rebase(actor) && perms.test(actor, Permission::AddPatchSet) {
                return Ok(());
            }
            return Err(ReviewError::permission_denied(REBASE_NOT_PERMITTED));
        }

        if !perms.can_rebase(actor) {
            return Err(ReviewError::permission_denied(REBASE_ON_BEHALF_NOT_PERMITTED));
        }
        log::debug!(
            "Account {} is rebasing patch set {} on behalf of uploader {}",
            actor,
            hop.patch_set.id,
            uploader
        );

        let name = self.loggable_name(uploader);
        let denied = |message: String| ReviewError::conflict_on_change(message, change.id.0);
        if !perms.test(uploader, Permission::Read) {
            return Err(denied(format!("change {}: uploader {} cannot read change", change.id, name)));
        }
        if !perms.test(uploader, Permission::AddPatchSet) {
            return Err(denied(format!("change {}: uploader {} cannot add patch set", change.id, name)));
        }

        let author_email = &hop.commit.author.email;
        let uploader_owns_author = self
            .directory
            .account(uploader)
            .is_some_and(|a| a.has_email(author_email));
        if !uploader_owns_author {
            if !perms.test(uploader, Permission::ForgeAuthor) {
                return Err(denied(format!(
                    "change {}: author of patch set {} is forged and the uploader {} cannot forge author",
                    change.id,
                    hop.patch_set.number(),
                    name
                )));
            }
            if self.server_ident.matches_email(author_email) && !perms.test(uploader, Permission::ForgeServer) {
                return Err(denied(format!(
                    "change {}: author of patch set {} is the server identity and the uploader {} cannot forge the server identity",
                    change.id,
                    hop.patch_set.number(),
                    name
                )));
            }
        }
        Ok(())
    }

    fn committer_ident(&self, account: AccountId) -> Result<PersonIdent, ReviewError> {
        self.directory
            .account(account)
            .map(|a| a.ident())
            .ok_or_else(|| ReviewError::not_found_with_id("Account", account.to_string()))
    }

    /// Write the rebased commit of one hop.
    ///
    /// Commits written for a request that later fails stay unreferenced.
    fn rebase_hop(
        &self,
        actor: AccountId,
        input: &RebaseInput,
        project: &str,
        hop: &Hop<'_>,
        onto: &CommitId,
    ) -> Result<RebaseHop, ReviewError> {
        let change_id = hop.notes.change.id;
        let outcome = git::cherry_pick_tree(self.git, project, &hop.commit, onto)?;
        if !outcome.is_clean() && !input.allow_conflicts {
            return Err(ReviewError::conflict_on_change(
                format!(
                    "change {}: merge conflict rebasing patch set {}",
                    change_id,
                    hop.patch_set.number()
                ),
                change_id.0,
            ));
        }

        let on_behalf = input.on_behalf_of_uploader && hop.patch_set.uploader != actor;
        let uploader = if on_behalf { hop.patch_set.uploader } else { actor };

        let commit_id = self.git.write_commit(
            project,
            NewCommit {
                tree: outcome.tree,
                parents: vec![onto.clone()],
                author: hop.commit.author.clone(),
                committer: self.committer_ident(uploader)?,
                message: hop.commit.message.clone(),
            },
        )?;

        let patch_set = PatchSet {
            id: hop.patch_set.id.next(),
            commit_id,
            uploader,
            real_uploader: on_behalf.then_some(actor),
            created_at: chrono::Utc::now(),
        };

        let mut text = format!(
            "Patch Set {}: Patch Set {} was rebased",
            patch_set.number(),
            hop.patch_set.number()
        );
        if on_behalf {
            text.push_str(&format!(" on behalf of {}", uploader.template()));
        }
        if !outcome.conflicts.is_empty() {
            text.push_str("\n\nThe following files contain Git conflicts:");
            for path in &outcome.conflicts {
                text.push_str(&format!("\n* {}", path));
            }
        }
        let message = NewChangeMessage::new(change_id, patch_set.number(), uploader, text)
            .tagged(TAG_REBASE)
            .on_behalf(actor);

        Ok(RebaseHop {
            change_id,
            previous: hop.patch_set.clone(),
            patch_set,
            conflicts: outcome.conflicts,
            on_behalf,
            message,
        })
    }
}
