//! Git object and ref storage.
//!
//! The storage layer is external; engines reach it through [`GitRepository`].
//! Trees are flat maps from path to file content, which is all the review
//! logic needs: comparing trees, three-way merging and listing touched files.
//! [`InMemoryRepository`] is a content-addressed implementation for embedding
//! and tests.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use crate::error::ReviewError;
use crate::models::{AuditIdentity, ChangeKind, CommitId, PersonIdent};

/// File path to file content.
pub type Tree = BTreeMap<String, String>;

/// A stored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    pub tree: Tree,
    pub parents: Vec<CommitId>,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A commit to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub tree: Tree,
    pub parents: Vec<CommitId>,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

/// One ref update within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,

    /// Expected current value; `None` means the ref must not exist yet.
    pub old: Option<CommitId>,

    pub new: CommitId,
}

/// Reflog entry written for a ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old: Option<CommitId>,
    pub new: CommitId,

    /// Rendered [`AuditIdentity`] of the update.
    pub who: String,

    pub message: String,
}

/// Object and ref storage of all projects.
pub trait GitRepository: Send + Sync {
    fn read_commit(&self, project: &str, id: &CommitId) -> Result<Commit, ReviewError>;

    fn write_commit(&self, project: &str, commit: NewCommit) -> Result<CommitId, ReviewError>;

    fn resolve_ref(&self, project: &str, name: &str) -> Result<Option<CommitId>, ReviewError>;

    /// Apply all updates or none. Fails if any ref moved since `old` was read.
    fn update_refs(
        &self,
        project: &str,
        updates: &[RefUpdate],
        identity: &AuditIdentity,
        message: &str,
    ) -> Result<(), ReviewError>;

    /// Reflog of a ref, oldest first.
    fn reflog(&self, project: &str, name: &str) -> Result<Vec<ReflogEntry>, ReviewError>;
}

/// Whether `ancestor` is reachable from `descendant` (or equal to it).
pub fn is_ancestor(
    repo: &dyn GitRepository,
    project: &str,
    ancestor: &CommitId,
    descendant: &CommitId,
) -> Result<bool, ReviewError> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([descendant.clone()]);
    while let Some(id) = queue.pop_front() {
        if &id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        let commit = repo.read_commit(project, &id)?;
        queue.extend(commit.parents);
    }
    Ok(false)
}

fn parent_tree(repo: &dyn GitRepository, project: &str, commit: &Commit) -> Result<Tree, ReviewError> {
    match commit.first_parent() {
        Some(parent) => Ok(repo.read_commit(project, parent)?.tree),
        None => Ok(Tree::new()),
    }
}

/// Paths whose content differs between a commit and its first parent.
pub fn modified_files(
    repo: &dyn GitRepository,
    project: &str,
    id: &CommitId,
) -> Result<BTreeSet<String>, ReviewError> {
    let commit = repo.read_commit(project, id)?;
    let base = parent_tree(repo, project, &commit)?;
    Ok(diff_paths(&base, &commit.tree))
}

fn diff_paths(a: &Tree, b: &Tree) -> BTreeSet<String> {
    a.keys()
        .chain(b.keys())
        .filter(|path| a.get(*path) != b.get(*path))
        .cloned()
        .collect()
}

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub tree: Tree,

    /// Paths that received conflict markers.
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge `theirs` into `ours` relative to `base`, path by path.
pub fn three_way_merge(base: &Tree, ours: &Tree, theirs: &Tree) -> MergeOutcome {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut tree = Tree::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let merged = if o == t || t == b {
            o.cloned()
        } else if o == b {
            t.cloned()
        } else {
            conflicts.push(path.clone());
            Some(format!(
                "<<<<<<< BASE\n{}=======\n{}>>>>>>> PATCH SET\n",
                with_newline(o),
                with_newline(t)
            ))
        };
        if let Some(content) = merged {
            tree.insert(path.clone(), content);
        }
    }

    MergeOutcome { tree, conflicts }
}

fn with_newline(content: Option<&String>) -> String {
    match content {
        Some(c) if c.ends_with('\n') => c.clone(),
        Some(c) => format!("{}\n", c),
        None => String::new(),
    }
}

/// Replay the changes of `commit` on top of `onto`.
pub fn cherry_pick_tree(
    repo: &dyn GitRepository,
    project: &str,
    commit: &Commit,
    onto: &CommitId,
) -> Result<MergeOutcome, ReviewError> {
    let base = parent_tree(repo, project, commit)?;
    let ours = repo.read_commit(project, onto)?.tree;
    Ok(three_way_merge(&base, &ours, &commit.tree))
}

fn same_delta_and_tree(
    repo: &dyn GitRepository,
    project: &str,
    prior: &Commit,
    next: &Commit,
) -> Result<bool, ReviewError> {
    if prior.tree != next.tree || prior.parents.len() != next.parents.len() {
        return Ok(false);
    }
    for (a, b) in prior.parents.iter().zip(&next.parents) {
        if a != b && repo.read_commit(project, a)?.tree != repo.read_commit(project, b)?.tree {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Classify how `next` differs from `prior`.
pub fn change_kind(
    repo: &dyn GitRepository,
    project: &str,
    prior: &CommitId,
    next: &CommitId,
) -> Result<ChangeKind, ReviewError> {
    if prior == next {
        return Ok(ChangeKind::NoChange);
    }
    let prior = repo.read_commit(project, prior)?;
    let next = repo.read_commit(project, next)?;

    if prior.message != next.message {
        return Ok(if same_delta_and_tree(repo, project, &prior, &next)? {
            ChangeKind::NoCodeChange
        } else {
            ChangeKind::Rework
        });
    }
    if same_delta_and_tree(repo, project, &prior, &next)? {
        return Ok(ChangeKind::NoChange);
    }
    if prior.is_merge() && next.is_merge() {
        return Ok(if prior.parents[1..] == next.parents[1..] {
            ChangeKind::MergeFirstParentUpdate
        } else {
            ChangeKind::Rework
        });
    }
    if prior.parents.len() != 1 || next.parents.len() != 1 {
        return Ok(ChangeKind::Rework);
    }

    let replayed = cherry_pick_tree(repo, project, &prior, &next.parents[0])?;
    Ok(if replayed.is_clean() && replayed.tree == next.tree {
        ChangeKind::TrivialRebase
    } else {
        ChangeKind::Rework
    })
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_ident(hasher: &mut Sha256, role: &str, ident: &PersonIdent) {
    hasher.update(role.as_bytes());
    hasher.update(b" ");
    hasher.update(ident.name.as_bytes());
    hasher.update(b" <");
    hasher.update(ident.email.as_bytes());
    hasher.update(b"> ");
    hasher.update(ident.when.timestamp().to_le_bytes());
    hasher.update(b"\n");
}

/// Content address of a commit.
pub fn commit_id(commit: &NewCommit) -> CommitId {
    let mut hasher = Sha256::new();
    for (path, content) in &commit.tree {
        hasher.update(b"blob ");
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(Sha256::digest(content.as_bytes()));
        hasher.update(b"\n");
    }
    for parent in &commit.parents {
        hasher.update(b"parent ");
        hasher.update(parent.as_str().as_bytes());
        hasher.update(b"\n");
    }
    hash_ident(&mut hasher, "author", &commit.author);
    hash_ident(&mut hasher, "committer", &commit.committer);
    hasher.update(b"\n");
    hasher.update(commit.message.as_bytes());
    CommitId(to_hex(&hasher.finalize()))
}

#[derive(Debug, Default)]
struct ProjectRepo {
    commits: HashMap<CommitId, Commit>,
    refs: BTreeMap<String, CommitId>,
    reflogs: HashMap<String, Vec<ReflogEntry>>,
}

/// Repository storage held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    projects: RwLock<HashMap<String, ProjectRepo>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository for `project` if it does not exist.
    pub fn create_project(&self, project: &str) {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        projects.entry(project.to_string()).or_default();
    }

    fn missing(project: &str) -> ReviewError {
        ReviewError::storage(format!("repository not found: {}", project))
    }
}

impl GitRepository for InMemoryRepository {
    fn read_commit(&self, project: &str, id: &CommitId) -> Result<Commit, ReviewError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        let repo = projects.get(project).ok_or_else(|| Self::missing(project))?;
        repo.commits
            .get(id)
            .cloned()
            .ok_or_else(|| ReviewError::storage(format!("missing commit {} in {}", id, project)))
    }

    fn write_commit(&self, project: &str, commit: NewCommit) -> Result<CommitId, ReviewError> {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        let repo = projects.get_mut(project).ok_or_else(|| Self::missing(project))?;
        if let Some(parent) = commit.parents.iter().find(|p| !repo.commits.contains_key(*p)) {
            return Err(ReviewError::storage(format!("missing parent commit {}", parent)));
        }

        let id = commit_id(&commit);
        repo.commits.entry(id.clone()).or_insert_with(|| Commit {
            id: id.clone(),
            tree: commit.tree,
            parents: commit.parents,
            author: commit.author,
            committer: commit.committer,
            message: commit.message,
        });
        Ok(id)
    }

    fn resolve_ref(&self, project: &str, name: &str) -> Result<Option<CommitId>, ReviewError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        let repo = projects.get(project).ok_or_else(|| Self::missing(project))?;
        Ok(repo.refs.get(name).cloned())
    }

    fn update_refs(
        &self,
        project: &str,
        updates: &[RefUpdate],
        identity: &AuditIdentity,
        message: &str,
    ) -> Result<(), ReviewError> {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        let repo = projects.get_mut(project).ok_or_else(|| Self::missing(project))?;

        for update in updates {
            if repo.refs.get(&update.name) != update.old.as_ref() {
                return Err(ReviewError::storage(format!(
                    "ref {} was concurrently updated",
                    update.name
                )));
            }
            if !repo.commits.contains_key(&update.new) {
                return Err(ReviewError::storage(format!(
                    "ref {} points to missing commit {}",
                    update.name, update.new
                )));
            }
        }

        let who = identity.render();
        for update in updates {
            repo.refs.insert(update.name.clone(), update.new.clone());
            repo.reflogs
                .entry(update.name.clone())
                .or_default()
                .push(ReflogEntry {
                    old: update.old.clone(),
                    new: update.new.clone(),
                    who: who.clone(),
                    message: message.to_string(),
                });
        }
        Ok(())
    }

    fn reflog(&self, project: &str, name: &str) -> Result<Vec<ReflogEntry>, ReviewError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        let repo = projects.get(project).ok_or_else(|| Self::missing(project))?;
        Ok(repo.reflogs.get(name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountId;
    use chrono::{TimeZone, Utc};

    fn ident() -> PersonIdent {
        PersonIdent::new("Ursula", "ursula@example.com", Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn tree(files: &[(&str, &str)]) -> Tree {
        files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn commit(repo: &InMemoryRepository, files: &[(&str, &str)], parents: Vec<CommitId>, msg: &str) -> CommitId {
        repo.write_commit(
            "app",
            NewCommit {
                tree: tree(files),
                parents,
                author: ident(),
                committer: ident(),
                message: msg.to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_commit_ids_are_content_addressed() {
        let repo = InMemoryRepository::new();
        repo.create_project("app");
        let a = commit(&repo, &[("a.txt", "1")], vec![], "init");
        let b = commit(&repo, &[("a.txt", "1")], vec![], "init");
        let c = commit(&repo, &[("a.txt", "2")], vec![], "init");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_change_kinds() {
        let repo = InMemoryRepository::new();
        repo.create_project("app");
        let base = commit(&repo, &[("a.txt", "1"), ("b.txt", "1")], vec![], "init");
        let base2 = commit(&repo, &[("a.txt", "1"), ("b.txt", "2")], vec![base.clone()], "tip");

        let ps1 = commit(&repo, &[("a.txt", "x"), ("b.txt", "1")], vec![base.clone()], "feature");
        let amended_msg = commit(&repo, &[("a.txt", "x"), ("b.txt", "1")], vec![base.clone()], "feature v2");
        let rebased = commit(&repo, &[("a.txt", "x"), ("b.txt", "2")], vec![base2.clone()], "feature");
        let reworked = commit(&repo, &[("a.txt", "y"), ("b.txt", "1")], vec![base.clone()], "feature");

        assert_eq!(change_kind(&repo, "app", &ps1, &ps1).unwrap(), ChangeKind::NoChange);
        assert_eq!(change_kind(&repo, "app", &ps1, &amended_msg).unwrap(), ChangeKind::NoCodeChange);
        assert_eq!(change_kind(&repo, "app", &ps1, &rebased).unwrap(), ChangeKind::TrivialRebase);
        assert_eq!(change_kind(&repo, "app", &ps1, &reworked).unwrap(), ChangeKind::Rework);
    }

    #[test]
    fn test_three_way_merge_conflict_markers() {
        let base = tree(&[("a.txt", "1")]);
        let ours = tree(&[("a.txt", "2")]);
        let theirs = tree(&[("a.txt", "3"), ("new.txt", "n")]);
        let outcome = three_way_merge(&base, &ours, &theirs);
        assert_eq!(outcome.conflicts, vec!["a.txt".to_string()]);
        assert_eq!(
            outcome.tree["a.txt"],
            "<<<<<<< BASE\n2\n=======\n3\n>>>>>>> PATCH SET\n"
        );
        assert_eq!(outcome.tree["new.txt"], "n");
    }

    #[test]
    fn test_batched_ref_update_is_atomic() {
        let repo = InMemoryRepository::new();
        repo.create_project("app");
        let a = commit(&repo, &[("a.txt", "1")], vec![], "init");
        let identity = AuditIdentity::Single(AccountId(1));

        repo.update_refs(
            "app",
            &[RefUpdate { name: "refs/heads/main".into(), old: None, new: a.clone() }],
            &identity,
            "create",
        )
        .unwrap();

        let b = commit(&repo, &[("a.txt", "2")], vec![a.clone()], "next");
        let result = repo.update_refs(
            "app",
            &[
                RefUpdate { name: "refs/changes/01/1/1".into(), old: None, new: b.clone() },
                RefUpdate { name: "refs/heads/main".into(), old: None, new: b.clone() },
            ],
            &identity,
            "bad",
        );
        assert!(result.is_err());
        assert_eq!(repo.resolve_ref("app", "refs/changes/01/1/1").unwrap(), None);

        let log = repo.reflog("app", "refs/heads/main").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].who, "account-1");
        assert!(is_ancestor(&repo, "app", &a, &b).unwrap());
        assert!(!is_ancestor(&repo, "app", &b, &a).unwrap());
    }
}
