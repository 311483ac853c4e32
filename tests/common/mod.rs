//! Shared setup for the integration suites.
//!
//! Every test gets its own temporary database, an in-memory git repository
//! with project `app` (child of `All-Projects`) whose `main` branch holds one
//! root commit, and three accounts.

#![allow(dead_code)]

use std::sync::Arc;

use change_review::commands::{self, CreateChangeInput};
use change_review::models::{
    Account, AccountId, AuditIdentity, ChangeId, ChangeNotes, CommitId, LabelType, ProjectConfig,
};
use change_review::services::change_store;
use change_review::services::git::{GitRepository, InMemoryRepository, NewCommit, RefUpdate, Tree};
use change_review::services::{AccountDirectory, InMemoryDirectory, Permission, StaticPermissions};
use change_review::{Collaborators, ReviewConfig, ReviewServer};
use tempfile::{tempdir, TempDir};

pub const OWNER: AccountId = AccountId(1);
pub const REVIEWER: AccountId = AccountId(2);
pub const REBASER: AccountId = AccountId(3);

pub const PROJECT: &str = "app";
pub const ROOT_PROJECT: &str = "All-Projects";
pub const BRANCH: &str = "refs/heads/main";

pub struct TestEnv {
    _dir: TempDir,
    pub server: ReviewServer,
    pub git: Arc<InMemoryRepository>,
    pub permissions: Arc<StaticPermissions>,
    pub directory: Arc<InMemoryDirectory>,
    pub root: CommitId,
}

/// `Code-Review` with the copy condition `is:ANY`, configured on the root project.
pub fn code_review() -> LabelType {
    LabelType::code_review().with_copy_condition("is:ANY")
}

pub async fn setup() -> TestEnv {
    setup_with_config(ReviewConfig::default()).await
}

pub async fn setup_with_config(config: ReviewConfig) -> TestEnv {
    let dir = tempdir().unwrap();

    let git = Arc::new(InMemoryRepository::new());
    git.create_project(PROJECT);

    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_account(Account::new(1, "Owner", "owner@example.com"));
    directory.add_account(Account::new(2, "Reviewer", "reviewer@example.com"));
    directory.add_account(Account::new(3, "Rebaser", "rebaser@example.com"));

    let permissions = Arc::new(StaticPermissions::new());
    permissions.grant_all(Permission::Read);

    let server = ReviewServer::open(
        dir.path(),
        config,
        Collaborators {
            git: git.clone(),
            permissions: permissions.clone(),
            directory: directory.clone(),
        },
    )
    .await
    .unwrap();

    server
        .projects()
        .upsert(ProjectConfig::new(ROOT_PROJECT).with_label(code_review()));
    server
        .projects()
        .upsert(ProjectConfig::new(PROJECT).with_parent(ROOT_PROJECT));

    let ident = server.config().server_ident.to_person_ident();
    let root = git
        .write_commit(
            PROJECT,
            NewCommit {
                tree: tree(&[("README", "app\n")]),
                parents: Vec::new(),
                author: ident.clone(),
                committer: ident,
                message: "Initial commit".to_string(),
            },
        )
        .unwrap();
    git.update_refs(
        PROJECT,
        &[RefUpdate {
            name: BRANCH.to_string(),
            old: None,
            new: root.clone(),
        }],
        &AuditIdentity::Single(OWNER),
        "init",
    )
    .unwrap();

    TestEnv {
        _dir: dir,
        server,
        git,
        permissions,
        directory,
        root,
    }
}

pub fn tree(files: &[(&str, &str)]) -> Tree {
    files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect()
}

impl TestEnv {
    /// Write a commit on `parent` that adds or replaces `files`.
    pub fn commit(&self, parent: &CommitId, files: &[(&str, &str)], author: AccountId, message: &str) -> CommitId {
        let mut content = self.git.read_commit(PROJECT, parent).unwrap().tree;
        content.extend(tree(files));
        let ident = self.directory.account(author).unwrap().ident();
        self.git
            .write_commit(
                PROJECT,
                NewCommit {
                    tree: content,
                    parents: vec![parent.clone()],
                    author: ident.clone(),
                    committer: ident,
                    message: message.to_string(),
                },
            )
            .unwrap()
    }

    pub fn tip(&self) -> CommitId {
        self.git.resolve_ref(PROJECT, BRANCH).unwrap().unwrap()
    }

    /// Move `main` forward by one commit touching `files`.
    pub fn advance_tip(&self, files: &[(&str, &str)]) -> CommitId {
        let old = self.tip();
        let new = self.commit(&old, files, REVIEWER, "Advance main");
        self.git
            .update_refs(
                PROJECT,
                &[RefUpdate {
                    name: BRANCH.to_string(),
                    old: Some(old),
                    new: new.clone(),
                }],
                &AuditIdentity::Single(REVIEWER),
                "push",
            )
            .unwrap();
        new
    }

    pub async fn create_change(&self, owner: AccountId, commit: &CommitId) -> ChangeId {
        commands::create_change(
            &self.server,
            owner,
            CreateChangeInput {
                project: PROJECT.to_string(),
                branch: "main".to_string(),
                commit_id: commit.clone(),
                topic: None,
                is_private: false,
                work_in_progress: false,
            },
        )
        .await
        .unwrap()
        .change
        .id
    }

    pub async fn notes(&self, id: ChangeId) -> ChangeNotes {
        let mut conn = self.server.pool().acquire().await.unwrap();
        change_store::load_notes(&mut conn, id).await.unwrap()
    }

    pub fn set_project(&self, config: ProjectConfig) {
        self.server.projects().upsert(config);
    }
}
