//! The review server: database, collaborators, registries and metrics.
//!
//! Nothing here is process-wide. Every command takes a `&ReviewServer`, and
//! two servers in one process share no state.

use std::path::Path;
use std::sync::Arc;

use prometheus::Registry;

use crate::config::ReviewConfig;
use crate::db::{self, DbPool};
use crate::error::ReviewError;
use crate::services::approval_copier::ApprovalCopier;
use crate::services::directory::AccountDirectory;
use crate::services::git::GitRepository;
use crate::services::metrics::RebaseMetrics;
use crate::services::permissions::PermissionBackend;
use crate::services::project_cache::ProjectCache;
use crate::services::rebase_chain::Rebaser;
use crate::services::rule_registry::SubmitRuleRegistry;
use crate::services::submit_requirements::SubmitRequirementsEvaluator;

/// External systems the server delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub git: Arc<dyn GitRepository>,
    pub permissions: Arc<dyn PermissionBackend>,
    pub directory: Arc<dyn AccountDirectory>,
}

pub struct ReviewServer {
    pool: DbPool,
    config: ReviewConfig,
    git: Arc<dyn GitRepository>,
    permissions: Arc<dyn PermissionBackend>,
    directory: Arc<dyn AccountDirectory>,
    projects: ProjectCache,
    rules: SubmitRuleRegistry,
    registry: Registry,
    metrics: RebaseMetrics,
}

impl ReviewServer {
    /// Open the database under `data_dir` and assemble a server.
    ///
    /// # Arguments
    /// * `data_dir` - Directory holding the SQLite database
    /// * `config` - Server configuration
    /// * `collaborators` - Git storage, permission backend and account directory
    pub async fn open(
        data_dir: &Path,
        config: ReviewConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ReviewError> {
        let db_path = config.database_path(data_dir);
        let pool = db::initialize(&db_path, config.max_db_connections).await?;

        let registry = Registry::new();
        let metrics = RebaseMetrics::new(&registry)?;

        log::info!("Review server opened database {}", db_path.display());

        Ok(Self {
            pool,
            config,
            git: collaborators.git,
            permissions: collaborators.permissions,
            directory: collaborators.directory,
            projects: ProjectCache::new(),
            rules: SubmitRuleRegistry::new(),
            registry,
            metrics,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn git(&self) -> &dyn GitRepository {
        self.git.as_ref()
    }

    pub fn permissions(&self) -> &dyn PermissionBackend {
        self.permissions.as_ref()
    }

    pub fn directory(&self) -> &dyn AccountDirectory {
        self.directory.as_ref()
    }

    /// Project configurations known to this server.
    pub fn projects(&self) -> &ProjectCache {
        &self.projects
    }

    /// Externally registered submit rules and global requirements.
    pub fn rules(&self) -> &SubmitRuleRegistry {
        &self.rules
    }

    /// Registry holding this server's metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &RebaseMetrics {
        &self.metrics
    }

    pub(crate) fn copier(&self) -> ApprovalCopier<'_> {
        ApprovalCopier::new(self.git(), self.directory())
    }

    pub(crate) fn evaluator(&self) -> SubmitRequirementsEvaluator<'_> {
        SubmitRequirementsEvaluator::new(
            self.git(),
            self.directory(),
            &self.rules,
            self.config.enable_legacy_submit_requirements,
        )
    }

    pub(crate) fn rebaser(&self) -> Rebaser<'_> {
        Rebaser::new(
            self.git(),
            self.permissions(),
            self.directory(),
            &self.config.server_ident,
        )
    }

    /// Close the database pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
