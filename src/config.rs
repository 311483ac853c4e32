//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ReviewError;
use crate::models::PersonIdent;

/// Default database file name, relative to the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "change-review.db";

/// Identity the server uses for commits it creates itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdent {
    pub name: String,
    pub email: String,
}

impl Default for ServerIdent {
    fn default() -> Self {
        Self {
            name: "Review Server".to_string(),
            email: "noreply@review.local".to_string(),
        }
    }
}

impl ServerIdent {
    /// Build a person ident stamped with the current time.
    pub fn to_person_ident(&self) -> PersonIdent {
        PersonIdent::now(&self.name, &self.email)
    }

    /// Whether the given email is the server's own.
    pub fn matches_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email)
    }
}

/// Configuration for a review server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Database file name, resolved against the data directory.
    pub database_file: String,

    /// Upper bound of pooled SQLite connections.
    pub max_db_connections: u32,

    /// Server identity used for forged-server checks.
    pub server_ident: ServerIdent,

    /// Whether label functions are synthesized into legacy submit requirements.
    pub enable_legacy_submit_requirements: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            max_db_connections: 5,
            server_ident: ServerIdent::default(),
            enable_legacy_submit_requirements: true,
        }
    }
}

impl ReviewConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    pub fn load(path: &Path) -> Result<Self, ReviewError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReviewError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            ReviewError::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Path of the SQLite database inside the data directory.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }
}
