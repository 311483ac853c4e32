//! Project configurations and their inheritance chain.
//!
//! Configurations are replaced wholesale on update; a hierarchy is resolved
//! fresh from the current configurations on every call.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::ReviewError;
use crate::models::{ProjectConfig, ProjectHierarchy};

/// Known project configurations, keyed by project name.
#[derive(Debug, Default)]
pub struct ProjectCache {
    projects: RwLock<HashMap<String, ProjectConfig>>,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project's configuration.
    pub fn upsert(&self, config: ProjectConfig) {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        log::debug!("Updated configuration of project {}", config.name);
        projects.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Option<ProjectConfig> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        projects.get(name).cloned()
    }

    /// Resolve the configurations from the root project down to `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` or one of its parents is unknown, `Config` if the
    /// parent chain loops.
    pub fn hierarchy(&self, name: &str) -> Result<ProjectHierarchy, ReviewError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());

        let mut leaf_to_root = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(ReviewError::config(format!(
                    "project {} has a cyclic parent chain at {}",
                    name, current
                )));
            }
            let config = projects
                .get(&current)
                .ok_or_else(|| ReviewError::not_found_with_id("Project", current.clone()))?;
            next = config.parent.clone();
            leaf_to_root.push(config.clone());
        }

        leaf_to_root.reverse();
        Ok(ProjectHierarchy::new(leaf_to_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_is_root_first() {
        let cache = ProjectCache::new();
        cache.upsert(ProjectConfig::new("All-Projects"));
        cache.upsert(ProjectConfig::new("platform").with_parent("All-Projects"));
        cache.upsert(ProjectConfig::new("platform/app").with_parent("platform"));

        let hierarchy = cache.hierarchy("platform/app").unwrap();
        let names: Vec<&str> = hierarchy
            .root_to_leaf()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["All-Projects", "platform", "platform/app"]);
    }

    #[test]
    fn test_unknown_parent_is_not_found() {
        let cache = ProjectCache::new();
        cache.upsert(ProjectConfig::new("app").with_parent("missing"));

        let err = cache.hierarchy("app").unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let cache = ProjectCache::new();
        cache.upsert(ProjectConfig::new("a").with_parent("b"));
        cache.upsert(ProjectConfig::new("b").with_parent("a"));

        let err = cache.hierarchy("a").unwrap_err();
        assert!(matches!(err, ReviewError::Config { .. }));
    }
}
