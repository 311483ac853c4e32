//! Project configuration and the inheritance hierarchy.

use serde::{Deserialize, Serialize};

use super::label_type::{LabelType, LabelTypes};
use super::submit_requirement::SubmitRequirement;

/// Review configuration of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,

    /// Parent project; `None` for the root.
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub label_types: Vec<LabelType>,

    #[serde(default)]
    pub submit_requirements: Vec<SubmitRequirement>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            label_types: Vec::new(),
            submit_requirements: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_label(mut self, label: LabelType) -> Self {
        self.label_types.push(label);
        self
    }

    pub fn with_requirement(mut self, requirement: SubmitRequirement) -> Self {
        self.submit_requirements.push(requirement);
        self
    }
}

/// Configurations from the root project down to one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHierarchy {
    root_to_leaf: Vec<ProjectConfig>,
}

impl ProjectHierarchy {
    /// Build from configs ordered root first.
    pub fn new(root_to_leaf: Vec<ProjectConfig>) -> Self {
        Self { root_to_leaf }
    }

    pub fn root_to_leaf(&self) -> &[ProjectConfig] {
        &self.root_to_leaf
    }

    /// Effective labels: a child label replaces an inherited one of the same name.
    pub fn label_types(&self) -> LabelTypes {
        let mut merged: Vec<LabelType> = Vec::new();
        for project in &self.root_to_leaf {
            for label in &project.label_types {
                match merged
                    .iter_mut()
                    .find(|l| l.name.eq_ignore_ascii_case(&label.name))
                {
                    Some(existing) => *existing = label.clone(),
                    None => merged.push(label.clone()),
                }
            }
        }
        LabelTypes::new(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_label_replaces_parent_label() {
        let root = ProjectConfig::new("All-Projects")
            .with_label(LabelType::code_review().with_copy_condition("is:MIN"))
            .with_label(LabelType::verified());
        let child = ProjectConfig::new("app")
            .with_parent("All-Projects")
            .with_label(LabelType::code_review().with_copy_condition("is:ANY"));

        let labels = ProjectHierarchy::new(vec![root, child]).label_types();
        assert_eq!(
            labels.by_label("Code-Review").unwrap().copy_condition.as_deref(),
            Some("is:ANY")
        );
        assert!(labels.by_label("Verified").is_some());
    }
}
