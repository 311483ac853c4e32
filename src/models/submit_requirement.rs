//! Submit requirement definitions and evaluation results.

use serde::{Deserialize, Serialize};

/// A named rule gating submission of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequirement {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// When absent the requirement always applies.
    #[serde(default)]
    pub applicability_expression: Option<String>,

    /// Required for the requirement to take effect.
    #[serde(default)]
    pub submittability_expression: Option<String>,

    #[serde(default)]
    pub override_expression: Option<String>,

    #[serde(default)]
    pub allow_override_in_child_projects: bool,
}

impl SubmitRequirement {
    pub fn new(name: impl Into<String>, submittability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            applicability_expression: None,
            submittability_expression: Some(submittability.into()),
            override_expression: None,
            allow_override_in_child_projects: false,
        }
    }

    pub fn with_applicability(mut self, expression: impl Into<String>) -> Self {
        self.applicability_expression = Some(expression.into());
        self
    }

    pub fn with_override(mut self, expression: impl Into<String>) -> Self {
        self.override_expression = Some(expression.into());
        self
    }

    pub fn allowing_override(mut self, allow: bool) -> Self {
        self.allow_override_in_child_projects = allow;
        self
    }

    /// Key used for case-insensitive name matching.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Outcome of evaluating one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpressionStatus {
    Pass,
    Fail,
    Error,
}

/// Result of evaluating one expression, with the atoms that decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub expression: String,
    pub status: ExpressionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Atoms that evaluated true, as written in the expression.
    pub passing_atoms: Vec<String>,

    /// Atoms that evaluated false, as written in the expression.
    pub failing_atoms: Vec<String>,
}

impl ExpressionResult {
    pub fn new(expression: impl Into<String>, matched: bool, passing: Vec<String>, failing: Vec<String>) -> Self {
        Self {
            expression: expression.into(),
            status: if matched {
                ExpressionStatus::Pass
            } else {
                ExpressionStatus::Fail
            },
            error_message: None,
            passing_atoms: passing,
            failing_atoms: failing,
        }
    }

    pub fn error(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            status: ExpressionStatus::Error,
            error_message: Some(message.into()),
            passing_atoms: Vec::new(),
            failing_atoms: Vec::new(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == ExpressionStatus::Pass
    }

    pub fn is_error(&self) -> bool {
        self.status == ExpressionStatus::Error
    }
}

/// Final status of a submit requirement for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitRequirementStatus {
    Satisfied,
    Unsatisfied,
    Overridden,
    NotApplicable,
    Error,
    Forced,
}

impl SubmitRequirementStatus {
    /// Whether this status lets the change be submitted.
    pub fn allows_submit(&self) -> bool {
        matches!(
            self,
            Self::Satisfied | Self::Overridden | Self::NotApplicable | Self::Forced
        )
    }
}

impl std::fmt::Display for SubmitRequirementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Satisfied => "SATISFIED",
            Self::Unsatisfied => "UNSATISFIED",
            Self::Overridden => "OVERRIDDEN",
            Self::NotApplicable => "NOT_APPLICABLE",
            Self::Error => "ERROR",
            Self::Forced => "FORCED",
        };
        write!(f, "{}", s)
    }
}

/// Evaluation of one requirement against one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequirementResult {
    pub requirement: SubmitRequirement,
    pub status: SubmitRequirementStatus,

    #[serde(default)]
    pub applicability_expression_result: Option<ExpressionResult>,

    #[serde(default)]
    pub submittability_expression_result: Option<ExpressionResult>,

    #[serde(default)]
    pub override_expression_result: Option<ExpressionResult>,

    /// Synthesized from a label function rather than configured.
    pub is_legacy: bool,
}

impl SubmitRequirementResult {
    /// Assemble a result, deriving its status from the expression results.
    ///
    /// `forced` marks a change that was submitted bypassing requirements.
    pub fn new(
        requirement: SubmitRequirement,
        applicability: Option<ExpressionResult>,
        submittability: Option<ExpressionResult>,
        override_result: Option<ExpressionResult>,
        is_legacy: bool,
        forced: bool,
    ) -> Self {
        let status = Self::derive_status(
            applicability.as_ref(),
            submittability.as_ref(),
            override_result.as_ref(),
            forced,
        );
        Self {
            requirement,
            status,
            applicability_expression_result: applicability,
            submittability_expression_result: submittability,
            override_expression_result: override_result,
            is_legacy,
        }
    }

    fn derive_status(
        applicability: Option<&ExpressionResult>,
        submittability: Option<&ExpressionResult>,
        override_result: Option<&ExpressionResult>,
        forced: bool,
    ) -> SubmitRequirementStatus {
        if forced {
            return SubmitRequirementStatus::Forced;
        }
        if let Some(app) = applicability {
            match app.status {
                ExpressionStatus::Error => return SubmitRequirementStatus::Error,
                ExpressionStatus::Fail => return SubmitRequirementStatus::NotApplicable,
                ExpressionStatus::Pass => {}
            }
        }
        let Some(sub) = submittability else {
            return SubmitRequirementStatus::Error;
        };
        if sub.is_error() {
            return SubmitRequirementStatus::Error;
        }
        if override_result.is_some_and(|o| o.is_pass()) {
            return SubmitRequirementStatus::Overridden;
        }
        if override_result.is_some_and(|o| o.is_error()) {
            return SubmitRequirementStatus::Error;
        }
        if sub.is_pass() {
            SubmitRequirementStatus::Satisfied
        } else {
            SubmitRequirementStatus::Unsatisfied
        }
    }

    /// Whether the change may be submitted with respect to this requirement.
    pub fn fulfilled(&self) -> bool {
        self.status.allows_submit()
    }

    pub fn name(&self) -> &str {
        &self.requirement.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(expr: &str) -> ExpressionResult {
        ExpressionResult::new(expr, true, vec![expr.to_string()], Vec::new())
    }

    fn fail(expr: &str) -> ExpressionResult {
        ExpressionResult::new(expr, false, Vec::new(), vec![expr.to_string()])
    }

    #[test]
    fn test_status_derivation() {
        let req = SubmitRequirement::new("Code-Review", "label:Code-Review=MAX");

        let r = SubmitRequirementResult::new(req.clone(), Some(fail("a")), None, None, false, false);
        assert_eq!(r.status, SubmitRequirementStatus::NotApplicable);

        let r = SubmitRequirementResult::new(req.clone(), None, Some(pass("s")), None, false, false);
        assert_eq!(r.status, SubmitRequirementStatus::Satisfied);

        let r = SubmitRequirementResult::new(req.clone(), None, Some(fail("s")), Some(pass("o")), false, false);
        assert_eq!(r.status, SubmitRequirementStatus::Overridden);

        let r = SubmitRequirementResult::new(
            req.clone(),
            None,
            Some(ExpressionResult::error("s", "bad")),
            None,
            false,
            false,
        );
        assert_eq!(r.status, SubmitRequirementStatus::Error);

        let r = SubmitRequirementResult::new(req, None, Some(fail("s")), None, false, true);
        assert_eq!(r.status, SubmitRequirementStatus::Forced);
        assert!(r.fulfilled());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&SubmitRequirementStatus::NotApplicable).unwrap();
        assert_eq!(json, "\"NOT_APPLICABLE\"");
    }
}
