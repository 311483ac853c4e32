//! Submit requirement resolution and evaluation.
//!
//! Requirements are resolved from the globally registered ones and the project
//! hierarchy, root first. Each resolved requirement is evaluated against one
//! snapshot of the change. Label functions are evaluated alongside as legacy
//! requirements and reconciled with configured requirements of the same name.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ReviewError;
use crate::models::{
    AccountId, ChangeNotes, ExpressionResult, LabelType, ProjectHierarchy, SubmitRequirement,
    SubmitRequirementResult,
};
use crate::query::{parse_change_expression, ChangeContext};

use super::directory::AccountDirectory;
use super::git::GitRepository;
use super::legacy_rules;
use super::rule_registry::{ExternalSubmitRule, SubmitRuleRegistry};

/// One source of submit requirement results.
#[derive(Clone)]
pub enum SubmitRule {
    /// A configured requirement with boolean expressions.
    Expression(SubmitRequirement),
    /// A label function evaluated the old way.
    LegacyLabelFunction(LabelType),
    /// A rule implemented in code and registered at runtime.
    External(Arc<dyn ExternalSubmitRule>),
}

/// Everything a rule needs to evaluate one change.
pub struct RuleInput<'a> {
    pub notes: &'a ChangeNotes,
    pub context: ChangeContext<'a>,

    /// The change was submitted bypassing requirements.
    pub forced: bool,
}

impl SubmitRule {
    pub fn name(&self) -> &str {
        match self {
            Self::Expression(req) => &req.name,
            Self::LegacyLabelFunction(label) => &label.name,
            Self::External(rule) => rule.name(),
        }
    }

    pub fn evaluate(&self, input: &RuleInput<'_>) -> Option<SubmitRequirementResult> {
        match self {
            Self::Expression(req) => Some(evaluate_requirement(req, &input.context, input.forced)),
            Self::LegacyLabelFunction(label) => legacy_rules::evaluate_legacy(
                label,
                &input.context.approvals,
                input.context.current_patch_set.uploader,
                input.forced,
            ),
            Self::External(rule) => rule.evaluate(input.notes),
        }
    }
}

/// Resolve the requirements in effect for the leaf project of `hierarchy`.
///
/// Global requirements come first, then each project from the root down. A
/// requirement replaces an earlier one of the same case-insensitive name only
/// if the earlier one allows overriding. Incomplete requirements are ignored.
pub fn resolve_requirements(
    globals: &[SubmitRequirement],
    hierarchy: &ProjectHierarchy,
) -> Vec<SubmitRequirement> {
    let mut resolved: Vec<SubmitRequirement> = Vec::new();

    let levels = std::iter::once(("<global>", globals)).chain(
        hierarchy
            .root_to_leaf()
            .iter()
            .map(|p| (p.name.as_str(), p.submit_requirements.as_slice())),
    );
    for (project, requirements) in levels {
        for req in requirements {
            if req.submittability_expression.is_none() {
                log::warn!(
                    "Ignoring submit requirement {} in project {}: missing submittability expression",
                    req.name,
                    project
                );
                continue;
            }
            let key = req.key();
            match resolved.iter_mut().find(|r| r.key() == key) {
                Some(existing) if existing.allow_override_in_child_projects => {
                    *existing = req.clone();
                }
                Some(_) => log::debug!(
                    "Ignoring submit requirement {} in project {}: parent does not allow override",
                    req.name,
                    project
                ),
                None => resolved.push(req.clone()),
            }
        }
    }
    resolved
}

/// Evaluate a single expression against a change.
///
/// Parse failures become an `Error` result carrying the parser's message.
pub fn evaluate_expression(expression: &str, context: &ChangeContext<'_>) -> ExpressionResult {
    match parse_change_expression(expression) {
        Ok(parsed) => {
            let evaluation = context.evaluate(&parsed);
            ExpressionResult::new(
                expression,
                evaluation.matched,
                evaluation.passing_atoms.into_iter().collect(),
                evaluation.failing_atoms.into_iter().collect(),
            )
        }
        Err(e) => {
            log::warn!("Failed to parse submit requirement expression {:?}: {}", expression, e);
            ExpressionResult::error(expression, e.to_string())
        }
    }
}

/// Evaluate one requirement.
///
/// A failing or broken applicability expression stops evaluation, as does a
/// broken submittability expression.
pub fn evaluate_requirement(
    requirement: &SubmitRequirement,
    context: &ChangeContext<'_>,
    forced: bool,
) -> SubmitRequirementResult {
    let applicability = requirement
        .applicability_expression
        .as_deref()
        .map(|e| evaluate_expression(e, context));
    if applicability.as_ref().is_some_and(|a| !a.is_pass()) {
        return SubmitRequirementResult::new(requirement.clone(), applicability, None, None, false, forced);
    }

    let submittability = requirement
        .submittability_expression
        .as_deref()
        .map(|e| evaluate_expression(e, context));
    let broken = match &submittability {
        Some(s) => s.is_error(),
        None => true,
    };
    if broken {
        return SubmitRequirementResult::new(requirement.clone(), applicability, submittability, None, false, forced);
    }

    let override_result = requirement
        .override_expression
        .as_deref()
        .map(|e| evaluate_expression(e, context));
    SubmitRequirementResult::new(
        requirement.clone(),
        applicability,
        submittability,
        override_result,
        false,
        forced,
    )
}

/// Drop legacy results that agree with a configured result of the same name.
fn reconcile(results: Vec<SubmitRequirementResult>) -> Vec<SubmitRequirementResult> {
    let (native, legacy): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| !r.is_legacy);
    let mut reconciled = native;
    for result in legacy {
        let key = result.requirement.key();
        let agrees = reconciled
            .iter()
            .any(|r| !r.is_legacy && r.requirement.key() == key && r.status == result.status);
        if agrees {
            log::debug!(
                "Legacy submit requirement {} agrees with the configured one, dropping it",
                result.name()
            );
        } else {
            reconciled.push(result);
        }
    }
    reconciled
}

/// Evaluates submit requirements of changes.
pub struct SubmitRequirementsEvaluator<'a> {
    git: &'a dyn GitRepository,
    directory: &'a dyn AccountDirectory,
    registry: &'a SubmitRuleRegistry,
    enable_legacy: bool,
}

impl<'a> SubmitRequirementsEvaluator<'a> {
    pub fn new(
        git: &'a dyn GitRepository,
        directory: &'a dyn AccountDirectory,
        registry: &'a SubmitRuleRegistry,
        enable_legacy: bool,
    ) -> Self {
        Self {
            git,
            directory,
            registry,
            enable_legacy,
        }
    }

    /// Accounts that contributed to the current patch set: the uploader and the
    /// accounts owning the commit's author and committer emails.
    fn contributors(&self, notes: &ChangeNotes) -> Result<BTreeSet<AccountId>, ReviewError> {
        let current = notes.current_patch_set()?;
        let commit = self.git.read_commit(&notes.change.project, &current.commit_id)?;
        let mut contributors = BTreeSet::from([current.uploader]);
        contributors.extend(self.directory.account_by_email(&commit.author.email));
        contributors.extend(self.directory.account_by_email(&commit.committer.email));
        Ok(contributors)
    }

    fn rules(&self, hierarchy: &ProjectHierarchy) -> Vec<SubmitRule> {
        let mut rules: Vec<SubmitRule> =
            resolve_requirements(&self.registry.global_requirements(), hierarchy)
                .into_iter()
                .map(SubmitRule::Expression)
                .collect();
        if self.enable_legacy {
            rules.extend(hierarchy.label_types().iter().cloned().map(SubmitRule::LegacyLabelFunction));
        }
        rules.extend(self.registry.rules().into_iter().map(SubmitRule::External));
        rules
    }

    fn with_context<T>(
        &self,
        notes: &ChangeNotes,
        hierarchy: &ProjectHierarchy,
        f: impl FnOnce(&RuleInput<'_>) -> T,
    ) -> Result<T, ReviewError> {
        let current = notes.current_patch_set()?;
        let label_types = hierarchy.label_types();
        let input = RuleInput {
            notes,
            context: ChangeContext {
                change: &notes.change,
                current_patch_set: current,
                approvals: notes
                    .approvals_on(current.number())
                    .filter(|a| a.value != 0)
                    .collect(),
                label_types: &label_types,
                contributors: self.contributors(notes)?,
                directory: self.directory,
            },
            forced: notes.change.submitted_bypassing_requirements,
        };
        Ok(f(&input))
    }

    /// Evaluate every requirement in effect for the change.
    ///
    /// Configuration and expression problems show up as `Error` results; only
    /// failures to read the change are returned as errors.
    pub fn evaluate_all(
        &self,
        notes: &ChangeNotes,
        hierarchy: &ProjectHierarchy,
    ) -> Result<Vec<SubmitRequirementResult>, ReviewError> {
        let rules = self.rules(hierarchy);
        let results = self.with_context(notes, hierarchy, |input| {
            rules
                .iter()
                .filter_map(|rule| {
                    let result = rule.evaluate(input);
                    if let Some(r) = &result {
                        log::debug!(
                            "Submit requirement {} of change {} is {}",
                            rule.name(),
                            notes.change.id,
                            r.status
                        );
                    }
                    result
                })
                .collect::<Vec<_>>()
        })?;
        Ok(reconcile(results))
    }

    /// Evaluate a requirement that is not part of any configuration.
    pub fn check_requirement(
        &self,
        notes: &ChangeNotes,
        hierarchy: &ProjectHierarchy,
        requirement: &SubmitRequirement,
    ) -> Result<SubmitRequirementResult, ReviewError> {
        if requirement.submittability_expression.is_none() {
            return Err(ReviewError::bad_request_field(
                "submittability expression is required",
                "submittability_expression",
            ));
        }
        self.with_context(notes, hierarchy, |input| {
            evaluate_requirement(requirement, &input.context, input.forced)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Change, ChangeId, ChangeStatus, LabelFunction, PatchSet, PatchSetApproval, PatchSetId,
        PersonIdent, ProjectConfig, SubmitRequirementStatus,
    };
    use crate::services::directory::InMemoryDirectory;
    use crate::services::git::{InMemoryRepository, NewCommit, Tree};
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct Fixture {
        git: InMemoryRepository,
        directory: InMemoryDirectory,
        registry: SubmitRuleRegistry,
        notes: ChangeNotes,
    }

    impl Fixture {
        fn new() -> Self {
            let git = InMemoryRepository::new();
            git.create_project("app");
            let author = PersonIdent::now("Owner", "owner@example.com");
            let commit_id = git
                .write_commit(
                    "app",
                    NewCommit {
                        tree: Tree::from([("a.txt".to_string(), "a\n".to_string())]),
                        parents: Vec::new(),
                        author: author.clone(),
                        committer: author,
                        message: "Add a".to_string(),
                    },
                )
                .unwrap();
            let change = Change {
                id: ChangeId(1),
                project: "app".to_string(),
                branch: "refs/heads/main".to_string(),
                status: ChangeStatus::New,
                owner: AccountId(1),
                subject: "Add a".to_string(),
                topic: None,
                is_private: false,
                work_in_progress: false,
                current_patch_set: 1,
                unresolved_comment_count: 0,
                submitted_bypassing_requirements: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let ps = PatchSet {
                id: PatchSetId::new(ChangeId(1), 1),
                commit_id,
                uploader: AccountId(1),
                real_uploader: None,
                created_at: Utc::now(),
            };
            Self {
                git,
                directory: InMemoryDirectory::new(),
                registry: SubmitRuleRegistry::new(),
                notes: ChangeNotes {
                    change,
                    patch_sets: BTreeMap::from([(1, ps)]),
                    approvals: Vec::new(),
                    messages: Vec::new(),
                },
            }
        }

        fn vote(&mut self, account: i64, value: i16) {
            self.notes.upsert_approval(PatchSetApproval::new(
                PatchSetId::new(ChangeId(1), 1),
                "Code-Review",
                AccountId(account),
                value,
                Utc::now(),
            ));
        }

        fn evaluate(&self, hierarchy: &ProjectHierarchy, legacy: bool) -> Vec<SubmitRequirementResult> {
            SubmitRequirementsEvaluator::new(&self.git, &self.directory, &self.registry, legacy)
                .evaluate_all(&self.notes, hierarchy)
                .unwrap()
        }
    }

    fn single(project: ProjectConfig) -> ProjectHierarchy {
        ProjectHierarchy::new(vec![project])
    }

    #[test]
    fn test_not_applicable_skips_submittability() {
        let mut fx = Fixture::new();
        fx.vote(2, 2);
        let project = ProjectConfig::new("app").with_requirement(
            SubmitRequirement::new("Code-Review", "label:Code-Review=MAX")
                .with_applicability("branch:refs/heads/non-existent")
                .with_override("is:true"),
        );

        let results = fx.evaluate(&single(project), false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SubmitRequirementStatus::NotApplicable);
        assert!(results[0].submittability_expression_result.is_none());
        assert!(results[0].override_expression_result.is_none());
    }

    #[test]
    fn test_override_and_satisfied() {
        let mut fx = Fixture::new();
        let project = ProjectConfig::new("app")
            .with_label(LabelType::code_review())
            .with_requirement(
                SubmitRequirement::new("Code-Review", "label:Code-Review=MAX")
                    .with_override("label:Code-Review=-1"),
            );
        let hierarchy = single(project);

        assert_eq!(fx.evaluate(&hierarchy, false)[0].status, SubmitRequirementStatus::Unsatisfied);
        fx.vote(2, 2);
        let result = &fx.evaluate(&hierarchy, false)[0];
        assert_eq!(result.status, SubmitRequirementStatus::Satisfied);
        assert_eq!(
            result.submittability_expression_result.as_ref().unwrap().passing_atoms,
            vec!["label:Code-Review=MAX".to_string()]
        );
        fx.vote(2, -1);
        assert_eq!(fx.evaluate(&hierarchy, false)[0].status, SubmitRequirementStatus::Overridden);
    }

    #[test]
    fn test_child_override_respects_parent_flag() {
        let parent = ProjectConfig::new("All-Projects")
            .with_requirement(SubmitRequirement::new("Code-Review", "is:false").allowing_override(true))
            .with_requirement(SubmitRequirement::new("Verified", "is:false"));
        let child = ProjectConfig::new("app")
            .with_parent("All-Projects")
            .with_requirement(SubmitRequirement::new("code-review", "is:true"))
            .with_requirement(SubmitRequirement::new("VERIFIED", "is:true"));

        let resolved = resolve_requirements(&[], &ProjectHierarchy::new(vec![parent, child]));
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].name, "code-review");
        assert_eq!(resolved[0].submittability_expression.as_deref(), Some("is:true"));
        assert_eq!(resolved[1].name, "Verified");
        assert_eq!(resolved[1].submittability_expression.as_deref(), Some("is:false"));
    }

    #[test]
    fn test_global_requirement_without_override_wins() {
        let globals = vec![SubmitRequirement::new("No-Unresolved", "-has:unresolved")];
        let project = ProjectConfig::new("app")
            .with_requirement(SubmitRequirement::new("No-Unresolved", "is:true"));

        let resolved = resolve_requirements(&globals, &single(project));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].submittability_expression.as_deref(), Some("-has:unresolved"));
    }

    #[test]
    fn test_incomplete_requirement_is_excluded() {
        let mut incomplete = SubmitRequirement::new("Broken", "is:true").with_override("is:true");
        incomplete.submittability_expression = None;
        let resolved = resolve_requirements(&[], &single(ProjectConfig::new("app").with_requirement(incomplete)));
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_is_submittable_reports_error() {
        let fx = Fixture::new();
        let project = ProjectConfig::new("app")
            .with_requirement(SubmitRequirement::new("Loop", "is:submittable").with_override("is:true"));

        let results = fx.evaluate(&single(project), false);
        assert_eq!(results[0].status, SubmitRequirementStatus::Error);
        let sub = results[0].submittability_expression_result.as_ref().unwrap();
        assert_eq!(
            sub.error_message.as_deref(),
            Some("Operator 'is:submittable' cannot be used in submit requirement expressions.")
        );
        assert!(results[0].override_expression_result.is_none());
    }

    #[test]
    fn test_legacy_result_dropped_when_statuses_match() {
        let mut fx = Fixture::new();
        fx.vote(2, 2);
        let project = ProjectConfig::new("app")
            .with_label(LabelType::code_review())
            .with_requirement(SubmitRequirement::new(
                "Code-Review",
                "label:Code-Review=MAX AND -label:Code-Review=MIN",
            ));

        let results = fx.evaluate(&single(project), true);
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_legacy);
    }

    #[test]
    fn test_legacy_result_kept_when_statuses_differ() {
        let mut fx = Fixture::new();
        fx.vote(2, 2);
        let project = ProjectConfig::new("app")
            .with_label(LabelType::code_review())
            .with_requirement(SubmitRequirement::new("Code-Review", "is:false"));

        let results = fx.evaluate(&single(project), true);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, SubmitRequirementStatus::Unsatisfied);
        assert!(!results[0].is_legacy);
        assert_eq!(results[1].status, SubmitRequirementStatus::Satisfied);
        assert!(results[1].is_legacy);
    }

    #[test]
    fn test_legacy_disabled_and_non_gating_labels() {
        let fx = Fixture::new();
        let project = ProjectConfig::new("app")
            .with_label(LabelType::code_review())
            .with_label(LabelType::with_range("Trivial", LabelFunction::NoBlock, -1, 1));

        assert!(fx.evaluate(&single(project.clone()), false).is_empty());
        let results = fx.evaluate(&single(project), true);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name(), "Code-Review");
    }

    #[test]
    fn test_forced_change_reports_forced() {
        let mut fx = Fixture::new();
        fx.notes.change.submitted_bypassing_requirements = true;
        let project = ProjectConfig::new("app")
            .with_requirement(SubmitRequirement::new("Code-Review", "label:Code-Review=MAX"));

        let results = fx.evaluate(&single(project), false);
        assert_eq!(results[0].status, SubmitRequirementStatus::Forced);
    }

    #[test]
    fn test_check_requirement_requires_submittability() {
        let fx = Fixture::new();
        let evaluator = SubmitRequirementsEvaluator::new(&fx.git, &fx.directory, &fx.registry, true);
        let hierarchy = single(ProjectConfig::new("app"));

        let mut ad_hoc = SubmitRequirement::new("Ad-Hoc", "project:app");
        let result = evaluator.check_requirement(&fx.notes, &hierarchy, &ad_hoc).unwrap();
        assert_eq!(result.status, SubmitRequirementStatus::Satisfied);

        ad_hoc.submittability_expression = None;
        let err = evaluator.check_requirement(&fx.notes, &hierarchy, &ad_hoc).unwrap_err();
        assert!(matches!(err, ReviewError::BadRequest { .. }));
    }

    #[test]
    fn test_uploader_is_contributor() {
        let mut fx = Fixture::new();
        fx.vote(1, 2);
        let project = ProjectConfig::new("app")
            .with_label(LabelType::code_review())
            .with_requirement(SubmitRequirement::new(
                "Code-Review",
                "label:Code-Review=MAX,user=non_contributor",
            ));
        let results = fx.evaluate(&single(project), false);
        assert_eq!(results[0].status, SubmitRequirementStatus::Unsatisfied);
    }
}
