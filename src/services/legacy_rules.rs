//! Submit requirements synthesized from label functions.

use crate::models::{
    AccountId, ExpressionResult, LabelFunction, LabelType, PatchSetApproval, SubmitRequirement,
    SubmitRequirementResult,
};

/// Label status under its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStatus {
    /// Requirement met.
    Ok,
    /// Highest value still needed.
    Need,
    /// Blocked by the lowest value.
    Reject,
    /// Label does not gate submission.
    May,
}

/// Compute the status of one label from the current patch set's votes.
///
/// When the label ignores self approval, the uploader's vote does not count
/// towards the highest value; it still blocks.
pub fn label_status(label: &LabelType, votes: &[&PatchSetApproval], uploader: AccountId) -> LabelStatus {
    let votes: Vec<&PatchSetApproval> = votes
        .iter()
        .copied()
        .filter(|a| a.label.eq_ignore_ascii_case(&label.name) && a.value != 0)
        .collect();
    let blocked = votes.iter().any(|a| label.is_max_negative(a.value));
    let approved = votes.iter().any(|a| {
        label.is_max_positive(a.value) && !(label.ignore_self_approval && a.account_id == uploader)
    });

    match label.function {
        LabelFunction::MaxWithBlock if blocked => LabelStatus::Reject,
        LabelFunction::MaxWithBlock | LabelFunction::MaxNoBlock if approved => LabelStatus::Ok,
        LabelFunction::MaxWithBlock | LabelFunction::MaxNoBlock => LabelStatus::Need,
        LabelFunction::AnyWithBlock if blocked => LabelStatus::Reject,
        LabelFunction::AnyWithBlock => LabelStatus::Ok,
        LabelFunction::NoBlock | LabelFunction::NoOp | LabelFunction::PatchSetLock => LabelStatus::May,
    }
}

fn max_atom(label: &LabelType) -> String {
    format!("label:{}=MAX", label.name)
}

fn min_atom(label: &LabelType) -> String {
    format!("label:{}=MIN", label.name)
}

/// The requirement a label function translates to, if it gates submission.
pub fn legacy_requirement(label: &LabelType) -> Option<SubmitRequirement> {
    let submittability = match label.function {
        LabelFunction::MaxWithBlock => format!("{} AND -{}", max_atom(label), min_atom(label)),
        LabelFunction::AnyWithBlock => format!("-{}", min_atom(label)),
        LabelFunction::MaxNoBlock => max_atom(label),
        LabelFunction::NoBlock | LabelFunction::NoOp | LabelFunction::PatchSetLock => return None,
    };
    Some(SubmitRequirement {
        name: label.name.clone(),
        description: Some(format!(
            "Submit requirement for the '{}' label, auto-converted from the label function {}",
            label.name, label.function
        )),
        applicability_expression: None,
        submittability_expression: Some(submittability),
        override_expression: None,
        allow_override_in_child_projects: true,
    })
}

/// Evaluate a label function as a legacy submit requirement result.
pub fn evaluate_legacy(
    label: &LabelType,
    votes: &[&PatchSetApproval],
    uploader: AccountId,
    forced: bool,
) -> Option<SubmitRequirementResult> {
    let requirement = legacy_requirement(label)?;
    let status = label_status(label, votes, uploader);

    let has_min = votes
        .iter()
        .any(|a| a.label.eq_ignore_ascii_case(&label.name) && label.is_max_negative(a.value));
    let has_max = votes.iter().any(|a| {
        a.label.eq_ignore_ascii_case(&label.name)
            && label.is_max_positive(a.value)
            && !(label.ignore_self_approval && a.account_id == uploader)
    });

    let mut passing = Vec::new();
    let mut failing = Vec::new();
    if label.function.is_required() {
        if has_max {
            passing.push(max_atom(label));
        } else {
            failing.push(max_atom(label));
        }
    }
    if label.function.is_block() {
        if has_min {
            passing.push(min_atom(label));
        } else {
            failing.push(min_atom(label));
        }
    }

    let expression = requirement.submittability_expression.clone().unwrap_or_default();
    let submittability = ExpressionResult::new(expression, status == LabelStatus::Ok, passing, failing);
    Some(SubmitRequirementResult::new(
        requirement,
        None,
        Some(submittability),
        None,
        true,
        forced,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeId, PatchSetId, SubmitRequirementStatus};
    use chrono::Utc;

    fn vote(account: i64, value: i16) -> PatchSetApproval {
        PatchSetApproval::new(
            PatchSetId::new(ChangeId(1), 1),
            "Code-Review",
            AccountId(account),
            value,
            Utc::now(),
        )
    }

    #[test]
    fn test_max_with_block() {
        let label = LabelType::code_review();
        let approve = vote(2, 2);
        let block = vote(3, -2);
        assert_eq!(label_status(&label, &[], AccountId(1)), LabelStatus::Need);
        assert_eq!(label_status(&label, &[&approve], AccountId(1)), LabelStatus::Ok);
        assert_eq!(label_status(&label, &[&approve, &block], AccountId(1)), LabelStatus::Reject);
    }

    #[test]
    fn test_self_approval_ignored_when_configured() {
        let mut label = LabelType::code_review();
        label.ignore_self_approval = true;
        let own = vote(1, 2);
        assert_eq!(label_status(&label, &[&own], AccountId(1)), LabelStatus::Need);
        assert_eq!(label_status(&label, &[&own], AccountId(9)), LabelStatus::Ok);
    }

    #[test]
    fn test_non_gating_functions_have_no_requirement() {
        let label = LabelType::with_range("Trivial", LabelFunction::NoBlock, -1, 1);
        assert!(legacy_requirement(&label).is_none());
        assert!(evaluate_legacy(&label, &[], AccountId(1), false).is_none());
    }

    #[test]
    fn test_legacy_result_atoms() {
        let label = LabelType::code_review();
        let approve = vote(2, 2);
        let result = evaluate_legacy(&label, &[&approve], AccountId(1), false).unwrap();
        assert!(result.is_legacy);
        assert_eq!(result.status, SubmitRequirementStatus::Satisfied);
        let sub = result.submittability_expression_result.unwrap();
        assert_eq!(sub.expression, "label:Code-Review=MAX AND -label:Code-Review=MIN");
        assert_eq!(sub.passing_atoms, vec!["label:Code-Review=MAX".to_string()]);
        assert_eq!(sub.failing_atoms, vec!["label:Code-Review=MIN".to_string()]);

        let unsatisfied = evaluate_legacy(&label, &[], AccountId(1), false).unwrap();
        assert_eq!(unsatisfied.status, SubmitRequirementStatus::Unsatisfied);
    }
}
