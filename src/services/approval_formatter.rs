//! Renders copy decisions into change message text.
//!
//! ```text
//! Copied Votes:
//! * Code-Review+2 (copy condition: "**is:MAX**")
//!
//! Outdated Votes:
//! * Verified+1 (copy condition: "changekind:NO_CODE_CHANGE")
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{AccountId, LabelTypes, LabelVote};
use crate::query::approval::{contains_user_dependent_atom, parse_copy_condition};
use crate::services::approval_copier::{
    ApprovalCopierResult, ApprovalData, FollowUpPlan, FollowUpUpdateKind, ForcedRule,
};

/// Footnote appended once when any entry was decided by a forced rule.
pub const FORCED_FOOTNOTE: &str = "\\* The vote was decided by a forced copy rule that takes precedence over the label's copy condition. Only the most relevant condition is shown.";

/// Entries sharing a key are rendered on one bullet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    label_missing: bool,
    condition: Option<String>,
    forced: Option<ForcedRule>,
    non_parseable: bool,
    passing: BTreeSet<String>,
    failing: BTreeSet<String>,
}

/// Voters of each distinct vote on one bullet.
#[derive(Debug, Default)]
struct Group {
    voters: BTreeMap<LabelVote, BTreeSet<AccountId>>,
}

/// Format the votes copied to and outdated on a new patch set.
///
/// Returns `None` when there is nothing to report.
pub fn format_approval_copier_result(
    result: &ApprovalCopierResult,
    label_types: &LabelTypes,
) -> Option<String> {
    if result.is_empty() {
        return None;
    }

    let mut message = String::new();
    let mut any_forced = false;

    if !result.copied_approvals.is_empty() {
        message.push_str("Copied Votes:\n");
        any_forced |= format_section(&mut message, &result.copied_approvals, label_types);
    }
    if !result.outdated_approvals.is_empty() {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str("Outdated Votes:\n");
        any_forced |= format_section(&mut message, &result.outdated_approvals, label_types);
    }
    if any_forced {
        message.push('\n');
        message.push_str(FORCED_FOOTNOTE);
        message.push('\n');
    }

    Some(message)
}

/// Render one section; returns whether any bullet used a forced rule.
fn format_section(out: &mut String, entries: &[ApprovalData], label_types: &LabelTypes) -> bool {
    let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();
    for data in entries {
        let label_missing = label_types.by_label(&data.approval.label).is_none();
        let condition = if label_missing {
            None
        } else {
            data.decisive_condition().map(str::to_string)
        };
        let non_parseable = condition.is_some()
            && (data.non_parseable
                || condition
                    .as_deref()
                    .is_some_and(|c| parse_copy_condition(c).is_err()));
        let key = GroupKey {
            label_missing,
            forced: data.forced.as_ref().map(|f| f.rule),
            non_parseable,
            passing: if non_parseable { BTreeSet::new() } else { data.passing_atoms.clone() },
            failing: if non_parseable { BTreeSet::new() } else { data.failing_atoms.clone() },
            condition,
        };
        let group = groups.entry(key).or_default();
        group
            .voters
            .entry(data.approval.label_vote())
            .or_default()
            .insert(data.approval.account_id);
    }

    let mut bullets: Vec<(LabelVote, String)> = Vec::new();
    let mut any_forced = false;
    for (key, group) in &groups {
        let Some(first) = group.voters.keys().next() else {
            continue;
        };
        let with_voters = !key.label_missing
            && !key.non_parseable
            && key.condition.as_deref().is_some_and(contains_user_dependent_atom);
        let votes: Vec<String> = group
            .voters
            .iter()
            .map(|(vote, accounts)| {
                if with_voters {
                    let accounts: Vec<String> = accounts.iter().map(|a| a.template()).collect();
                    format!("{} by {}", vote, accounts.join(", "))
                } else {
                    vote.to_string()
                }
            })
            .collect();
        let mut line = format!("* {}", votes.join(", "));

        match &key.condition {
            _ if key.label_missing => line.push_str(" (label type is missing)"),
            None => {}
            Some(condition) if key.non_parseable => {
                line.push_str(&format!(" (non-parseable copy condition: \"{}\")", condition));
            }
            Some(condition) => {
                let caption = match key.forced {
                    Some(ForcedRule::Enforcement) => "forced copy condition\\*",
                    Some(ForcedRule::Restriction) => "forced copy restriction\\*",
                    None => "copy condition",
                };
                any_forced |= key.forced.is_some();
                line.push_str(&format!(
                    " ({}: \"{}\")",
                    caption,
                    highlight_condition(condition, &key.passing)
                ));
            }
        }
        line.push('\n');
        bullets.push((first.clone(), line));
    }

    bullets.sort();
    for (_, line) in bullets {
        out.push_str(&line);
    }
    any_forced
}

/// Bold every atom of `condition` that is in `passing`, escaping `*` inside the bold.
pub fn highlight_condition(condition: &str, passing: &BTreeSet<String>) -> String {
    let mut out = String::new();
    let mut token = String::new();
    for c in condition.chars() {
        if c == ' ' || c == '(' || c == ')' {
            out.push_str(&render_token(&token, passing));
            token.clear();
            out.push(c);
        } else {
            token.push(c);
        }
    }
    out.push_str(&render_token(&token, passing));
    out
}

fn render_token(token: &str, passing: &BTreeSet<String>) -> String {
    if token.is_empty() {
        return String::new();
    }
    let (prefix, atom) = match token.strip_prefix('-') {
        Some(rest) if passing.contains(rest) => ("-", rest),
        _ => ("", token),
    };
    if passing.contains(atom) {
        format!("{}**{}**", prefix, atom.replace('*', "\\*"))
    } else {
        format!("{}{}", prefix, atom)
    }
}

/// Notices for voters whose votes became outdated, keyed by voter.
///
/// "Vote got outdated and was removed: X" or "Votes got outdated and were removed: X, Y".
pub fn outdated_vote_notices(result: &ApprovalCopierResult) -> BTreeMap<AccountId, String> {
    let mut by_account: BTreeMap<AccountId, BTreeSet<LabelVote>> = BTreeMap::new();
    for data in &result.outdated_approvals {
        by_account
            .entry(data.approval.account_id)
            .or_default()
            .insert(data.approval.label_vote());
    }

    by_account
        .into_iter()
        .map(|(account, votes)| {
            let rendered: Vec<String> = votes.iter().map(|v| v.to_string()).collect();
            let notice = if rendered.len() == 1 {
                format!("Vote got outdated and was removed: {}", rendered[0])
            } else {
                format!("Votes got outdated and were removed: {}", rendered.join(", "))
            };
            (account, notice)
        })
        .collect()
}

/// Format the updates a vote caused on follow-up patch sets.
///
/// Returns `None` when nothing changed.
pub fn format_follow_up_updates(vote: &LabelVote, plan: &FollowUpPlan) -> Option<String> {
    if plan.is_empty() {
        return None;
    }

    let condition_suffix = plan
        .copy_condition
        .as_ref()
        .map(|c| format!(" (copy condition: \"{}\")", c))
        .unwrap_or_default();

    // Group patch sets by (kind, previous value), in order of first appearance.
    let mut grouped: Vec<(FollowUpUpdateKind, Option<i16>, Vec<i32>)> = Vec::new();
    for update in &plan.updates {
        match grouped
            .iter_mut()
            .find(|(kind, prev, _)| *kind == update.kind && *prev == update.previous_value)
        {
            Some((_, _, patch_sets)) => patch_sets.push(update.patch_set),
            None => grouped.push((update.kind, update.previous_value, vec![update.patch_set])),
        }
    }

    let mut message = String::from("Copied votes on follow-up patch sets have been updated:\n");
    for (kind, previous, patch_sets) in grouped {
        let numbers: Vec<String> = patch_sets.iter().map(|n| n.to_string()).collect();
        let was = previous
            .map(|v| format!(" (was {})", LabelVote::new(&vote.label, v)))
            .unwrap_or_default();
        match kind {
            FollowUpUpdateKind::Copied => message.push_str(&format!(
                "* {} has been copied to patch set {}{}{}.\n",
                vote,
                numbers.join(", "),
                was,
                condition_suffix
            )),
            FollowUpUpdateKind::Removed => {
                let new_vote = if vote.value == 0 {
                    vote.format_with_equals()
                } else {
                    vote.to_string()
                };
                message.push_str(&format!(
                    "* Copied {} vote has been removed from patch set {}{} since the new {} vote is not copyable{}.\n",
                    vote.label,
                    numbers.join(", "),
                    was,
                    new_vote,
                    condition_suffix
                ));
            }
        }
    }

    Some(message.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeId, LabelType, PatchSetApproval, PatchSetId};
    use crate::services::approval_copier::{FollowUpUpdate, ForcedCondition};
    use chrono::Utc;

    fn data(label: &str, account: i64, value: i16, condition: Option<&str>, passing: &[&str], failing: &[&str]) -> ApprovalData {
        ApprovalData {
            approval: PatchSetApproval::new(
                PatchSetId::new(ChangeId(1), 2),
                label,
                AccountId(account),
                value,
                Utc::now(),
            ),
            copy_condition: condition.map(str::to_string),
            forced: None,
            non_parseable: false,
            passing_atoms: passing.iter().map(|s| s.to_string()).collect(),
            failing_atoms: failing.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn labels() -> LabelTypes {
        LabelTypes::new(vec![LabelType::code_review(), LabelType::verified()])
    }

    #[test]
    fn test_empty_result_formats_to_none() {
        assert_eq!(
            format_approval_copier_result(&ApprovalCopierResult::empty(), &labels()),
            None
        );
    }

    #[test]
    fn test_sections_and_bolding() {
        let result = ApprovalCopierResult::create(
            vec![data("Code-Review", 1, 2, Some("is:MAX"), &["is:MAX"], &[])],
            vec![data(
                "Verified",
                2,
                1,
                Some("changekind:TRIVIAL_REBASE is:MAX"),
                &["changekind:TRIVIAL_REBASE"],
                &["is:MAX"],
            )],
        );
        let message = format_approval_copier_result(&result, &labels()).unwrap();
        assert_eq!(
            message,
            "Copied Votes:\n\
             * Code-Review+2 (copy condition: \"**is:MAX**\")\n\
             \n\
             Outdated Votes:\n\
             * Verified+1 (copy condition: \"**changekind:TRIVIAL_REBASE** is:MAX\")\n"
        );
        assert_eq!(format_approval_copier_result(&result, &labels()), Some(message));
    }

    #[test]
    fn test_grouping_sorts_votes_and_splits_on_atoms() {
        let condition = Some("is:MIN OR is:MAX");
        let result = ApprovalCopierResult::create(
            vec![
                data("Code-Review", 1, 2, condition, &["is:MAX"], &["is:MIN"]),
                data("Code-Review", 2, -2, condition, &["is:MIN"], &["is:MAX"]),
                data("Verified", 3, 1, condition, &["is:MAX"], &["is:MIN"]),
            ],
            vec![],
        );
        let message = format_approval_copier_result(&result, &labels()).unwrap();
        assert_eq!(
            message,
            "Copied Votes:\n\
             * Code-Review-2 (copy condition: \"**is:MIN** OR is:MAX\")\n\
             * Code-Review+2, Verified+1 (copy condition: \"is:MIN OR **is:MAX**\")\n"
        );
    }

    #[test]
    fn test_user_dependent_condition_lists_accounts() {
        let condition = Some("approverin:maintainers");
        let result = ApprovalCopierResult::create(
            vec![
                data("Code-Review", 7, 2, condition, &["approverin:maintainers"], &[]),
                data("Code-Review", 5, 2, condition, &["approverin:maintainers"], &[]),
            ],
            vec![],
        );
        let message = format_approval_copier_result(&result, &labels()).unwrap();
        assert_eq!(
            message,
            "Copied Votes:\n* Code-Review+2 by <ACCOUNT_5>, <ACCOUNT_7> (copy condition: \"**approverin:maintainers**\")\n"
        );
    }

    #[test]
    fn test_user_dependent_condition_names_voters_per_vote() {
        let condition = Some("approverin:g");
        let result = ApprovalCopierResult::create(
            vec![
                data("Code-Review", 7, 2, condition, &["approverin:g"], &[]),
                data("Code-Review", 5, 1, condition, &["approverin:g"], &[]),
                data("Code-Review", 3, 2, condition, &["approverin:g"], &[]),
            ],
            vec![],
        );
        let message = format_approval_copier_result(&result, &labels()).unwrap();
        assert_eq!(
            message,
            "Copied Votes:\n* Code-Review+1 by <ACCOUNT_5>, Code-Review+2 by <ACCOUNT_3>, <ACCOUNT_7> \
             (copy condition: \"**approverin:g**\")\n"
        );
    }

    #[test]
    fn test_missing_label_no_condition_and_non_parseable() {
        let result = ApprovalCopierResult::create(
            vec![],
            vec![
                data("Library-Compliance", 1, 1, Some("is:ANY"), &[], &[]),
                data("Verified", 2, 1, None, &[], &[]),
                data("Code-Review", 3, 1, Some("is:MAX OR"), &[], &[]),
            ],
        );
        let message = format_approval_copier_result(&result, &labels()).unwrap();
        assert_eq!(
            message,
            "Outdated Votes:\n\
             * Code-Review+1 (non-parseable copy condition: \"is:MAX OR\")\n\
             * Library-Compliance+1 (label type is missing)\n\
             * Verified+1\n"
        );
    }

    #[test]
    fn test_forced_entries_get_single_footnote() {
        let mut enforced = data("Code-Review", 1, 2, Some("changekind:REWORK"), &["is:MAX"], &[]);
        enforced.forced = Some(ForcedCondition {
            rule: ForcedRule::Enforcement,
            condition: "is:MAX".to_string(),
        });
        let mut restricted = data("Verified", 2, 1, Some("is:ANY"), &["changekind:REWORK"], &[]);
        restricted.forced = Some(ForcedCondition {
            rule: ForcedRule::Restriction,
            condition: "changekind:REWORK".to_string(),
        });

        let message = format_approval_copier_result(
            &ApprovalCopierResult::create(vec![enforced], vec![restricted]),
            &labels(),
        )
        .unwrap();
        assert_eq!(
            message,
            format!(
                "Copied Votes:\n\
                 * Code-Review+2 (forced copy condition\\*: \"**is:MAX**\")\n\
                 \n\
                 Outdated Votes:\n\
                 * Verified+1 (forced copy restriction\\*: \"**changekind:REWORK**\")\n\
                 \n{}\n",
                FORCED_FOOTNOTE
            )
        );
        assert_eq!(message.matches(FORCED_FOOTNOTE).count(), 1);
    }

    #[test]
    fn test_highlight_escapes_and_handles_negation() {
        let passing: BTreeSet<String> = ["is:MAX".to_string()].into_iter().collect();
        assert_eq!(
            highlight_condition("-is:MAX (has:unchanged-files OR is:*)", &passing),
            "-**is:MAX** (has:unchanged-files OR is:*)"
        );

        let passing: BTreeSet<String> = ["is:*".to_string()].into_iter().collect();
        assert_eq!(highlight_condition("is:* OR is:MAX", &passing), "**is:\\*** OR is:MAX");
    }

    #[test]
    fn test_outdated_notices() {
        let result = ApprovalCopierResult::create(
            vec![],
            vec![
                data("Code-Review", 1, 1, None, &[], &[]),
                data("Verified", 1, 1, None, &[], &[]),
                data("Verified", 2, -1, None, &[], &[]),
            ],
        );
        let notices = outdated_vote_notices(&result);
        assert_eq!(
            notices[&AccountId(1)],
            "Votes got outdated and were removed: Code-Review+1, Verified+1"
        );
        assert_eq!(notices[&AccountId(2)], "Vote got outdated and was removed: Verified-1");
    }

    #[test]
    fn test_follow_up_message() {
        let plan = FollowUpPlan {
            upserts: vec![],
            removals: vec![],
            updates: vec![
                FollowUpUpdate { patch_set: 2, kind: FollowUpUpdateKind::Copied, previous_value: Some(1) },
                FollowUpUpdate { patch_set: 3, kind: FollowUpUpdateKind::Copied, previous_value: Some(1) },
                FollowUpUpdate { patch_set: 4, kind: FollowUpUpdateKind::Copied, previous_value: None },
            ],
            copy_condition: Some("is:ANY".to_string()),
        };
        assert_eq!(
            format_follow_up_updates(&LabelVote::new("Code-Review", 2), &plan).unwrap(),
            "Copied votes on follow-up patch sets have been updated:\n\
             * Code-Review+2 has been copied to patch set 2, 3 (was Code-Review+1) (copy condition: \"is:ANY\").\n\
             * Code-Review+2 has been copied to patch set 4 (copy condition: \"is:ANY\")."
        );

        let removal = FollowUpPlan {
            upserts: vec![],
            removals: vec![],
            updates: vec![FollowUpUpdate {
                patch_set: 3,
                kind: FollowUpUpdateKind::Removed,
                previous_value: Some(2),
            }],
            copy_condition: Some("is:MAX".to_string()),
        };
        assert_eq!(
            format_follow_up_updates(&LabelVote::new("Code-Review", 0), &removal).unwrap(),
            "Copied votes on follow-up patch sets have been updated:\n\
             * Copied Code-Review vote has been removed from patch set 3 (was Code-Review+2) since the new Code-Review=0 vote is not copyable (copy condition: \"is:MAX\")."
        );
    }
}
