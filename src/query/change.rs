//! Change-level atoms used by submit requirement expressions.

use std::collections::BTreeSet;

use crate::models::{AccountId, Change, ChangeStatus, LabelTypes, PatchSet, PatchSetApproval};
use crate::services::directory::AccountDirectory;

use super::parser::{self, Evaluation, Node, QueryParseError, RawAtom};

/// Comparison in a `label:` atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOp {
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl LabelOp {
    fn test(&self, vote: i16, target: i16) -> bool {
        match self {
            Self::Eq => vote == target,
            Self::Ge => vote >= target,
            Self::Le => vote <= target,
            Self::Gt => vote > target,
            Self::Lt => vote < target,
        }
    }
}

/// Value side of a `label:` atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelValueSpec {
    Exact(i16),
    Max,
    Min,
    Any,
}

/// Which voters a `label:` atom considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterFilter {
    All,
    NonUploader,
    NonContributor,
    Account(AccountId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAtom {
    pub label: String,
    pub op: LabelOp,
    pub value: LabelValueSpec,
    pub voter: VoterFilter,
}

impl LabelAtom {
    fn parse(value: &str) -> Result<Self, QueryParseError> {
        let (spec, args) = match value.split_once(',') {
            Some((spec, args)) => (spec, Some(args)),
            None => (value, None),
        };

        let Some(op_start) = spec.find(['=', '<', '>']) else {
            return Err(QueryParseError::new(format!(
                "Invalid label expression '{}': missing comparison",
                value
            )));
        };
        let label = &spec[..op_start];
        let rest = &spec[op_start..];
        let (op, raw_value) = if let Some(v) = rest.strip_prefix(">=") {
            (LabelOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (LabelOp::Le, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (LabelOp::Gt, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (LabelOp::Lt, v)
        } else {
            (LabelOp::Eq, &rest[1..])
        };

        if label.is_empty() {
            return Err(QueryParseError::new(format!("Missing label name in '{}'", value)));
        }

        let value_spec = match raw_value.to_uppercase().as_str() {
            "MAX" => LabelValueSpec::Max,
            "MIN" => LabelValueSpec::Min,
            "ANY" => LabelValueSpec::Any,
            _ => raw_value
                .trim_start_matches('+')
                .parse::<i16>()
                .map(LabelValueSpec::Exact)
                .map_err(|_| {
                    QueryParseError::new(format!("Invalid label value '{}' in '{}'", raw_value, value))
                })?,
        };

        let voter = match args {
            None => VoterFilter::All,
            Some(args) => {
                let Some(who) = args.strip_prefix("user=") else {
                    return Err(QueryParseError::new(format!(
                        "Unsupported label argument '{}'",
                        args
                    )));
                };
                match who {
                    "non_uploader" => VoterFilter::NonUploader,
                    "non_contributor" => VoterFilter::NonContributor,
                    id => id.parse::<i64>().map(|n| VoterFilter::Account(AccountId(n))).map_err(
                        |_| QueryParseError::new(format!("Unsupported user in label atom: {}", id)),
                    )?,
                }
            }
        };

        Ok(Self {
            label: label.to_string(),
            op,
            value: value_spec,
            voter,
        })
    }
}

/// `status:` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Open,
    Merged,
    Abandoned,
    Closed,
}

/// An atom allowed in a submit requirement expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAtom {
    Label(LabelAtom),
    OwnerIn(String),
    UploaderIn(String),
    Project(String),
    Branch(String),
    Topic(String),
    Status(StatusFilter),
    IsPrivate,
    IsWip,
    HasUnresolved,
    Constant(bool),
}

impl ChangeAtom {
    fn from_raw(raw: RawAtom, text: &str) -> Result<Self, QueryParseError> {
        let value = raw.value;
        match raw.operator.as_str() {
            "label" => LabelAtom::parse(&value).map(Self::Label),
            "ownerin" => Ok(Self::OwnerIn(value)),
            "uploaderin" => Ok(Self::UploaderIn(value)),
            "project" => Ok(Self::Project(value)),
            "branch" => Ok(Self::Branch(value)),
            "topic" => Ok(Self::Topic(value)),
            "status" => match value.to_lowercase().as_str() {
                "open" | "new" => Ok(Self::Status(StatusFilter::Open)),
                "merged" => Ok(Self::Status(StatusFilter::Merged)),
                "abandoned" => Ok(Self::Status(StatusFilter::Abandoned)),
                "closed" => Ok(Self::Status(StatusFilter::Closed)),
                _ => Err(QueryParseError::new(format!("Unsupported status: {}", value))),
            },
            "is" => match value.to_lowercase().as_str() {
                "submittable" => Err(QueryParseError::new(format!(
                    "Operator '{}' cannot be used in submit requirement expressions.",
                    text
                ))),
                "private" => Ok(Self::IsPrivate),
                "wip" => Ok(Self::IsWip),
                "open" => Ok(Self::Status(StatusFilter::Open)),
                "merged" => Ok(Self::Status(StatusFilter::Merged)),
                "abandoned" => Ok(Self::Status(StatusFilter::Abandoned)),
                "closed" => Ok(Self::Status(StatusFilter::Closed)),
                "true" => Ok(Self::Constant(true)),
                "false" => Ok(Self::Constant(false)),
                _ => Err(QueryParseError::new(format!("Unsupported operand: {}", text))),
            },
            "has" if value == "unresolved" => Ok(Self::HasUnresolved),
            _ => Err(QueryParseError::new(format!("Unsupported operator: {}", text))),
        }
    }
}

/// A parsed submit requirement expression.
pub type ChangeExpression = Node<ChangeAtom>;

/// Parse a submit requirement expression.
pub fn parse_change_expression(expression: &str) -> Result<ChangeExpression, QueryParseError> {
    parser::parse(expression)?.try_map(&mut |raw, text| ChangeAtom::from_raw(raw, text))
}

/// Snapshot of change state that expressions are evaluated against.
pub struct ChangeContext<'a> {
    pub change: &'a Change,
    pub current_patch_set: &'a PatchSet,

    /// Non-zero approvals on the current patch set, copied ones included.
    pub approvals: Vec<&'a PatchSetApproval>,

    pub label_types: &'a LabelTypes,

    /// Uploader and the accounts matching the commit author and committer.
    pub contributors: BTreeSet<AccountId>,

    pub directory: &'a dyn AccountDirectory,
}

impl ChangeContext<'_> {
    pub fn matches(&self, atom: &ChangeAtom) -> bool {
        match atom {
            ChangeAtom::Label(label) => self.label_matches(label),
            ChangeAtom::OwnerIn(group) => self.directory.is_member(self.change.owner, group),
            ChangeAtom::UploaderIn(group) => {
                self.directory.is_member(self.current_patch_set.uploader, group)
            }
            ChangeAtom::Project(name) => self.change.project == *name,
            ChangeAtom::Branch(name) => {
                self.change.branch == *name || self.change.short_branch() == name
            }
            ChangeAtom::Topic(topic) => self.change.topic.as_deref() == Some(topic.as_str()),
            ChangeAtom::Status(filter) => match filter {
                StatusFilter::Open => self.change.status == ChangeStatus::New,
                StatusFilter::Merged => self.change.status == ChangeStatus::Merged,
                StatusFilter::Abandoned => self.change.status == ChangeStatus::Abandoned,
                StatusFilter::Closed => self.change.status.is_closed(),
            },
            ChangeAtom::IsPrivate => self.change.is_private,
            ChangeAtom::IsWip => self.change.work_in_progress,
            ChangeAtom::HasUnresolved => self.change.unresolved_comment_count > 0,
            ChangeAtom::Constant(b) => *b,
        }
    }

    fn label_matches(&self, atom: &LabelAtom) -> bool {
        let Some(label) = self.label_types.by_label(&atom.label) else {
            return false;
        };

        let votes: Vec<i16> = self
            .approvals
            .iter()
            .filter(|a| a.label.eq_ignore_ascii_case(&label.name) && a.value != 0)
            .filter(|a| match atom.voter {
                VoterFilter::All => true,
                VoterFilter::NonUploader => a.account_id != self.current_patch_set.uploader,
                VoterFilter::NonContributor => !self.contributors.contains(&a.account_id),
                VoterFilter::Account(id) => a.account_id == id,
            })
            .map(|a| a.value)
            .collect();

        let target = match atom.value {
            LabelValueSpec::Any => return !votes.is_empty(),
            LabelValueSpec::Max => label.max_positive(),
            LabelValueSpec::Min => label.max_negative(),
            LabelValueSpec::Exact(v) => v,
        };

        // An absent vote counts as 0.
        if votes.is_empty() {
            return atom.op.test(0, target);
        }
        votes.iter().any(|v| atom.op.test(*v, target))
    }

    pub fn evaluate(&self, expression: &ChangeExpression) -> Evaluation {
        let result: Result<Evaluation, std::convert::Infallible> =
            expression.evaluate(&mut |atom| Ok(self.matches(atom)));
        match result {
            Ok(evaluation) => evaluation,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeId, CommitId, LabelType, PatchSetId};
    use crate::services::directory::InMemoryDirectory;
    use chrono::Utc;

    fn change() -> Change {
        Change {
            id: ChangeId(1),
            project: "app".to_string(),
            branch: "refs/heads/main".to_string(),
            status: ChangeStatus::New,
            owner: AccountId(1),
            subject: "Add feature".to_string(),
            topic: Some("feature".to_string()),
            is_private: false,
            work_in_progress: false,
            current_patch_set: 1,
            unresolved_comment_count: 0,
            submitted_bypassing_requirements: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn patch_set() -> PatchSet {
        PatchSet {
            id: PatchSetId::new(ChangeId(1), 1),
            commit_id: CommitId("abc".to_string()),
            uploader: AccountId(1),
            real_uploader: None,
            created_at: Utc::now(),
        }
    }

    fn vote(account: i64, value: i16) -> PatchSetApproval {
        PatchSetApproval::new(
            PatchSetId::new(ChangeId(1), 1),
            "Code-Review",
            AccountId(account),
            value,
            Utc::now(),
        )
    }

    fn check(expression: &str, votes: &[PatchSetApproval]) -> bool {
        let change = change();
        let ps = patch_set();
        let labels = LabelTypes::new(vec![LabelType::code_review()]);
        let dir = InMemoryDirectory::new();
        let ctx = ChangeContext {
            change: &change,
            current_patch_set: &ps,
            approvals: votes.iter().collect(),
            label_types: &labels,
            contributors: BTreeSet::from([AccountId(1)]),
            directory: &dir,
        };
        ctx.evaluate(&parse_change_expression(expression).unwrap()).matched
    }

    #[test]
    fn test_label_atoms() {
        let votes = [vote(2, 2), vote(3, -1)];
        assert!(check("label:Code-Review=MAX", &votes));
        assert!(check("label:Code-Review=+2", &votes));
        assert!(!check("label:Code-Review=MIN", &votes));
        assert!(check("-label:Code-Review=MIN", &votes));
        assert!(check("label:Code-Review<0", &votes));
        assert!(check("label:Code-Review=ANY", &votes));
        assert!(!check("label:Code-Review=MAX", &[]));
        assert!(check("label:Code-Review=0", &[]));
        assert!(!check("label:Unknown=MAX", &votes));
    }

    #[test]
    fn test_voter_filters() {
        let self_approved = [vote(1, 2)];
        assert!(check("label:Code-Review=MAX", &self_approved));
        assert!(!check("label:Code-Review=MAX,user=non_uploader", &self_approved));
        assert!(!check("label:Code-Review=MAX,user=non_contributor", &self_approved));
        assert!(check("label:Code-Review=MAX,user=1", &self_approved));
    }

    #[test]
    fn test_change_atoms() {
        assert!(check("project:app branch:main", &[]));
        assert!(check("branch:refs/heads/main", &[]));
        assert!(!check("branch:refs/heads/non-existent", &[]));
        assert!(check("topic:feature status:open", &[]));
        assert!(!check("is:private OR is:wip OR has:unresolved", &[]));
        assert!(check("is:true", &[]));
    }

    #[test]
    fn test_is_submittable_is_rejected() {
        let err = parse_change_expression("is:submittable").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operator 'is:submittable' cannot be used in submit requirement expressions."
        );
        assert!(parse_change_expression("is:MAX").is_err());
        assert!(parse_change_expression("label:Code-Review").is_err());
    }
}
