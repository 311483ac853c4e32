//! Copy condition atoms, evaluated for one approval against a new patch set.

use crate::models::{AccountId, ChangeKind, LabelType, PatchSetApproval};
use crate::services::directory::AccountDirectory;

use super::parser::{self, Evaluation, Node, QueryParseError, RawAtom};

/// `is:MIN`, `is:MAX`, `is:ANY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicValue {
    Min,
    Max,
    Any,
}

/// An atom allowed in a label copy condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalAtom {
    Magic(MagicValue),
    Value(i16),
    ChangeKind(ChangeKind),
    ApproverIn(String),
    UploaderIn(String),
    UnchangedFiles,
    Constant(bool),
}

impl ApprovalAtom {
    fn from_raw(raw: RawAtom) -> Result<Self, QueryParseError> {
        let value = raw.value;
        match raw.operator.as_str() {
            "is" => match value.to_uppercase().as_str() {
                "MIN" => Ok(Self::Magic(MagicValue::Min)),
                "MAX" => Ok(Self::Magic(MagicValue::Max)),
                "ANY" => Ok(Self::Magic(MagicValue::Any)),
                "TRUE" => Ok(Self::Constant(true)),
                "FALSE" => Ok(Self::Constant(false)),
                _ => value
                    .trim_start_matches('+')
                    .parse::<i16>()
                    .map(Self::Value)
                    .map_err(|_| QueryParseError::new(format!("Unsupported value for 'is': {}", value))),
            },
            "changekind" => ChangeKind::parse(&value)
                .map(Self::ChangeKind)
                .ok_or_else(|| QueryParseError::new(format!("Unsupported change kind: {}", value))),
            "approverin" => Ok(Self::ApproverIn(value)),
            "uploaderin" => Ok(Self::UploaderIn(value)),
            "has" if value == "unchanged-files" => Ok(Self::UnchangedFiles),
            other => Err(QueryParseError::new(format!(
                "Unsupported operator in copy condition: {}:{}",
                other, value
            ))),
        }
    }

    /// Whether the atom's outcome depends on who voted or uploaded.
    pub fn is_user_dependent(&self) -> bool {
        matches!(self, Self::ApproverIn(_) | Self::UploaderIn(_))
    }
}

/// A parsed copy condition.
pub type CopyCondition = Node<ApprovalAtom>;

/// Parse a copy condition, rejecting atoms not valid for approvals.
pub fn parse_copy_condition(expression: &str) -> Result<CopyCondition, QueryParseError> {
    parser::parse(expression)?.try_map(&mut |raw, _| ApprovalAtom::from_raw(raw))
}

/// Whether a parseable condition mentions approver/uploader groups.
pub fn contains_user_dependent_atom(expression: &str) -> bool {
    parse_copy_condition(expression)
        .map(|c| c.any_atom(&|a: &ApprovalAtom| a.is_user_dependent()))
        .unwrap_or(false)
}

/// Everything a copy condition may look at.
pub struct ApprovalContext<'a> {
    pub approval: &'a PatchSetApproval,
    pub label: &'a LabelType,

    /// Kind of change from the approval's patch set to the target patch set.
    pub change_kind: ChangeKind,

    /// Whether the target patch set commit is a merge.
    pub is_merge: bool,

    pub target_uploader: AccountId,

    /// Whether the target patch set touches the same files as its predecessor.
    pub unchanged_files: bool,

    pub directory: &'a dyn AccountDirectory,
}

impl ApprovalContext<'_> {
    pub fn matches(&self, atom: &ApprovalAtom) -> bool {
        let value = self.approval.value;
        match atom {
            ApprovalAtom::Magic(MagicValue::Min) => self.label.is_max_negative(value),
            ApprovalAtom::Magic(MagicValue::Max) => self.label.is_max_positive(value),
            ApprovalAtom::Magic(MagicValue::Any) => true,
            ApprovalAtom::Value(v) => value == *v,
            ApprovalAtom::ChangeKind(kind) => match self.change_kind {
                // No change at all satisfies every change kind that fits the commit.
                ChangeKind::NoChange => *kind != ChangeKind::MergeFirstParentUpdate || self.is_merge,
                actual => actual == *kind,
            },
            ApprovalAtom::ApproverIn(group) => {
                self.directory.is_member(self.approval.account_id, group)
            }
            ApprovalAtom::UploaderIn(group) => self.directory.is_member(self.target_uploader, group),
            ApprovalAtom::UnchangedFiles => self.unchanged_files,
            ApprovalAtom::Constant(b) => *b,
        }
    }

    pub fn evaluate(&self, condition: &CopyCondition) -> Evaluation {
        let result: Result<Evaluation, std::convert::Infallible> =
            condition.evaluate(&mut |atom| Ok(self.matches(atom)));
        match result {
            Ok(evaluation) => evaluation,
            Err(never) => match never {},
        }
    }
}
