//! Label (voting dimension) configuration.

use serde::{Deserialize, Serialize};

/// Old-style label function used to derive legacy submit requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelFunction {
    MaxWithBlock,
    AnyWithBlock,
    MaxNoBlock,
    NoBlock,
    NoOp,
    PatchSetLock,
}

impl LabelFunction {
    /// Whether the lowest vote blocks submission.
    pub fn is_block(&self) -> bool {
        matches!(self, Self::MaxWithBlock | Self::AnyWithBlock)
    }

    /// Whether the highest vote is needed for submission.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::MaxWithBlock | Self::MaxNoBlock)
    }
}

impl std::fmt::Display for LabelFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MaxWithBlock => "MaxWithBlock",
            Self::AnyWithBlock => "AnyWithBlock",
            Self::MaxNoBlock => "MaxNoBlock",
            Self::NoBlock => "NoBlock",
            Self::NoOp => "NoOp",
            Self::PatchSetLock => "PatchSetLock",
        };
        write!(f, "{}", name)
    }
}

/// One allowed value of a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValue {
    pub value: i16,
    pub text: String,
}

/// A named voting dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelType {
    pub name: String,
    pub function: LabelFunction,

    /// Allowed values, sorted ascending.
    pub values: Vec<LabelValue>,

    #[serde(default)]
    pub default_value: i16,

    /// Expression deciding whether votes survive a new patch set. Absent means never.
    #[serde(default)]
    pub copy_condition: Option<String>,

    /// When it matches, the vote is copied regardless of `copy_condition`.
    #[serde(default)]
    pub copy_enforcement: Option<String>,

    /// When it matches, the vote is not copied regardless of `copy_condition`.
    #[serde(default)]
    pub copy_restriction: Option<String>,

    /// Ignore votes by the current uploader when computing legacy status.
    #[serde(default)]
    pub ignore_self_approval: bool,
}

impl LabelType {
    /// A label allowing every integer value in `min..=max`.
    pub fn with_range(name: impl Into<String>, function: LabelFunction, min: i16, max: i16) -> Self {
        let values = (min..=max)
            .map(|v| LabelValue {
                value: v,
                text: match v.cmp(&0) {
                    std::cmp::Ordering::Equal => "No score".to_string(),
                    _ => format!("{:+}", v),
                },
            })
            .collect();
        Self {
            name: name.into(),
            function,
            values,
            default_value: 0,
            copy_condition: None,
            copy_enforcement: None,
            copy_restriction: None,
            ignore_self_approval: false,
        }
    }

    /// `Code-Review` with -2..+2 and MAX_WITH_BLOCK.
    pub fn code_review() -> Self {
        Self::with_range("Code-Review", LabelFunction::MaxWithBlock, -2, 2)
    }

    /// `Verified` with -1..+1 and MAX_WITH_BLOCK.
    pub fn verified() -> Self {
        Self::with_range("Verified", LabelFunction::MaxWithBlock, -1, 1)
    }

    pub fn with_copy_condition(mut self, condition: impl Into<String>) -> Self {
        self.copy_condition = Some(condition.into());
        self
    }

    pub fn max_positive(&self) -> i16 {
        self.values.iter().map(|v| v.value).max().unwrap_or(0)
    }

    pub fn max_negative(&self) -> i16 {
        self.values.iter().map(|v| v.value).min().unwrap_or(0)
    }

    pub fn is_max_positive(&self, value: i16) -> bool {
        value != 0 && value == self.max_positive()
    }

    pub fn is_max_negative(&self, value: i16) -> bool {
        value != 0 && value == self.max_negative()
    }

    /// Whether `value` is one of the configured values.
    pub fn allows(&self, value: i16) -> bool {
        value == 0 || self.values.iter().any(|v| v.value == value)
    }
}

/// The effective label configuration of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTypes {
    types: Vec<LabelType>,
}

impl LabelTypes {
    pub fn new(types: Vec<LabelType>) -> Self {
        Self { types }
    }

    /// Find a label by name; exact match first, then case-insensitive.
    pub fn by_label(&self, name: &str) -> Option<&LabelType> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .or_else(|| self.types.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelType> {
        self.types.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
