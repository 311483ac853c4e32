//! Boolean expression language for copy conditions and submit requirements.
//!
//! Both contexts share one parser. Each context maps raw `operator:value`
//! atoms to its own typed atoms, so an atom that makes no sense in a context
//! is a parse error there rather than a silent mismatch.

pub mod approval;
pub mod change;
pub mod parser;

pub use approval::{parse_copy_condition, ApprovalAtom, ApprovalContext, CopyCondition};
pub use change::{parse_change_expression, ChangeAtom, ChangeContext, ChangeExpression};
pub use parser::{parse, Evaluation, Node, QueryParseError, RawAtom};
