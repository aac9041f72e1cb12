//! Typed condition trees and their evaluation against state records.
//!
//! Conditions written in flow documents (`state.agent_selection.agent_id ==
//! 'tech_support'`) are parsed once at compile time into a [`Predicate`] tree
//! and evaluated many times at runtime. No executable text survives
//! compilation.
//!
//! Evaluation is total over well-formed predicates: every evaluation returns
//! either a boolean or a [`ConditionError::TypeMismatch`]; it never panics
//! and never silently coerces between types.

pub mod parser;

pub use parser::{PredicateParseError, parse_predicate};

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::document::value_type_name;
use crate::state::StateRecord;

/// Comparison operators supported in condition expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled condition expression.
///
/// Stored on edges and human-integration triggers; evaluated against the
/// instance's current [`StateRecord`] at every routing decision.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Trivially true; the compiled form of an unconditional edge.
    Always,
    /// Compare the value at a dotted state path against a literal.
    Compare {
        path: String,
        op: CmpOp,
        value: Value,
    },
    /// True when every sub-predicate is true (`&&`).
    All(Vec<Predicate>),
    /// True when any sub-predicate is true (`||`).
    Any(Vec<Predicate>),
    /// Logical negation (`!`).
    Not(Box<Predicate>),
}

/// Runtime evaluation failures.
#[derive(Debug, Error, Diagnostic)]
pub enum ConditionError {
    /// Operand types disagree in a way the comparison rules reject: a
    /// cross-type scalar comparison, a relational operator over non-orderable
    /// or mixed types, or a list/object operand.
    #[error(
        "type mismatch evaluating `{path} {op} ...`: cannot compare {left} against {right}"
    )]
    #[diagnostic(
        code(harmonyspace::condition::type_mismatch),
        help("Comparisons require scalar operands of the same type; only numbers and strings support <, <=, >, >=.")
    )]
    TypeMismatch {
        path: String,
        op: CmpOp,
        left: &'static str,
        right: &'static str,
    },
}

impl Predicate {
    /// Evaluate against a state record.
    ///
    /// A missing path evaluates as `null`. `null` compared with `==`/`!=`
    /// against anything yields `false`/`true`; every other type pairing
    /// outside the rules is a [`ConditionError::TypeMismatch`].
    pub fn eval(&self, record: &StateRecord) -> Result<bool, ConditionError> {
        match self {
            Self::Always => Ok(true),
            Self::Compare { path, op, value } => {
                let left = record.get_path(path).unwrap_or(&Value::Null);
                compare(path, *op, left, value)
            }
            Self::All(preds) => {
                for pred in preds {
                    if !pred.eval(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(preds) => {
                for pred in preds {
                    if pred.eval(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.eval(record)?),
        }
    }
}

fn compare(path: &str, op: CmpOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    let mismatch = || ConditionError::TypeMismatch {
        path: path.to_string(),
        op,
        left: value_type_name(left),
        right: value_type_name(right),
    };

    // Lists and objects never participate in comparisons.
    if left.is_array() || left.is_object() || right.is_array() || right.is_object() {
        return Err(mismatch());
    }

    // Null equality is defined (null only equals null); everything else
    // involving null or mixed scalar types is rejected for relational
    // operators and resolved structurally for equality.
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => match op {
            CmpOp::Eq => Ok(left.is_null() && right.is_null()),
            CmpOp::Ne => Ok(!(left.is_null() && right.is_null())),
            _ => Err(mismatch()),
        },
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (number_as_f64(a), number_as_f64(b));
            Ok(apply_order(op, a.partial_cmp(&b)))
        }
        (Value::String(a), Value::String(b)) => Ok(apply_order(op, Some(a.cmp(b)))),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(mismatch()),
        },
        // Cross-type scalar pairings are rejected rather than coerced.
        _ => Err(mismatch()),
    }
}

fn number_as_f64(n: &serde_json::Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn apply_order(op: CmpOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match (op, ordering) {
        (CmpOp::Eq, Some(Equal)) => true,
        (CmpOp::Ne, Some(Equal)) => false,
        (CmpOp::Ne, _) => true,
        (CmpOp::Lt, Some(Less)) => true,
        (CmpOp::Le, Some(Less | Equal)) => true,
        (CmpOp::Gt, Some(Greater)) => true,
        (CmpOp::Ge, Some(Greater | Equal)) => true,
        _ => false,
    }
}
