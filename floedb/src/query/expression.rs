//! WHERE expression tree and its evaluation over a row.

use std::cmp::Ordering;

use error::{ErrorKind, Result};
use row::Row;
use value::Value;

/// Comparison operator of a `value op value` leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
	Eq,
	Neq,
	Lt,
	Leq,
	Gt,
	Geq,
}

impl CompareOp {
	/// The operator with its operands swapped (`5 < col` is `col > 5`).
	pub fn flipped(&self) -> CompareOp {
		match *self {
			CompareOp::Eq => CompareOp::Eq,
			CompareOp::Neq => CompareOp::Neq,
			CompareOp::Lt => CompareOp::Gt,
			CompareOp::Leq => CompareOp::Geq,
			CompareOp::Gt => CompareOp::Lt,
			CompareOp::Geq => CompareOp::Leq,
		}
	}
}

/// A leaf operand: a column reference or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
	/// Resolves to the row's value for the named column.
	Column(String),
	/// A constant from the statement text.
	Literal(Value),
}

impl Operand {
	fn resolve<'a>(&'a self, row: &'a Row) -> Result<&'a Value> {
		match *self {
			Operand::Column(ref name) => row.get(name).ok_or_else(|| {
				ErrorKind::Parse(format!("Unknown column '{}'", name)).into()
			}),
			Operand::Literal(ref value) => Ok(value),
		}
	}
}

/// A boolean expression over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
	/// `value op value` comparison.
	Compare {
		left: Operand,
		op: CompareOp,
		right: Operand,
	},
	/// Short-circuit conjunction.
	And(Box<Expr>, Box<Expr>),
	/// Short-circuit disjunction.
	Or(Box<Expr>, Box<Expr>),
	/// Negation.
	Not(Box<Expr>),
}

impl Expr {
	/// Evaluates the expression against `row`.
	///
	/// Equality across incompatible types is plain `false` (and `!=` is
	/// `true`); ordering across incompatible types is a parse error.
	pub fn evaluate(&self, row: &Row) -> Result<bool> {
		match *self {
			Expr::And(ref left, ref right) => {
				Ok(left.evaluate(row)? && right.evaluate(row)?)
			},
			Expr::Or(ref left, ref right) => {
				Ok(left.evaluate(row)? || right.evaluate(row)?)
			},
			Expr::Not(ref inner) => Ok(!inner.evaluate(row)?),
			Expr::Compare { ref left, ref op, ref right } => {
				let left = left.resolve(row)?;
				let right = right.resolve(row)?;

				match *op {
					CompareOp::Eq => Ok(left == right),
					CompareOp::Neq => Ok(left != right),
					ordering_op => {
						let ord = left.partial_cmp(right).ok_or_else(|| {
							ErrorKind::Parse("Comparison not valid!".to_string())
						})?;
						Ok(match ordering_op {
							CompareOp::Lt => ord == Ordering::Less,
							CompareOp::Leq => ord != Ordering::Greater,
							CompareOp::Gt => ord == Ordering::Greater,
							CompareOp::Geq => ord != Ordering::Less,
							_ => unreachable!("equality was handled above; qed"),
						})
					},
				}
			},
		}
	}
}
