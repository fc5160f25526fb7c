//! Index-aware planning for WHERE filters.
//!
//! The planner walks the expression tree top-down: `AND` intersects the
//! offset sets of its sides, `OR` unions them, and a `col op literal`
//! leaf over an indexed column maps to a B-tree lookup or range scan. If
//! any branch cannot be resolved through an index the whole plan is
//! abandoned and the executor falls back to a full scan.
//!
//! Index streams arrive ordered by key, not by offset, so each leaf is
//! buffer-sorted in chunks which are then merged. Every candidate row is
//! re-checked against the original expression: range endpoints and `!=`
//! may over-match at the boundaries.

use std::collections::VecDeque;

use itertools::{EitherOrBoth, Itertools};

use error::Result;
use index::TableIndex;
use query::expression::{CompareOp, Expr, Operand};
use row::Row;
use sort::binary_insertion_sort;
use table::{ScanRows, Table};
use value::Value;

const SORT_CHUNK: usize = 1000;

/// Rows of `table` matching `expr`, via an index plan when one exists.
/// With no expression at all this is a plain full scan.
pub fn filtered_rows(
	table: Table,
	expr: Option<Expr>,
) -> Result<Box<Iterator<Item = Result<Row>>>> {
	let expr = match expr {
		Some(expr) => expr,
		None => return Ok(Box::new(ScanRows::new(table, None))),
	};

	match plan_offsets(&expr, &table)? {
		Some(offsets) => {
			debug!("index plan produced {} candidate offsets", offsets.len());
			Ok(Box::new(CandidateRows {
				table,
				offsets: offsets.into_iter().collect(),
				expr,
				finished: false,
			}))
		},
		None => {
			debug!("expression is not index-resolvable, falling back to full scan");
			Ok(Box::new(ScanRows::new(table, Some(expr))))
		},
	}
}

// `None` means "no plan": some branch cannot be served by an index
fn plan_offsets(expr: &Expr, table: &Table) -> Result<Option<Vec<i64>>> {
	match *expr {
		Expr::And(ref left, ref right) => {
			match (plan_offsets(left, table)?, plan_offsets(right, table)?) {
				(Some(a), Some(b)) => Ok(Some(intersect(a, b))),
				_ => Ok(None),
			}
		},
		Expr::Or(ref left, ref right) => {
			match (plan_offsets(left, table)?, plan_offsets(right, table)?) {
				(Some(a), Some(b)) => Ok(Some(union(a, b))),
				_ => Ok(None),
			}
		},
		Expr::Compare { ref left, ref op, ref right } => {
			plan_comparison(left, *op, right, table)
		},
		// NOT is left to the residual re-check
		Expr::Not(_) => Ok(None),
	}
}

fn plan_comparison(
	left: &Operand,
	op: CompareOp,
	right: &Operand,
	table: &Table,
) -> Result<Option<Vec<i64>>> {
	let (column, op, literal) = match (left, right) {
		(&Operand::Column(ref column), &Operand::Literal(ref literal)) => (column, op, literal),
		(&Operand::Literal(ref literal), &Operand::Column(ref column)) => {
			(column, op.flipped(), literal)
		},
		_ => return Ok(None),
	};

	let index = match table.index_for_column(column) {
		Some(index) => index,
		None => return Ok(None),
	};

	let offsets = match op {
		CompareOp::Eq => index.search(literal)?.unwrap_or_else(Vec::new),
		CompareOp::Neq => {
			let matching = sorted(index.search(literal)?.unwrap_or_else(Vec::new));
			let all = sorted(drain_range(index, None, None)?);
			return Ok(Some(difference(all, matching)));
		},
		CompareOp::Lt | CompareOp::Leq => drain_range(index, None, Some(literal))?,
		CompareOp::Gt | CompareOp::Geq => drain_range(index, Some(literal), None)?,
	};

	Ok(Some(sorted(offsets)))
}

fn drain_range(
	index: &TableIndex,
	start: Option<&Value>,
	end: Option<&Value>,
) -> Result<Vec<i64>> {
	let mut offsets = Vec::new();
	for pointers in index.range_search(start, end) {
		offsets.extend(pointers?);
	}
	Ok(offsets)
}

// buffer-sort in chunks, then merge the sorted runs
fn sorted(offsets: Vec<i64>) -> Vec<i64> {
	if offsets.len() <= SORT_CHUNK {
		return binary_insertion_sort(offsets, |a, b| a.cmp(b));
	}

	let mut runs = Vec::new();
	let mut rest = offsets;
	while !rest.is_empty() {
		let tail = if rest.len() > SORT_CHUNK {
			rest.split_off(SORT_CHUNK)
		} else {
			Vec::new()
		};
		runs.push(binary_insertion_sort(rest, |a, b| a.cmp(b)));
		rest = tail;
	}

	runs.into_iter().kmerge().collect()
}

fn intersect(a: Vec<i64>, b: Vec<i64>) -> Vec<i64> {
	a.into_iter()
		.merge_join_by(b.into_iter(), |x, y| x.cmp(y))
		.filter_map(|pair| match pair {
			EitherOrBoth::Both(x, _) => Some(x),
			_ => None,
		})
		.collect()
}

fn union(a: Vec<i64>, b: Vec<i64>) -> Vec<i64> {
	a.into_iter()
		.merge_join_by(b.into_iter(), |x, y| x.cmp(y))
		.map(|pair| match pair {
			EitherOrBoth::Both(x, _) => x,
			EitherOrBoth::Left(x) => x,
			EitherOrBoth::Right(y) => y,
		})
		.collect()
}

fn difference(all: Vec<i64>, sub: Vec<i64>) -> Vec<i64> {
	all.into_iter()
		.merge_join_by(sub.into_iter(), |x, y| x.cmp(y))
		.filter_map(|pair| match pair {
			EitherOrBoth::Left(x) => Some(x),
			_ => None,
		})
		.collect()
}

// loads every candidate offset and re-checks the full expression
struct CandidateRows {
	table: Table,
	offsets: VecDeque<i64>,
	expr: Expr,
	finished: bool,
}

impl Iterator for CandidateRows {
	type Item = Result<Row>;

	fn next(&mut self) -> Option<Self::Item> {
		while !self.finished {
			let offset = match self.offsets.pop_front() {
				Some(offset) => offset,
				None => break,
			};

			let node = match self.table.read_node(offset) {
				Ok(node) => node,
				Err(err) => {
					self.finished = true;
					return Some(Err(err));
				},
			};

			match self.expr.evaluate(&node.row_data) {
				Ok(true) => return Some(Ok(node.row_data)),
				Ok(false) => continue,
				Err(err) => {
					self.finished = true;
					return Some(Err(err));
				},
			}
		}

		self.finished = true;
		None
	}
}

#[cfg(test)]
mod tests {
	use super::{difference, intersect, sorted, union};

	#[test]
	fn test_set_operations_on_sorted_streams() {
		assert_eq!(intersect(vec![1, 3, 5, 7], vec![3, 4, 5]), vec![3, 5]);
		assert_eq!(union(vec![1, 3, 5], vec![2, 3, 6]), vec![1, 2, 3, 5, 6]);
		assert_eq!(difference(vec![1, 2, 3, 4], vec![2, 4]), vec![1, 3]);
	}

	#[test]
	fn test_sorted_merges_chunked_runs() {
		let offsets: Vec<i64> = (0..2500).rev().collect();
		assert_eq!(sorted(offsets), (0..2500).collect::<Vec<i64>>());
	}
}
