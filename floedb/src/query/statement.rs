//! Parsed statements and their execution.

use std::path::Path;

use indexmap::IndexMap;
use rand::Rng;

use column::{Column, ColumnType};
use database::Options;
use date::Date;
use error::{ErrorKind, Result};
use merge_sort::SortOrder;
use query::expression::Expr;
use row::Row;
use table::{Table, TableInfo};
use value::{Number, Value};

/// A column definition from `CREATE TABLE`, constraints still raw.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
	/// Column name.
	pub name: String,
	/// Type name as written (`number`, `string`, `date`).
	pub col_type: String,
	/// Constraint table (`DEFAULT`, `MAX_SIZE`) with literal values.
	pub constraints: IndexMap<String, Value>,
}

impl ColumnDef {
	fn extract_column(&self) -> Result<Column> {
		let column_type = ColumnType::from_name(&self.col_type)?;
		Column::new(
			&self.name,
			column_type,
			self.constraints.get("MAX_SIZE"),
			self.constraints.get("DEFAULT"),
		)
	}
}

/// `ORDER BY` clause of a `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
	/// Column to order by; must be part of the projection.
	pub column: String,
	/// Direction, ascending when not spelled out.
	pub order: SortOrder,
}

/// A lazily evaluated row stream handed back to the caller.
pub type Rows = Box<Iterator<Item = Result<Row>>>;

/// Outcome descriptor of one executed statement.
pub struct QueryResult {
	/// Human-readable status line.
	pub message: String,
	/// Handle of the touched table, when one survives the statement.
	pub table: Option<Table>,
	/// Lazy row stream for `GET` and `SELECT`.
	pub rows: Option<Rows>,
	/// Projected columns accompanying `rows`.
	pub columns: Option<IndexMap<String, Column>>,
	/// Structured summary for `TABLEINFO`.
	pub tableinfo: Option<TableInfo>,
	/// True when the table catalog changed and the host should refresh.
	pub table_action: bool,
}

impl ::std::fmt::Debug for QueryResult {
	fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
		f.debug_struct("QueryResult")
			.field("message", &self.message)
			.field("table", &self.table)
			.field("rows", &self.rows.as_ref().map(|_| "<rows>"))
			.field("columns", &self.columns)
			.field("tableinfo", &self.tableinfo)
			.field("table_action", &self.table_action)
			.finish()
	}
}

impl QueryResult {
	fn message(message: String) -> QueryResult {
		QueryResult {
			message,
			table: None,
			rows: None,
			columns: None,
			tableinfo: None,
			table_action: false,
		}
	}
}

/// One parsed statement, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
	CreateTable { table_name: String, columns: Vec<ColumnDef> },
	CreateIndex { index_name: String, table_name: String, column_name: String },
	DropTable { table_name: String },
	DropIndex { index_name: String, table_name: String },
	TableInfo { table_name: String },
	InsertValues { table_name: String, rows: Vec<Row> },
	InsertRandom { table_name: String, columns: Vec<String>, count: i64 },
	GetRows { table_name: String, row_numbers: Vec<i64> },
	DeleteRows { table_name: String, row_numbers: Vec<i64> },
	DeleteWhere { table_name: String, where_expr: Expr },
	Select {
		columns: Vec<String>,
		table_name: String,
		distinct: bool,
		where_expr: Option<Expr>,
		order_by: Option<OrderBy>,
	},
	Defragment { table_name: String },
}

impl Statement {
	/// Executes the statement against the database rooted at `root`.
	pub fn execute(self, root: &Path, options: &Options) -> Result<QueryResult> {
		match self {
			Statement::CreateTable { table_name, columns } => {
				let mut extracted = Vec::with_capacity(columns.len());
				for def in &columns {
					extracted.push(def.extract_column()?);
				}
				Table::create(root, &table_name, extracted)?;

				let mut result = QueryResult::message(
					format!("Successfully created table with name: {}", table_name)
				);
				result.table_action = true;
				Ok(result)
			},
			Statement::DropTable { table_name } => {
				let table = Table::open(root, &table_name)?;
				table.drop_table()?;

				let mut result = QueryResult::message(
					format!("Successfully dropped table with name: {}", table_name)
				);
				result.table_action = true;
				Ok(result)
			},
			Statement::CreateIndex { index_name, table_name, column_name } => {
				let mut table = Table::open(root, &table_name)?;
				table.create_index(&index_name, &column_name)?;

				let mut result = QueryResult::message(
					format!("Successfully created index {} for {}", index_name, table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::DropIndex { index_name, table_name } => {
				let mut table = Table::open(root, &table_name)?;
				table.drop_index(&index_name)?;

				let mut result = QueryResult::message(
					format!("Successfully dropped index {} for {}", index_name, table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::TableInfo { table_name } => {
				let table = Table::open(root, &table_name)?;
				let tableinfo = table.tableinfo()?;

				let mut result = QueryResult::message(
					format!("Successfully retrieved tableinfo of {}", table_name)
				);
				result.tableinfo = Some(tableinfo);
				result.table = Some(table);
				Ok(result)
			},
			Statement::InsertValues { table_name, rows } => {
				let mut table = Table::open(root, &table_name)?;
				for row in rows {
					table.insert(row)?;
				}

				let mut result = QueryResult::message(
					format!("Successfully inserted values in {}", table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::InsertRandom { table_name, columns, count } => {
				let mut table = Table::open(root, &table_name)?;

				let mut picked = Vec::with_capacity(columns.len());
				for name in &columns {
					let column = table.metadata.column(name).cloned().ok_or_else(|| {
						ErrorKind::Parse(format!("Unknown column '{}'", name))
					})?;
					picked.push(column);
				}

				for _ in 0..count {
					table.insert(random_row(&picked))?;
				}

				let mut result = QueryResult::message(
					format!("Successfully inserted random values in {}", table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::GetRows { table_name, row_numbers } => {
				let table = Table::open(root, &table_name)?;
				let columns: IndexMap<String, Column> = table.metadata.columns.iter()
					.map(|c| (c.name.clone(), c.clone()))
					.collect();
				let rows = table.get_rows(row_numbers);

				let mut result = QueryResult::message(
					format!("Successfully got rows from {}", table_name)
				);
				result.rows = Some(Box::new(rows));
				result.columns = Some(columns);
				result.table = Some(Table::open(root, &table_name)?);
				Ok(result)
			},
			Statement::DeleteRows { table_name, row_numbers } => {
				let mut table = Table::open(root, &table_name)?;
				table.delete_rows(row_numbers)?;

				let mut result = QueryResult::message(
					format!("Successfully deleted rows from {}", table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::DeleteWhere { table_name, where_expr } => {
				let mut table = Table::open(root, &table_name)?;
				table.delete_filtered(&where_expr)?;

				let mut result = QueryResult::message(
					format!("Successfully deleted rows from {}", table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
			Statement::Select { columns, table_name, distinct, where_expr, order_by } => {
				let table = Table::open(root, &table_name)?;

				let projected = projection(&table, &columns)?;

				if let Some(ref order_by) = order_by {
					if !projected.contains_key(&order_by.column) {
						bail!(ErrorKind::Parse("Invalid ORDER BY column!".into()));
					}
				}

				let order = order_by.map(|o| (o.column, o.order));
				let rows = table.select(
					projected.clone(),
					where_expr,
					distinct,
					order,
					options.sort_chunk_size,
				)?;

				let mut result = QueryResult::message(
					format!("Successfully selected rows from {}", table_name)
				);
				result.rows = Some(rows);
				result.columns = Some(projected);
				result.table = Some(Table::open(root, &table_name)?);
				Ok(result)
			},
			Statement::Defragment { table_name } => {
				let mut table = Table::open(root, &table_name)?;
				table.defragment()?;

				let mut result = QueryResult::message(
					format!("Successfully defragmented {}", table_name)
				);
				result.table = Some(table);
				Ok(result)
			},
		}
	}
}

// `*` must be the sole projection; otherwise every name must exist
fn projection(table: &Table, columns: &[String]) -> Result<IndexMap<String, Column>> {
	if columns.len() == 1 && columns[0] == "*" {
		return Ok(table.metadata.columns.iter()
			.map(|c| (c.name.clone(), c.clone()))
			.collect());
	}

	let invalid: Vec<&str> = columns.iter()
		.filter(|name| table.metadata.column(name).is_none())
		.map(|name| name.as_str())
		.collect();
	if !invalid.is_empty() {
		bail!(ErrorKind::Parse(format!("Invalid column names: {}", invalid.join(", "))));
	}

	Ok(table.metadata.columns.iter()
		.filter(|c| columns.contains(&c.name))
		.map(|c| (c.name.clone(), c.clone()))
		.collect())
}

const LETTERS: &'static [u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn random_row(columns: &[Column]) -> Row {
	let mut rng = rand::thread_rng();
	let mut row = Row::with_capacity(columns.len());

	for column in columns {
		let value = match column.column_type {
			ColumnType::Number => {
				if rng.gen::<bool>() {
					Value::Number(Number::Int(rng.gen_range(0..=10_000)))
				} else {
					Value::Number(Number::Float(rng.gen_range(0.0..1000.0)))
				}
			},
			ColumnType::Str => {
				let len = rng.gen_range(1..=column.max_size.max(1) as usize);
				let text: String = (0..len)
					.map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
					.collect();
				Value::Str(text)
			},
			ColumnType::Date => {
				let year = rng.gen_range(1900..=2100);
				let month = rng.gen_range(1..=12);
				let day = rng.gen_range(1..=days_in(month, year));
				Value::Date(Date { day, month, year })
			},
		};
		row.insert(column.name.clone(), value);
	}

	row
}

fn days_in(month: u32, year: u32) -> u32 {
	match month {
		1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
		4 | 6 | 9 | 11 => 30,
		_ => if Date::is_leap_year(year) { 29 } else { 28 },
	}
}
