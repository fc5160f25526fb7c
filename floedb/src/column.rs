//! Schema columns and the per-type value validators.

use std::fmt;

use error::{ErrorKind, Result};
use value::{Number, Value};

/// Logical column types.
///
/// Each variant carries its own validation rules, so constraint and value
/// checking dispatches on this enum instead of a tower of validator
/// objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
	/// 32-bit integer or 64-bit float, chosen per value.
	Number,
	/// Length-prefixed UTF-8 string.
	Str,
	/// Calendar date, fixed ten bytes on disk.
	Date,
}

impl ColumnType {
	/// Parses a type name as written in `CREATE TABLE`.
	pub fn from_name(name: &str) -> Result<ColumnType> {
		match name {
			"number" => Ok(ColumnType::Number),
			"string" => Ok(ColumnType::Str),
			"date" => Ok(ColumnType::Date),
			other => Err(ErrorKind::Value(format!("{} is not a valid column type!", other)).into()),
		}
	}

	/// The name used in metadata files and messages.
	pub fn name(&self) -> &'static str {
		match *self {
			ColumnType::Number => "number",
			ColumnType::Str => "string",
			ColumnType::Date => "date",
		}
	}

	/// Upper bound applied when no `MAX_SIZE` constraint is given.
	///
	/// For numbers the bound limits the magnitude of the value, for
	/// strings the byte length. Dates are always exactly ten bytes.
	fn default_max(&self) -> i64 {
		match *self {
			ColumnType::Number => 2_147_483_647,
			ColumnType::Str => 255,
			ColumnType::Date => 10,
		}
	}

	fn validate_type(&self, value: &Value) -> Result<()> {
		match (*self, value) {
			(ColumnType::Number, &Value::Number(_)) => Ok(()),
			(ColumnType::Date, &Value::Date(_)) => Ok(()),
			(ColumnType::Str, &Value::Str(ref s)) => {
				if s.trim().is_empty() {
					bail!(ErrorKind::Value("Value cannot be empty!".into()));
				}
				Ok(())
			},
			_ => Err(ErrorKind::Value(
				format!("Value has to be of type '{}'!", self.name())
			).into()),
		}
	}

	fn validate_size(&self, value: &Value, max_size: i64) -> Result<()> {
		match (*self, value) {
			(ColumnType::Number, &Value::Number(ref n)) => {
				if n.as_f64() > max_size as f64 {
					bail!(ErrorKind::Value(format!("Value cannot exceed {}!", max_size)));
				}
				Ok(())
			},
			(ColumnType::Str, &Value::Str(ref s)) => {
				if s.len() as i64 > max_size {
					bail!(ErrorKind::Value(
						format!("Value has to be less than {} characters!", max_size)
					));
				}
				Ok(())
			},
			// a parsed date is ten bytes by construction
			(ColumnType::Date, &Value::Date(_)) => Ok(()),
			_ => Err(ErrorKind::Value(
				format!("Value has to be of type '{}'!", self.name())
			).into()),
		}
	}

	/// Validates a `MAX_SIZE` constraint literal and returns the bound.
	fn validate_max_size(&self, given: Option<&Value>) -> Result<i64> {
		let given = match given {
			None => return Ok(self.default_max()),
			Some(value) => value,
		};

		let size = match *given {
			Value::Number(Number::Int(v)) => v as i64,
			_ => bail!(ErrorKind::Value("MAX_SIZE has to be an integer!".into())),
		};

		match *self {
			ColumnType::Number => {
				if size <= 0 || size > self.default_max() {
					bail!(ErrorKind::Value(
						format!("Value cannot exceed {}!", self.default_max())
					));
				}
				Ok(size)
			},
			ColumnType::Str => {
				if size <= 0 {
					bail!(ErrorKind::Value("MAX_SIZE has to be positive!".into()));
				}
				Ok(size)
			},
			ColumnType::Date => {
				if size == self.default_max() {
					Ok(size)
				} else {
					Err(ErrorKind::Value("Cannot set a max size to 'date' type!".into()).into())
				}
			},
		}
	}

	/// Validates a `DEFAULT` constraint literal against the column type.
	fn validate_default(&self, given: Option<&Value>, max_size: i64) -> Result<Option<Value>> {
		match given {
			None => Ok(None),
			Some(value) => {
				self.validate_type(value)?;
				self.validate_size(value, max_size)?;
				Ok(Some(value.clone()))
			},
		}
	}
}

impl fmt::Display for ColumnType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.name())
	}
}

/// A single schema column: name, logical type and constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
	/// Column name as declared in `CREATE TABLE`.
	pub name: String,
	/// Logical type of every value in the column.
	pub column_type: ColumnType,
	/// `MAX_SIZE` bound (value magnitude for numbers, byte length for
	/// strings, fixed 10 for dates).
	pub max_size: i64,
	/// `DEFAULT` value used when an insert omits the column.
	pub default: Option<Value>,
}

impl Column {
	/// Builds a column, validating the constraint literals against the
	/// column type.
	pub fn new(
		name: &str,
		column_type: ColumnType,
		max_size: Option<&Value>,
		default: Option<&Value>,
	) -> Result<Column> {
		let max_size = column_type.validate_max_size(max_size)?;
		let default = column_type.validate_default(default, max_size)?;

		Ok(Column {
			name: name.to_string(),
			column_type,
			max_size,
			default,
		})
	}

	/// Checks a cell value against the column type and `MAX_SIZE` bound.
	pub fn validate_value(&self, value: &Value) -> Result<()> {
		self.column_type.validate_type(value)?;
		self.column_type.validate_size(value, self.max_size)
	}
}
