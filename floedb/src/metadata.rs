//! Per-table metadata file.
//!
//! The metadata is a human-readable, `\n`-terminated text file. The first
//! line stores a checksum over everything that follows, the second the
//! total line count:
//!
//! ```text
//! Hash:<uint32>
//! Total Lines:<N>
//! Title:<table_name>
//! Total Columns:<C>
//! Columns:
//! <col_name>|<type>[|DEFAULT:<literal>][|MAX_SIZE:<n>]
//! Rows:<row_count>
//! Free Slots:<pos>|<len>,<pos>|<len>,...
//! Table End:<offset>
//! Offsets:<first>|<last>
//! Indexes:<K>
//! <col>|<index_name>|<index_path>|<ptrlist_path>
//! ```
//!
//! The file is rewritten after every table mutation; a checksum or line
//! count mismatch on load refuses the whole table.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use column::{Column, ColumnType};
use date::Date;
use error::{ErrorKind, Result};
use hash::{mismatch, polynomial_rolling_hash};
use value::{Number, Value};

/// A reusable hole in the data file left by a deleted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
	/// Offset of the freed record in the data file.
	pub position: i64,
	/// Full serialized length of the freed record, checksum included.
	pub length: i64,
}

/// A secondary index registered on the table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
	/// Column the index is bound to.
	pub column: String,
	/// Index name as given in `CREATE INDEX`.
	pub name: String,
	/// Path of the B-tree node file.
	pub index_path: PathBuf,
	/// Path of the duplicate-pointer-list file.
	pub pointer_list_path: PathBuf,
}

/// In-memory image of a table's metadata file.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
	/// Table name.
	pub table_name: String,
	/// Location of the metadata file itself.
	pub path: PathBuf,
	/// Ordered column list declared at `CREATE TABLE`.
	pub columns: Vec<Column>,
	/// Number of live rows.
	pub rows_count: u64,
	/// Reusable holes in insertion order; consumed first-fit.
	pub free_slots: Vec<FreeSlot>,
	/// One past the last byte ever written to the data file.
	pub table_end: i64,
	/// Offset of the first node of the row list, `-1` when empty.
	pub first_offset: i64,
	/// Offset of the last node of the row list, `-1` when empty.
	pub last_offset: i64,
	/// Secondary indexes keyed by column.
	pub indexes: Vec<IndexEntry>,
}

impl Metadata {
	/// Fresh metadata for a newly created empty table.
	pub fn new<P: AsRef<Path>>(path: P, table_name: &str, columns: Vec<Column>) -> Metadata {
		Metadata {
			table_name: table_name.to_string(),
			path: path.as_ref().to_path_buf(),
			columns,
			rows_count: 0,
			free_slots: Vec::new(),
			table_end: 0,
			first_offset: -1,
			last_offset: -1,
			indexes: Vec::new(),
		}
	}

	/// Looks a column up by name.
	pub fn column(&self, name: &str) -> Option<&Column> {
		self.columns.iter().find(|c| c.name == name)
	}

	/// Looks an index entry up by index name.
	pub fn index_named(&self, name: &str) -> Option<&IndexEntry> {
		self.indexes.iter().find(|i| i.name == name)
	}

	/// Looks an index entry up by the column it is bound to.
	pub fn index_on(&self, column: &str) -> Option<&IndexEntry> {
		self.indexes.iter().find(|i| i.column == column)
	}

	/// Writes the metadata file, checksum first.
	pub fn save(&self) -> Result<()> {
		// ten fixed lines plus one per column and per index
		let total_lines = 10 + self.columns.len() + self.indexes.len();

		let mut body = String::new();
		body.push_str(&format!("Total Lines:{}\n", total_lines));
		body.push_str(&format!("Title:{}\n", self.table_name));
		body.push_str(&format!("Total Columns:{}\n", self.columns.len()));
		body.push_str("Columns:\n");
		for column in &self.columns {
			body.push_str(&format!("{}|{}", column.name, column.column_type));
			if let Some(ref default) = column.default {
				body.push_str(&format!("|DEFAULT:{}", default));
			}
			body.push_str(&format!("|MAX_SIZE:{}\n", column.max_size));
		}
		body.push_str(&format!("Rows:{}\n", self.rows_count));
		let slots: Vec<String> = self.free_slots.iter()
			.map(|s| format!("{}|{}", s.position, s.length))
			.collect();
		body.push_str(&format!("Free Slots:{}\n", slots.join(",")));
		body.push_str(&format!("Table End:{}\n", self.table_end));
		body.push_str(&format!("Offsets:{}|{}\n", self.first_offset, self.last_offset));
		body.push_str(&format!("Indexes:{}\n", self.indexes.len()));
		for index in &self.indexes {
			body.push_str(&format!("{}|{}|{}|{}\n",
				index.column,
				index.name,
				index.index_path.display(),
				index.pointer_list_path.display()));
		}

		let hash_val = polynomial_rolling_hash(body.as_bytes());
		let contents = format!("Hash:{}\n{}", hash_val, body);
		fs::write(&self.path, contents)?;

		Ok(())
	}

	/// Loads and verifies a metadata file.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Metadata> {
		let path = path.as_ref();
		let contents = fs::read_to_string(path)?;

		let newline = contents.find('\n').ok_or_else(|| corrupted(path, "missing hash line"))?;
		let stored_hash = field(&contents[..newline], "Hash:", path)?
			.parse::<u32>()
			.map_err(|_| corrupted(path, "malformed hash line"))?;
		let body = &contents[newline + 1..];

		let computed_hash = polynomial_rolling_hash(body.as_bytes());
		if computed_hash != stored_hash {
			bail!(ErrorKind::Corrupted(path.to_path_buf(), mismatch(computed_hash, stored_hash)));
		}

		let lines: Vec<&str> = body.split('\n').collect();
		let mut cursor = Lines { lines: &lines, pos: 0, path };

		let total_lines = cursor.next("Total Lines:")?
			.parse::<usize>()
			.map_err(|_| corrupted(path, "malformed line count"))?;
		let table_name = cursor.next("Title:")?.to_string();
		let total_columns = cursor.next("Total Columns:")?
			.parse::<usize>()
			.map_err(|_| corrupted(path, "malformed column count"))?;
		cursor.next("Columns:")?;

		let mut columns = Vec::with_capacity(total_columns);
		for _ in 0..total_columns {
			columns.push(parse_column(cursor.raw()?, path)?);
		}

		let rows_count = cursor.next("Rows:")?
			.parse::<u64>()
			.map_err(|_| corrupted(path, "malformed row count"))?;

		let mut free_slots = Vec::new();
		for part in cursor.next("Free Slots:")?.split(',') {
			if part.is_empty() {
				continue;
			}
			let mut halves = part.splitn(2, '|');
			let position = parse_i64(halves.next(), path)?;
			let length = parse_i64(halves.next(), path)?;
			free_slots.push(FreeSlot { position, length });
		}

		let table_end = parse_i64(Some(cursor.next("Table End:")?), path)?;
		let mut offsets = cursor.next("Offsets:")?.splitn(2, '|');
		let first_offset = parse_i64(offsets.next(), path)?;
		let last_offset = parse_i64(offsets.next(), path)?;

		let total_indexes = cursor.next("Indexes:")?
			.parse::<usize>()
			.map_err(|_| corrupted(path, "malformed index count"))?;
		let mut indexes = Vec::with_capacity(total_indexes);
		for _ in 0..total_indexes {
			let line = cursor.raw()?;
			let parts: Vec<&str> = line.split('|').collect();
			if parts.len() != 4 {
				bail!(corrupted(path, "malformed index line"));
			}
			indexes.push(IndexEntry {
				column: parts[0].to_string(),
				name: parts[1].to_string(),
				index_path: PathBuf::from(parts[2]),
				pointer_list_path: PathBuf::from(parts[3]),
			});
		}

		// the hash line plus the body lines (the split leaves a trailing
		// empty element for the final newline)
		if total_lines != lines.len() {
			bail!(corrupted(path, "line count mismatch"));
		}

		Ok(Metadata {
			table_name,
			path: path.to_path_buf(),
			columns,
			rows_count,
			free_slots,
			table_end,
			first_offset,
			last_offset,
			indexes,
		})
	}
}

struct Lines<'a> {
	lines: &'a [&'a str],
	pos: usize,
	path: &'a Path,
}

impl<'a> Lines<'a> {
	fn raw(&mut self) -> Result<&'a str> {
		let line = *self.lines.get(self.pos)
			.ok_or_else(|| corrupted(self.path, "file ends early"))?;
		self.pos += 1;
		Ok(line)
	}

	fn next(&mut self, label: &str) -> Result<&'a str> {
		let line = self.raw()?;
		field(line, label, self.path)
	}
}

fn field<'a>(line: &'a str, label: &str, path: &Path) -> Result<&'a str> {
	if line.starts_with(label) {
		Ok(&line[label.len()..])
	} else {
		Err(corrupted(path, &format!("expected a `{}` line", label)))
	}
}

fn corrupted(path: &Path, msg: &str) -> ::error::Error {
	ErrorKind::Corrupted(path.to_path_buf(), msg.to_string()).into()
}

fn parse_i64(part: Option<&str>, path: &Path) -> Result<i64> {
	part.and_then(|p| p.parse::<i64>().ok())
		.ok_or_else(|| corrupted(path, "malformed offset"))
}

fn parse_column(line: &str, path: &Path) -> Result<Column> {
	let parts: Vec<&str> = line.split('|').collect();
	if parts.len() < 2 {
		bail!(corrupted(path, "malformed column line"));
	}

	let name = parts[0];
	let column_type = ColumnType::from_name(parts[1])
		.map_err(|_| corrupted(path, "unknown column type"))?;

	let mut max_size = None;
	let mut default = None;

	for part in &parts[2..] {
		if part.starts_with("DEFAULT:") {
			default = Some(parse_literal(&part["DEFAULT:".len()..], column_type, path)?);
		} else if part.starts_with("MAX_SIZE:") {
			let size = part["MAX_SIZE:".len()..].parse::<i32>()
				.map_err(|_| corrupted(path, "malformed MAX_SIZE"))?;
			max_size = Some(Value::Number(Number::Int(size)));
		} else {
			bail!(corrupted(path, "unknown column constraint"));
		}
	}

	Column::new(name, column_type, max_size.as_ref(), default.as_ref())
}

fn parse_literal(text: &str, column_type: ColumnType, path: &Path) -> Result<Value> {
	match column_type {
		ColumnType::Number => {
			if let Ok(v) = text.parse::<i32>() {
				Ok(Value::Number(Number::Int(v)))
			} else {
				let v = text.parse::<f64>()
					.map_err(|_| corrupted(path, "malformed numeric default"))?;
				Ok(Value::Number(Number::Float(v)))
			}
		},
		ColumnType::Str => Ok(Value::Str(text.to_string())),
		ColumnType::Date => {
			let date = Date::from_str(text)
				.map_err(|_| corrupted(path, "malformed date default"))?;
			Ok(Value::Date(date))
		},
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use std::fs;
	use self::tempdir::TempDir;
	use column::{Column, ColumnType};
	use error::ErrorKind;
	use value::{Number, Value};
	use super::{FreeSlot, IndexEntry, Metadata};

	fn sample(path: ::std::path::PathBuf) -> Metadata {
		let columns = vec![
			Column::new("id", ColumnType::Number, None, None).unwrap(),
			Column::new(
				"name",
				ColumnType::Str,
				Some(&Value::Number(Number::Int(10))),
				Some(&Value::Str("unknown".into())),
			).unwrap(),
			Column::new("created", ColumnType::Date, None, None).unwrap(),
		];

		let mut metadata = Metadata::new(path, "accounts", columns);
		metadata.rows_count = 3;
		metadata.free_slots.push(FreeSlot { position: 26, length: 30 });
		metadata.free_slots.push(FreeSlot { position: 90, length: 26 });
		metadata.table_end = 120;
		metadata.first_offset = 0;
		metadata.last_offset = 56;
		metadata.indexes.push(IndexEntry {
			column: "id".into(),
			name: "idx_id".into(),
			index_path: "accounts/idx_id_index.index".into(),
			pointer_list_path: "accounts/idx_id_index.data".into(),
		});
		metadata
	}

	#[test]
	fn test_save_load_roundtrip() {
		let temp = TempDir::new("metadata_roundtrip").unwrap();
		let path = temp.path().join("accounts.meta");

		let metadata = sample(path.clone());
		metadata.save().unwrap();

		let loaded = Metadata::load(&path).unwrap();
		assert_eq!(loaded, metadata);
	}

	#[test]
	fn test_empty_free_slots_roundtrip() {
		let temp = TempDir::new("metadata_empty_slots").unwrap();
		let path = temp.path().join("t.meta");

		let columns = vec![Column::new("id", ColumnType::Number, None, None).unwrap()];
		let metadata = Metadata::new(&path, "t", columns);
		metadata.save().unwrap();

		let loaded = Metadata::load(&path).unwrap();
		assert!(loaded.free_slots.is_empty());
		assert_eq!(loaded.first_offset, -1);
		assert_eq!(loaded.last_offset, -1);
	}

	#[test]
	fn should_detect_altered_contents() {
		let temp = TempDir::new("metadata_corruption").unwrap();
		let path = temp.path().join("accounts.meta");

		sample(path.clone()).save().unwrap();

		let contents = fs::read_to_string(&path).unwrap();
		let tampered = contents.replace("Rows:3", "Rows:4");
		fs::write(&path, tampered).unwrap();

		let err = Metadata::load(&path).unwrap_err();
		assert!(matches!(*err.kind(), ErrorKind::Corrupted(_, _)));
	}
}
