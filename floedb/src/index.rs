//! Binding of one table column to a persistent B-tree.

use std::fs;
use std::path::{Path, PathBuf};

use btree::{BTree, Key, KeyType, RangeSearch};
use column::{Column, ColumnType};
use date::Date;
use error::{ErrorKind, Result};
use value::Value;

/// Minimum degree used for every index tree in the engine.
const MIN_DEGREE: usize = 3;

/// A secondary index: one column, one B-tree, two files.
///
/// The index holds no reference back to its table; the table drives all
/// index maintenance on insert and delete.
#[derive(Debug, Clone)]
pub struct TableIndex {
	/// Index name as given in `CREATE INDEX`.
	pub name: String,
	/// The indexed column.
	pub column: Column,
	/// Path of the B-tree node file.
	pub index_path: PathBuf,
	/// Path of the pointer-list file.
	pub pointer_list_path: PathBuf,
	tree: BTree,
}

impl TableIndex {
	fn key_type(column: &Column) -> KeyType {
		match column.column_type {
			ColumnType::Number => KeyType::Number,
			ColumnType::Str => KeyType::Str,
			ColumnType::Date => KeyType::Date,
		}
	}

	/// Creates the backing files for a new, empty index.
	pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(
		name: &str,
		column: Column,
		index_path: P,
		pointer_list_path: Q,
	) -> Result<TableIndex> {
		let key_max_size = match column.column_type {
			ColumnType::Str => column.max_size as usize,
			_ => 0,
		};

		let tree = BTree::create(
			MIN_DEGREE,
			Self::key_type(&column),
			key_max_size,
			index_path.as_ref(),
			pointer_list_path.as_ref(),
		)?;

		Ok(TableIndex {
			name: name.to_string(),
			column,
			index_path: index_path.as_ref().to_path_buf(),
			pointer_list_path: pointer_list_path.as_ref().to_path_buf(),
			tree,
		})
	}

	/// Opens an existing index from its two files.
	pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
		name: &str,
		column: Column,
		index_path: P,
		pointer_list_path: Q,
	) -> Result<TableIndex> {
		let tree = BTree::open(index_path.as_ref(), pointer_list_path.as_ref())?;

		Ok(TableIndex {
			name: name.to_string(),
			column,
			index_path: index_path.as_ref().to_path_buf(),
			pointer_list_path: pointer_list_path.as_ref().to_path_buf(),
			tree,
		})
	}

	/// Registers a row's column value at heap offset `pointer`.
	pub fn insert(&mut self, value: &Value, pointer: i64) -> Result<()> {
		self.tree.insert(Key::from_value(value), pointer)
	}

	/// Unregisters a row's column value at heap offset `pointer`.
	pub fn remove(&mut self, value: &Value, pointer: i64) -> Result<()> {
		self.tree.delete_pointer(&Key::from_value(value), pointer)
	}

	/// All heap offsets stored under `value`.
	pub fn search(&self, value: &Value) -> Result<Option<Vec<i64>>> {
		self.tree.search(&Key::from_value(value))
	}

	/// Ordered stream of pointer lists for keys within `[start, end]`.
	/// Open bounds default to the column type's minimum and maximum.
	pub fn range_search(&self, start: Option<&Value>, end: Option<&Value>) -> RangeSearch {
		let (type_min, type_max) = match self.column.column_type {
			ColumnType::Number => (
				Key::Float(::std::f64::NEG_INFINITY),
				Key::Float(::std::f64::INFINITY),
			),
			ColumnType::Str => (
				Key::Str(" ".to_string()),
				Key::Str("~".repeat(self.column.max_size as usize)),
			),
			ColumnType::Date => (
				Key::Date(Date { day: 1, month: 1, year: 1 }),
				Key::Date(Date { day: 31, month: 12, year: 9999 }),
			),
		};

		let lower = start.map(Key::from_value).unwrap_or(type_min);
		let upper = end.map(Key::from_value).unwrap_or(type_max);

		self.tree.range_search(lower, upper)
	}

	/// Removes the two backing files.
	pub fn delete_files(&self) -> Result<()> {
		if !self.index_path.exists() || !self.pointer_list_path.exists() {
			bail!(ErrorKind::Table(
				format!("Index files for index {} missing", self.name)
			));
		}

		fs::remove_file(&self.index_path)?;
		fs::remove_file(&self.pointer_list_path)?;

		Ok(())
	}
}
