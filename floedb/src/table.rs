//! Heap table: a doubly-linked list of variable-length row records.
//!
//! The data file is a sequence of node records addressed by absolute
//! offsets:
//!
//! ```text
//! | cksum | prev | next | row_len | row bytes |
//!    u32    i32    i32     i32      variable
//! ```
//!
//! Nodes link forward and backward; the metadata file tracks the first
//! and last offsets, the live row count, the table end and the free-slot
//! list. Deleting a node unlinks it and registers its byte range for
//! first-fit reuse by later inserts.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use indexmap::IndexMap;

use column::Column;
use error::{ErrorKind, Result};
use hash::{mismatch, polynomial_rolling_hash};
use index::TableIndex;
use merge_sort::{MergeSortHandler, SortOrder, SortedRows};
use metadata::{FreeSlot, IndexEntry, Metadata};
use query::expression::Expr;
use query::planner;
use row::{self, Row};
use sort::binary_insertion_sort;

const CHECKSUM_SIZE: usize = 4;
// prev i32 + next i32 + row_len i32
const NODE_HEADER_SIZE: usize = 12;

/// One heap record loaded into memory.
#[derive(Debug, Clone)]
pub(crate) struct TableNode {
	pub row_data: Row,
	pub position: i64,
	pub previous_position: i64,
	pub next_position: i64,
}

/// Structured metadata summary returned by `TABLEINFO`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
	/// Table name.
	pub table_name: String,
	/// Number of live rows.
	pub rows_count: u64,
	/// Size of the metadata file in bytes.
	pub metadata_file_size: u64,
	/// Size of the data file in bytes.
	pub data_file_size: u64,
	/// Column names with their type names, in declaration order.
	pub columns: Vec<(String, String)>,
	/// Names of the secondary indexes.
	pub indexes: Vec<String>,
}

/// An open heap table.
///
/// The handle exclusively owns its metadata in memory and flushes it to
/// disk after each mutation. Secondary indexes are maintained inline on
/// every insert and delete.
#[derive(Debug)]
pub struct Table {
	name: String,
	dir: PathBuf,
	data_file_path: PathBuf,
	data_file: File,
	/// The table's metadata image; flushed after every mutation.
	pub metadata: Metadata,
	indexes: Vec<TableIndex>,
}

impl Table {
	/// Creates the table directory, an empty data file and the metadata
	/// file. Fails when the table already exists.
	pub fn create<P: AsRef<Path>>(root: P, name: &str, columns: Vec<Column>) -> Result<Table> {
		let dir = root.as_ref().join(name);
		if dir.exists() {
			bail!(ErrorKind::Table(format!("Table {} already exists!", name)));
		}
		fs::create_dir_all(&dir)?;

		let data_file_path = dir.join(format!("{}.data", name));
		File::create(&data_file_path)?;

		let metadata_path = dir.join(format!("{}.meta", name));
		let metadata = Metadata::new(&metadata_path, name, columns);
		metadata.save()?;

		Self::open(root, name)
	}

	/// Opens an existing table, verifying the metadata checksum and
	/// loading every registered index.
	pub fn open<P: AsRef<Path>>(root: P, name: &str) -> Result<Table> {
		let dir = root.as_ref().join(name);
		if !dir.is_dir() {
			bail!(ErrorKind::Table(format!("Table {} does not exist!", name)));
		}

		let metadata_path = dir.join(format!("{}.meta", name));
		if !metadata_path.is_file() {
			bail!(ErrorKind::Table(format!("Meta data of table {} not found!", name)));
		}
		let metadata = Metadata::load(&metadata_path)?;

		let data_file_path = dir.join(format!("{}.data", name));
		let data_file = OpenOptions::new().read(true).write(true).open(&data_file_path)
			.map_err(|_| ErrorKind::Table(format!("Data file of table {} not found!", name)))?;

		let mut indexes = Vec::with_capacity(metadata.indexes.len());
		for entry in &metadata.indexes {
			let column = metadata.column(&entry.column).cloned().ok_or_else(|| {
				ErrorKind::Table(format!(
					"Index {} refers to an unknown column {}", entry.name, entry.column
				))
			})?;
			indexes.push(TableIndex::open(
				&entry.name,
				column,
				&entry.index_path,
				&entry.pointer_list_path,
			)?);
		}

		Ok(Table {
			name: name.to_string(),
			dir,
			data_file_path,
			data_file,
			metadata,
			indexes,
		})
	}

	/// Table name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Path of the heap data file.
	pub fn data_path(&self) -> &Path {
		&self.data_file_path
	}

	pub(crate) fn index_for_column(&self, column: &str) -> Option<&TableIndex> {
		self.indexes.iter().find(|i| i.column.name == column)
	}

	// [cksum][prev][next][row_len][row], checksum over everything after it
	fn node_record(&self, node: &TableNode) -> Result<Vec<u8>> {
		let row_bytes = row::serialize_row(&self.metadata.columns, &node.row_data)?;

		let mut body = Vec::with_capacity(NODE_HEADER_SIZE + row_bytes.len());
		let mut buf = [0u8; 4];
		LittleEndian::write_i32(&mut buf, node.previous_position as i32);
		body.extend_from_slice(&buf);
		LittleEndian::write_i32(&mut buf, node.next_position as i32);
		body.extend_from_slice(&buf);
		LittleEndian::write_i32(&mut buf, row_bytes.len() as i32);
		body.extend_from_slice(&buf);
		body.extend_from_slice(&row_bytes);

		let mut record = Vec::with_capacity(CHECKSUM_SIZE + body.len());
		LittleEndian::write_u32(&mut buf, polynomial_rolling_hash(&body));
		record.extend_from_slice(&buf);
		record.extend_from_slice(&body);

		Ok(record)
	}

	fn write_node(&self, node: &TableNode) -> Result<()> {
		let record = self.node_record(node)?;

		let mut file = &self.data_file;
		file.seek(SeekFrom::Start(node.position as u64))?;
		file.write_all(&record)?;
		file.flush()?;

		Ok(())
	}

	pub(crate) fn read_node(&self, position: i64) -> Result<TableNode> {
		let corrupted = |msg: String| {
			ErrorKind::Corrupted(self.data_file_path.clone(), msg)
		};

		let mut file = &self.data_file;
		file.seek(SeekFrom::Start(position as u64))?;

		let mut checksum = [0u8; CHECKSUM_SIZE];
		let mut header = [0u8; NODE_HEADER_SIZE];
		file.read_exact(&mut checksum)
			.map_err(|_| corrupted(format!("cannot read node at offset {}", position)))?;
		file.read_exact(&mut header)
			.map_err(|_| corrupted(format!("cannot read node at offset {}", position)))?;

		let previous_position = LittleEndian::read_i32(&header[0..4]) as i64;
		let next_position = LittleEndian::read_i32(&header[4..8]) as i64;
		let row_len = LittleEndian::read_i32(&header[8..12]);
		if row_len < 0 {
			bail!(corrupted(format!("node at offset {} has a negative row length", position)));
		}

		let mut row_bytes = vec![0u8; row_len as usize];
		file.read_exact(&mut row_bytes)
			.map_err(|_| corrupted(format!("cannot read node at offset {}", position)))?;

		let stored = LittleEndian::read_u32(&checksum);
		let mut body = header.to_vec();
		body.extend_from_slice(&row_bytes);
		let computed = polynomial_rolling_hash(&body);
		if computed != stored {
			bail!(corrupted(mismatch(computed, stored)));
		}

		let row_data = row::deserialize_row(&self.metadata.columns, &row_bytes)?;

		Ok(TableNode {
			row_data,
			position,
			previous_position,
			next_position,
		})
	}

	// completes missing cells from defaults, checks the rest
	fn validate_row(&self, mut given: Row) -> Result<Row> {
		let mut row = Row::with_capacity(self.metadata.columns.len());

		for column in &self.metadata.columns {
			match given.swap_remove(&column.name) {
				Some(value) => {
					column.validate_value(&value)?;
					row.insert(column.name.clone(), value);
				},
				None => match column.default {
					Some(ref default) => {
						row.insert(column.name.clone(), default.clone());
					},
					None => bail!(ErrorKind::Table(
						format!("Column '{}' requires a value!", column.name)
					)),
				},
			}
		}

		Ok(row)
	}

	/// Validates and appends one row.
	///
	/// The first free slot large enough is reused; otherwise the record
	/// goes to the table end. Every secondary index learns the new row
	/// and the metadata is persisted before returning.
	pub fn insert(&mut self, row: Row) -> Result<()> {
		let row = self.validate_row(row)?;
		let mut node = TableNode {
			row_data: row,
			position: -1,
			previous_position: -1,
			next_position: -1,
		};

		let node_size = self.node_record(&node)?.len() as i64;

		let mut reuse = None;
		for (i, slot) in self.metadata.free_slots.iter().enumerate() {
			if node_size <= slot.length {
				reuse = Some((i, slot.position));
				break;
			}
		}
		let position = match reuse {
			Some((i, position)) => {
				self.metadata.free_slots.remove(i);
				position
			},
			None => {
				let position = self.metadata.table_end;
				self.metadata.table_end += node_size;
				position
			},
		};
		node.position = position;

		if self.metadata.last_offset == -1 {
			self.metadata.first_offset = position;
			self.metadata.last_offset = position;
		} else {
			let mut last = self.read_node(self.metadata.last_offset)?;
			last.next_position = position;
			self.write_node(&last)?;

			node.previous_position = self.metadata.last_offset;
			self.metadata.last_offset = position;
		}

		self.write_node(&node)?;
		self.metadata.rows_count += 1;

		for index in &mut self.indexes {
			let value = node.row_data.get(&index.column.name)
				.expect("validated rows hold a value for every column; qed");
			index.insert(value, position)?;
		}

		self.metadata.save()?;

		Ok(())
	}

	/// Lazily yields the rows with the given 1-based row numbers.
	///
	/// The numbers are sorted ascending and matched against a single walk
	/// of the row list; a number past the end of the table surfaces as an
	/// out-of-range error in the stream.
	pub fn get_rows(self, row_numbers: Vec<i64>) -> GetRows {
		let sorted = binary_insertion_sort(row_numbers, |a, b| a.cmp(b));

		GetRows {
			current_offset: self.metadata.first_offset,
			current_row: 1,
			total_rows: self.metadata.rows_count as i64,
			queue: sorted.into_iter().collect(),
			table: self,
			finished: false,
		}
	}

	/// Deletes the rows with the given 1-based row numbers.
	pub fn delete_rows(&mut self, row_numbers: Vec<i64>) -> Result<()> {
		let sorted = binary_insertion_sort(row_numbers, |a, b| a.cmp(b));
		let mut queue: VecDeque<i64> = sorted.into_iter().collect();

		let start_rows = self.metadata.rows_count as i64;
		let mut current_offset = self.metadata.first_offset;
		let mut current_row = 1;

		while current_offset != -1 && !queue.is_empty() {
			let target = *queue.front().expect("the queue is non-empty; qed");
			if target > start_rows {
				break;
			}

			let node = self.read_node(current_offset)?;
			if current_row == target {
				self.delete_node(&node)?;
				queue.pop_front();
			}

			current_offset = node.next_position;
			current_row += 1;
		}

		if !queue.is_empty() {
			bail!(ErrorKind::OutOfRange("The table has no more rows.".into()));
		}

		Ok(())
	}

	// unlink, register the free slot, update indexes, persist metadata
	fn delete_node(&mut self, node: &TableNode) -> Result<()> {
		if node.previous_position != -1 {
			let mut prev = self.read_node(node.previous_position)?;
			prev.next_position = node.next_position;
			self.write_node(&prev)?;
		} else {
			self.metadata.first_offset = node.next_position;
		}

		if node.next_position != -1 {
			let mut next = self.read_node(node.next_position)?;
			next.previous_position = node.previous_position;
			self.write_node(&next)?;
		} else {
			self.metadata.last_offset = node.previous_position;
		}

		let node_size = self.node_record(node)?.len() as i64;
		self.metadata.free_slots.push(FreeSlot {
			position: node.position,
			length: node_size,
		});
		self.metadata.rows_count -= 1;

		for index in &mut self.indexes {
			let value = node.row_data.get(&index.column.name)
				.expect("stored rows hold a value for every column; qed");
			index.remove(value, node.position)?;
		}

		self.metadata.save()?;

		Ok(())
	}

	/// Deletes every row matching `expr` and returns how many went.
	///
	/// Always a full scan: the indexes are being mutated by the deletes,
	/// so no index stream may drive the walk.
	pub fn delete_filtered(&mut self, expr: &Expr) -> Result<u64> {
		let mut deleted = 0;
		let mut current = self.metadata.first_offset;

		while current != -1 {
			let node = self.read_node(current)?;
			let next = node.next_position;

			if expr.evaluate(&node.row_data)? {
				self.delete_node(&node)?;
				deleted += 1;
			}

			current = next;
		}

		Ok(deleted)
	}

	/// Rewrites the data file compactly and rebuilds every index.
	///
	/// Node positions change, so the indexes are dropped and re-created
	/// from the fresh table rather than remapped.
	pub fn defragment(&mut self) -> Result<()> {
		debug!("defragmenting table {}", self.name);

		let tmp_path = self.dir.join(format!("{}.data.defrag", self.name));
		let mut first = -1;
		let mut last = -1;
		let mut cursor = 0;

		{
			let mut out = BufWriter::new(File::create(&tmp_path)?);
			let mut current = self.metadata.first_offset;
			let mut previous = -1;

			while current != -1 {
				let node = self.read_node(current)?;
				let next = node.next_position;

				let mut compact = node;
				compact.previous_position = previous;
				let record_len = self.node_record(&compact)?.len() as i64;
				compact.position = cursor;
				compact.next_position = if next != -1 { cursor + record_len } else { -1 };

				out.write_all(&self.node_record(&compact)?)?;

				if first == -1 {
					first = cursor;
				}
				last = cursor;
				previous = cursor;
				cursor += record_len;
				current = next;
			}

			out.flush()?;
		}

		fs::rename(&tmp_path, &self.data_file_path)?;
		self.data_file = OpenOptions::new().read(true).write(true).open(&self.data_file_path)?;

		self.metadata.first_offset = first;
		self.metadata.last_offset = last;
		self.metadata.table_end = cursor;
		self.metadata.free_slots.clear();
		self.metadata.save()?;

		let specs: Vec<(String, String)> = self.metadata.indexes.iter()
			.map(|entry| (entry.name.clone(), entry.column.clone()))
			.collect();
		for (name, column) in specs {
			debug!("rebuilding index {} after defragment", name);
			self.drop_index(&name)?;
			self.create_index(&name, &column)?;
		}

		Ok(())
	}

	/// Removes the table directory with everything in it, index files
	/// included.
	pub fn drop_table(self) -> Result<()> {
		fs::remove_dir_all(&self.dir)?;
		Ok(())
	}

	/// Creates a secondary index on `column_name` and populates it with a
	/// full scan. One index per column.
	pub fn create_index(&mut self, index_name: &str, column_name: &str) -> Result<()> {
		let column = self.metadata.column(column_name).cloned().ok_or_else(|| {
			ErrorKind::Parse(format!("Unknown column '{}'", column_name))
		})?;
		if self.metadata.index_on(column_name).is_some() {
			bail!(ErrorKind::Table(
				format!("Column {} already has an index!", column_name)
			));
		}
		if self.metadata.index_named(index_name).is_some() {
			bail!(ErrorKind::Table(format!("Index {} already exists!", index_name)));
		}

		let index_path = self.dir.join(format!("{}_index.index", index_name));
		let pointer_list_path = self.dir.join(format!("{}_index.data", index_name));
		let mut index = TableIndex::create(index_name, column, &index_path, &pointer_list_path)?;

		let mut current = self.metadata.first_offset;
		while current != -1 {
			let node = self.read_node(current)?;
			let value = node.row_data.get(column_name)
				.expect("stored rows hold a value for every column; qed");
			index.insert(value, node.position)?;
			current = node.next_position;
		}

		self.metadata.indexes.push(IndexEntry {
			column: column_name.to_string(),
			name: index_name.to_string(),
			index_path,
			pointer_list_path,
		});
		self.metadata.save()?;
		self.indexes.push(index);

		Ok(())
	}

	/// Drops the named index and deletes its files.
	pub fn drop_index(&mut self, index_name: &str) -> Result<()> {
		let position = self.indexes.iter().position(|i| i.name == index_name)
			.ok_or_else(|| ErrorKind::Table(format!("Missing index {}", index_name)))?;

		let index = self.indexes.remove(position);
		index.delete_files()?;

		self.metadata.indexes.retain(|entry| entry.name != index_name);
		self.metadata.save()?;

		Ok(())
	}

	/// Structured summary of the table for `TABLEINFO`.
	pub fn tableinfo(&self) -> Result<TableInfo> {
		Ok(TableInfo {
			table_name: self.name.clone(),
			rows_count: self.metadata.rows_count,
			metadata_file_size: fs::metadata(&self.metadata.path)?.len(),
			data_file_size: fs::metadata(&self.data_file_path)?.len(),
			columns: self.metadata.columns.iter()
				.map(|c| (c.name.clone(), c.column_type.name().to_string()))
				.collect(),
			indexes: self.metadata.indexes.iter().map(|i| i.name.clone()).collect(),
		})
	}

	/// Lazily yields every row in list order.
	pub fn scan(self) -> ScanRows {
		ScanRows::new(self, None)
	}

	/// Streams the selected columns of every matching row.
	///
	/// `WHERE` goes through the index planner when possible; `DISTINCT`
	/// and `ORDER BY` run the rows through the external merge sort.
	pub fn select(
		self,
		columns: IndexMap<String, Column>,
		where_expr: Option<Expr>,
		distinct: bool,
		order_by: Option<(String, SortOrder)>,
		chunk_size: usize,
	) -> Result<Box<Iterator<Item = Result<Row>>>> {
		let dir = self.dir.clone();
		let table_name = self.name.clone();
		let projection: Vec<String> = columns.keys().cloned().collect();

		let source = planner::filtered_rows(self, where_expr)?;
		let project_to = projection.clone();
		let projected = source.map(move |item| item.map(|row| {
			let mut out = Row::with_capacity(project_to.len());
			for name in &project_to {
				if let Some(value) = row.get(name) {
					out.insert(name.clone(), value.clone());
				}
			}
			out
		}));

		if !distinct && order_by.is_none() {
			return Ok(Box::new(projected));
		}

		let (order_by_col, order) = match order_by {
			Some((column, order)) => (Some(column), order),
			None => (None, SortOrder::Asc),
		};
		let distinct_cols = if distinct { Some(projection) } else { None };

		let handler = MergeSortHandler::new(
			dir, &table_name, order_by_col, distinct_cols, order, chunk_size,
		);
		let final_path = handler.sort(projected)?;

		Ok(Box::new(SortedRows::open(final_path)?))
	}
}

/// Lazy positional row stream returned by [`Table::get_rows`].
pub struct GetRows {
	table: Table,
	queue: VecDeque<i64>,
	current_offset: i64,
	current_row: i64,
	total_rows: i64,
	finished: bool,
}

impl Iterator for GetRows {
	type Item = Result<Row>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished {
			return None;
		}

		loop {
			let target = match self.queue.front() {
				Some(target) => *target,
				None => {
					self.finished = true;
					return None;
				},
			};

			if target > self.total_rows || self.current_offset == -1 {
				self.finished = true;
				return Some(Err(
					ErrorKind::OutOfRange("The table has no more rows.".into()).into()
				));
			}

			let node = match self.table.read_node(self.current_offset) {
				Ok(node) => node,
				Err(err) => {
					self.finished = true;
					return Some(Err(err));
				},
			};

			let hit = self.current_row == target;
			self.current_offset = node.next_position;
			self.current_row += 1;

			if hit {
				self.queue.pop_front();
				return Some(Ok(node.row_data));
			}
		}
	}
}

/// Full-scan row stream with an optional residual filter.
pub struct ScanRows {
	table: Table,
	current: i64,
	expr: Option<Expr>,
	finished: bool,
}

impl ScanRows {
	pub(crate) fn new(table: Table, expr: Option<Expr>) -> ScanRows {
		ScanRows {
			current: table.metadata.first_offset,
			table,
			expr,
			finished: false,
		}
	}
}

impl Iterator for ScanRows {
	type Item = Result<Row>;

	fn next(&mut self) -> Option<Self::Item> {
		while !self.finished && self.current != -1 {
			let node = match self.table.read_node(self.current) {
				Ok(node) => node,
				Err(err) => {
					self.finished = true;
					return Some(Err(err));
				},
			};
			self.current = node.next_position;

			let keep = match self.expr {
				Some(ref expr) => match expr.evaluate(&node.row_data) {
					Ok(keep) => keep,
					Err(err) => {
						self.finished = true;
						return Some(Err(err));
					},
				},
				None => true,
			};

			if keep {
				return Some(Ok(node.row_data));
			}
		}

		self.finished = true;
		None
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use column::{Column, ColumnType};
	use row::Row;
	use value::{Number, Value};
	use super::Table;

	fn schema() -> Vec<Column> {
		vec![
			Column::new("id", ColumnType::Number, None, None).unwrap(),
			Column::new("name", ColumnType::Str, None, None).unwrap(),
		]
	}

	fn row(id: i32, name: &str) -> Row {
		let mut row = Row::new();
		row.insert("id".into(), Value::Number(Number::Int(id)));
		row.insert("name".into(), Value::Str(name.into()));
		row
	}

	// walks `next` from the first offset and `prev` from the last one,
	// checking both traversals agree with the row count
	fn assert_links(table: &Table) {
		let mut forward = Vec::new();
		let mut current = table.metadata.first_offset;
		let mut previous = -1;
		while current != -1 {
			let node = table.read_node(current).unwrap();
			assert_eq!(node.previous_position, previous);
			forward.push(current);
			previous = current;
			current = node.next_position;
		}
		assert_eq!(forward.len() as u64, table.metadata.rows_count);
		assert_eq!(previous, table.metadata.last_offset);

		let mut backward = Vec::new();
		let mut current = table.metadata.last_offset;
		while current != -1 {
			let node = table.read_node(current).unwrap();
			backward.push(current);
			current = node.previous_position;
		}
		backward.reverse();
		assert_eq!(forward, backward);
	}

	#[test]
	fn test_links_survive_mixed_operations() {
		let temp = TempDir::new("table_links").unwrap();
		let mut table = Table::create(temp.path(), "t", schema()).unwrap();

		for i in 0..8 {
			table.insert(row(i, "abc")).unwrap();
			assert_links(&table);
		}

		table.delete_rows(vec![1, 4, 8]).unwrap();
		assert_links(&table);
		assert_eq!(table.metadata.rows_count, 5);

		// reuses one of the freed slots
		table.insert(row(100, "abc")).unwrap();
		assert_links(&table);

		table.defragment().unwrap();
		assert_links(&table);
		assert!(table.metadata.free_slots.is_empty());
	}

	#[test]
	fn test_free_slots_never_overlap_live_nodes() {
		let temp = TempDir::new("table_slots").unwrap();
		let mut table = Table::create(temp.path(), "t", schema()).unwrap();

		for i in 0..6 {
			table.insert(row(i, "xyzw")).unwrap();
		}
		table.delete_rows(vec![2, 5]).unwrap();

		let mut live = Vec::new();
		let mut current = table.metadata.first_offset;
		while current != -1 {
			let node = table.read_node(current).unwrap();
			let len = table.node_record(&node).unwrap().len() as i64;
			live.push((current, len));
			current = node.next_position;
		}

		for slot in &table.metadata.free_slots {
			for &(position, length) in &live {
				let apart = slot.position + slot.length <= position
					|| position + length <= slot.position;
				assert!(apart, "free slot overlaps a live node");
			}
		}
	}

	#[test]
	fn test_reopen_sees_persisted_state() {
		let temp = TempDir::new("table_reopen").unwrap();
		{
			let mut table = Table::create(temp.path(), "t", schema()).unwrap();
			table.insert(row(1, "one")).unwrap();
			table.insert(row(2, "two")).unwrap();
		}

		let table = Table::open(temp.path(), "t").unwrap();
		assert_eq!(table.metadata.rows_count, 2);
		assert_links(&table);

		let first = table.read_node(table.metadata.first_offset).unwrap();
		assert_eq!(first.row_data, row(1, "one"));
	}
}
