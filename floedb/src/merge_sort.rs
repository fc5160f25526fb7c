//! External merge sort realizing `DISTINCT` and `ORDER BY`.
//!
//! Rows stream in, get buffered into chunks, each chunk is sorted in
//! memory and spilled to a temporary run file, and the runs are k-way
//! merged into one final file. The composite sort key is the `ORDER BY`
//! column followed by every `DISTINCT` column that is not already the
//! order column.
//!
//! Run records share the checksum discipline of the rest of the engine:
//!
//! ```text
//! | cksum | len | ncols | name len | name | tag | value | ...
//!    u32    i32   i32      i32              1B
//! ```
//!
//! A clean end of file between records means end of stream; a checksum
//! mismatch inside a record is corruption.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use byteorder::{ByteOrder, LittleEndian};

use date::Date;
use error::{ErrorKind, Result};
use hash::polynomial_rolling_hash;
use row::Row;
use value::{Number, Value};

// distinguishes the temp files of concurrently open sorts
static RUN_TAG: AtomicUsize = AtomicUsize::new(0);

/// Direction of the `ORDER BY` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
	/// Ascending (the default).
	Asc,
	/// Descending.
	Desc,
}

/// Drives one external sort over a row stream.
#[derive(Debug)]
pub struct MergeSortHandler {
	directory: PathBuf,
	table_name: String,
	order_by_col: Option<String>,
	distinct_cols: Option<Vec<String>>,
	order: SortOrder,
	chunk_size: usize,
	run_tag: usize,
}

impl MergeSortHandler {
	pub fn new<P: AsRef<Path>>(
		directory: P,
		table_name: &str,
		order_by_col: Option<String>,
		distinct_cols: Option<Vec<String>>,
		order: SortOrder,
		chunk_size: usize,
	) -> MergeSortHandler {
		MergeSortHandler {
			directory: directory.as_ref().to_path_buf(),
			table_name: table_name.to_string(),
			order_by_col,
			distinct_cols,
			order,
			chunk_size,
			run_tag: RUN_TAG.fetch_add(1, AtomicOrdering::SeqCst),
		}
	}

	/// Runs both phases and returns the path of the final sorted file.
	/// All intermediate run files are deleted before returning.
	pub fn sort<I>(&self, rows: I) -> Result<PathBuf>
		where I: Iterator<Item = Result<Row>>
	{
		let mut chunk_files = Vec::new();
		let mut chunk = Vec::new();

		for row in rows {
			chunk.push(row?);
			if chunk.len() >= self.chunk_size {
				let full = ::std::mem::replace(&mut chunk, Vec::new());
				chunk_files.push(self.write_sorted_chunk(full, chunk_files.len() + 1)?);
			}
		}
		if !chunk.is_empty() {
			chunk_files.push(self.write_sorted_chunk(chunk, chunk_files.len() + 1)?);
		}

		let final_path = self.merge(&chunk_files)?;

		for path in &chunk_files {
			let _ = fs::remove_file(path);
		}

		Ok(final_path)
	}

	// ascending composite key, direction-blind; used for run formation
	fn key_cmp(&self, a: &Row, b: &Row) -> Ordering {
		if let Some(ref col) = self.order_by_col {
			let ord = cmp_cells(a.get(col), b.get(col));
			if ord != Ordering::Equal {
				return ord;
			}
		}

		if let Some(ref distinct) = self.distinct_cols {
			for col in distinct {
				if Some(col) == self.order_by_col.as_ref() {
					continue;
				}
				let ord = cmp_cells(a.get(col), b.get(col));
				if ord != Ordering::Equal {
					return ord;
				}
			}
		}

		Ordering::Equal
	}

	// direction-aware comparison used when choosing the next merge head
	fn merge_cmp(&self, a: &Row, b: &Row) -> Ordering {
		if let Some(ref col) = self.order_by_col {
			let ord = cmp_cells(a.get(col), b.get(col));
			if ord != Ordering::Equal {
				return match self.order {
					SortOrder::Asc => ord,
					SortOrder::Desc => ord.reverse(),
				};
			}
		}

		if let Some(ref distinct) = self.distinct_cols {
			for col in distinct {
				if Some(col) == self.order_by_col.as_ref() {
					continue;
				}
				let ord = cmp_cells(a.get(col), b.get(col));
				if ord != Ordering::Equal {
					return ord;
				}
			}
		}

		Ordering::Equal
	}

	fn write_sorted_chunk(&self, rows: Vec<Row>, chunk_num: usize) -> Result<PathBuf> {
		let mut sorted = self.mergesort(rows);
		if self.order == SortOrder::Desc {
			sorted.reverse();
		}

		let path = self.directory.join(
			format!("{}_{}_chunk_{}.temp", self.table_name, self.run_tag, chunk_num)
		);
		let mut out = BufWriter::new(File::create(&path)?);
		for row in &sorted {
			write_row(&mut out, row)?;
		}
		out.flush()?;

		Ok(path)
	}

	fn mergesort(&self, rows: Vec<Row>) -> Vec<Row> {
		if rows.len() <= 1 {
			return rows;
		}

		let mut left = rows;
		let right = left.split_off(left.len() / 2);

		let left = self.mergesort(left);
		let right = self.mergesort(right);
		self.merge_two(left, right)
	}

	fn merge_two(&self, left: Vec<Row>, right: Vec<Row>) -> Vec<Row> {
		let mut result = Vec::with_capacity(left.len() + right.len());
		let mut left = left.into_iter().peekable();
		let mut right = right.into_iter().peekable();

		loop {
			let take_left = match (left.peek(), right.peek()) {
				(Some(a), Some(b)) => self.key_cmp(a, b) != Ordering::Greater,
				(Some(_), None) => true,
				(None, Some(_)) => false,
				(None, None) => break,
			};
			if take_left {
				result.push(left.next().expect("peeked above; qed"));
			} else {
				result.push(right.next().expect("peeked above; qed"));
			}
		}

		result
	}

	fn merge(&self, chunk_files: &[PathBuf]) -> Result<PathBuf> {
		let final_path = self.directory.join(
			format!("{}_{}_merge_sort.temp", self.table_name, self.run_tag)
		);
		let mut out = BufWriter::new(File::create(&final_path)?);

		let mut handles = Vec::with_capacity(chunk_files.len());
		for path in chunk_files {
			handles.push(BufReader::new(File::open(path)?));
		}
		let mut buffers = Vec::with_capacity(handles.len());
		for handle in &mut handles {
			buffers.push(read_next_row(handle)?);
		}

		let mut last_distinct: Option<Vec<Value>> = None;

		loop {
			let mut chosen: Option<usize> = None;
			for i in 0..buffers.len() {
				if buffers[i].is_none() {
					continue;
				}
				match chosen {
					None => chosen = Some(i),
					Some(j) => {
						let row = buffers[i].as_ref().expect("checked above; qed");
						let current = buffers[j].as_ref().expect("chosen buffers are non-empty; qed");
						if self.merge_cmp(row, current) == Ordering::Less {
							chosen = Some(i);
						}
					},
				}
			}

			let i = match chosen {
				Some(i) => i,
				None => break,
			};
			let row = buffers[i].take().expect("chosen buffers are non-empty; qed");

			match self.distinct_cols {
				Some(ref distinct) => {
					let key: Vec<Value> = distinct.iter()
						.map(|col| row.get(col)
							.expect("distinct columns are part of the projection; qed")
							.clone())
						.collect();
					if last_distinct.as_ref() != Some(&key) {
						write_row(&mut out, &row)?;
						last_distinct = Some(key);
					}
				},
				None => write_row(&mut out, &row)?,
			}

			buffers[i] = read_next_row(&mut handles[i])?;
		}

		out.flush()?;

		Ok(final_path)
	}
}

fn cmp_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a, b) {
		(Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
		_ => Ordering::Equal,
	}
}

/// Appends one checksummed row record to a sort file.
pub fn write_row<W: Write>(out: &mut W, row: &Row) -> Result<()> {
	let mut record = [0u8; 4].to_vec();
	serialize_sort_row(row, &mut record);
	let payload_len = record.len() as i32 - 4;
	LittleEndian::write_i32(&mut record[..4], payload_len);

	let mut checksum = [0u8; 4];
	LittleEndian::write_u32(&mut checksum, polynomial_rolling_hash(&record));

	out.write_all(&checksum)?;
	out.write_all(&record)?;

	Ok(())
}

/// Reads the next row record. `Ok(None)` means a clean end of stream; a
/// checksum mismatch inside a record is an error.
pub fn read_next_row<R: Read>(input: &mut R) -> Result<Option<Row>> {
	let mut checksum = [0u8; 4];
	if !try_read_exact(input, &mut checksum)? {
		return Ok(None);
	}

	let mut len = [0u8; 4];
	if !try_read_exact(input, &mut len)? {
		return Ok(None);
	}
	let length = LittleEndian::read_i32(&len);
	if length < 0 {
		bail!(ErrorKind::Table("Corrupted file: MergeSort row error".into()));
	}

	let mut payload = vec![0u8; length as usize];
	if !try_read_exact(input, &mut payload)? {
		return Ok(None);
	}

	let mut record = len.to_vec();
	record.extend_from_slice(&payload);
	if polynomial_rolling_hash(&record) != LittleEndian::read_u32(&checksum) {
		bail!(ErrorKind::Table("Corrupted file: MergeSort row error".into()));
	}

	deserialize_sort_row(&payload).map(Some)
}

fn try_read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<bool> {
	let mut read = 0;
	while read < buf.len() {
		let n = input.read(&mut buf[read..])?;
		if n == 0 {
			return Ok(false);
		}
		read += n;
	}
	Ok(true)
}

// self-describing encoding: rows in sort files carry their column names
// and type tags because no table schema is at hand while merging
fn serialize_sort_row(row: &Row, out: &mut Vec<u8>) {
	let mut buf = [0u8; 8];

	LittleEndian::write_i32(&mut buf[..4], row.len() as i32);
	out.extend_from_slice(&buf[..4]);

	for (name, value) in row {
		LittleEndian::write_i32(&mut buf[..4], name.len() as i32);
		out.extend_from_slice(&buf[..4]);
		out.extend_from_slice(name.as_bytes());

		match *value {
			Value::Number(Number::Int(v)) => {
				out.push(b'I');
				LittleEndian::write_i32(&mut buf[..4], v);
				out.extend_from_slice(&buf[..4]);
			},
			Value::Number(Number::Float(v)) => {
				out.push(b'F');
				LittleEndian::write_f64(&mut buf, v);
				out.extend_from_slice(&buf);
			},
			Value::Date(ref d) => {
				out.push(b'D');
				out.extend_from_slice(d.to_string().as_bytes());
			},
			Value::Str(ref s) => {
				out.push(b'S');
				LittleEndian::write_i32(&mut buf[..4], s.len() as i32);
				out.extend_from_slice(&buf[..4]);
				out.extend_from_slice(s.as_bytes());
			},
		}
	}
}

fn deserialize_sort_row(data: &[u8]) -> Result<Row> {
	let corrupted = || ErrorKind::Table("Corrupted file: MergeSort row error".to_string());

	let mut offset = 0;
	let total = read_i32(data, &mut offset).ok_or_else(&corrupted)?;
	let mut row = Row::with_capacity(total as usize);

	for _ in 0..total {
		let name_len = read_i32(data, &mut offset).ok_or_else(&corrupted)? as usize;
		let name_raw = read_bytes(data, &mut offset, name_len).ok_or_else(&corrupted)?;
		let name = String::from_utf8(name_raw.to_vec()).map_err(|_| corrupted())?;

		let tag = read_bytes(data, &mut offset, 1).ok_or_else(&corrupted)?[0];
		let value = match tag {
			b'I' => Value::Number(Number::Int(read_i32(data, &mut offset).ok_or_else(&corrupted)?)),
			b'F' => {
				let raw = read_bytes(data, &mut offset, 8).ok_or_else(&corrupted)?;
				Value::Number(Number::Float(LittleEndian::read_f64(raw)))
			},
			b'D' => {
				let raw = read_bytes(data, &mut offset, 10).ok_or_else(&corrupted)?;
				let text = ::std::str::from_utf8(raw).map_err(|_| corrupted())?;
				Value::Date(Date::from_str(text).map_err(|_| corrupted())?)
			},
			b'S' => {
				let len = read_i32(data, &mut offset).ok_or_else(&corrupted)? as usize;
				let raw = read_bytes(data, &mut offset, len).ok_or_else(&corrupted)?;
				Value::Str(String::from_utf8(raw.to_vec()).map_err(|_| corrupted())?)
			},
			_ => bail!(corrupted()),
		};

		row.insert(name, value);
	}

	Ok(row)
}

fn read_i32(data: &[u8], offset: &mut usize) -> Option<i32> {
	read_bytes(data, offset, 4).map(LittleEndian::read_i32)
}

fn read_bytes<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Option<&'a [u8]> {
	if *offset + len > data.len() {
		return None;
	}
	let slice = &data[*offset..*offset + len];
	*offset += len;
	Some(slice)
}

/// Streams the final sorted file and deletes it once it is exhausted or
/// dropped.
#[derive(Debug)]
pub struct SortedRows {
	path: PathBuf,
	reader: Option<BufReader<File>>,
}

impl SortedRows {
	/// Opens a file produced by [`MergeSortHandler::sort`].
	pub fn open(path: PathBuf) -> Result<SortedRows> {
		let reader = BufReader::new(File::open(&path)?);
		Ok(SortedRows { path, reader: Some(reader) })
	}
}

impl Iterator for SortedRows {
	type Item = Result<Row>;

	fn next(&mut self) -> Option<Self::Item> {
		let row = match self.reader {
			Some(ref mut reader) => read_next_row(reader),
			None => return None,
		};

		match row {
			Ok(Some(row)) => Some(Ok(row)),
			Ok(None) => {
				self.reader = None;
				let _ = fs::remove_file(&self.path);
				None
			},
			Err(err) => {
				self.reader = None;
				let _ = fs::remove_file(&self.path);
				Some(Err(err))
			},
		}
	}
}

impl Drop for SortedRows {
	fn drop(&mut self) {
		if self.reader.take().is_some() {
			let _ = fs::remove_file(&self.path);
		}
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use std::fs::{self, OpenOptions};
	use std::io::{Seek, SeekFrom, Write};
	use self::tempdir::TempDir;
	use row::Row;
	use value::{Number, Value};
	use super::{MergeSortHandler, SortOrder, SortedRows};

	fn number_row(id: i32, name: &str) -> Row {
		let mut row = Row::new();
		row.insert("id".into(), Value::Number(Number::Int(id)));
		row.insert("name".into(), Value::Str(name.into()));
		row
	}

	fn ids(rows: Vec<Row>) -> Vec<i32> {
		rows.into_iter().map(|row| match row["id"] {
			Value::Number(Number::Int(v)) => v,
			_ => panic!("expected an integer id"),
		}).collect()
	}

	#[test]
	fn test_sorts_across_many_chunks() {
		let temp = TempDir::new("merge_sort_chunks").unwrap();
		let handler = MergeSortHandler::new(
			temp.path(), "t", Some("id".into()), None, SortOrder::Asc, 10,
		);

		let input: Vec<_> = (1..=35).rev().map(|i| Ok(number_row(i, "x"))).collect();
		let path = handler.sort(input.into_iter()).unwrap();

		let rows: Vec<Row> = SortedRows::open(path).unwrap()
			.collect::<::error::Result<_>>().unwrap();
		assert_eq!(ids(rows), (1..=35).collect::<Vec<i32>>());

		// only the final file may remain, and the iterator removed it
		assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
	}

	#[test]
	fn test_descending_order() {
		let temp = TempDir::new("merge_sort_desc").unwrap();
		let handler = MergeSortHandler::new(
			temp.path(), "t", Some("id".into()), None, SortOrder::Desc, 4,
		);

		let input: Vec<_> = vec![3, 1, 4, 1, 5, 9, 2, 6].into_iter()
			.map(|i| Ok(number_row(i, "x")))
			.collect();
		let path = handler.sort(input.into_iter()).unwrap();

		let rows: Vec<Row> = SortedRows::open(path).unwrap()
			.collect::<::error::Result<_>>().unwrap();
		assert_eq!(ids(rows), vec![9, 6, 5, 4, 3, 2, 1, 1]);
	}

	#[test]
	fn test_distinct_suppresses_consecutive_duplicates() {
		let temp = TempDir::new("merge_sort_distinct").unwrap();
		let handler = MergeSortHandler::new(
			temp.path(), "t", Some("name".into()),
			Some(vec!["name".into()]), SortOrder::Asc, 2,
		);

		let names = ["a", "a", "b", "b", "a", "c"];
		let input: Vec<_> = names.iter().enumerate()
			.map(|(i, name)| Ok(number_row(i as i32, name)))
			.collect();
		let path = handler.sort(input.into_iter()).unwrap();

		let rows: Vec<Row> = SortedRows::open(path).unwrap()
			.collect::<::error::Result<_>>().unwrap();
		let names: Vec<String> = rows.into_iter().map(|row| match row["name"] {
			Value::Str(ref s) => s.clone(),
			_ => panic!("expected a string name"),
		}).collect();
		assert_eq!(names, vec!["a", "b", "c"]);
	}

	#[test]
	fn test_empty_input_yields_empty_stream() {
		let temp = TempDir::new("merge_sort_empty").unwrap();
		let handler = MergeSortHandler::new(
			temp.path(), "t", Some("id".into()), None, SortOrder::Asc, 10,
		);

		let path = handler.sort(Vec::new().into_iter()).unwrap();
		assert_eq!(SortedRows::open(path).unwrap().count(), 0);
	}

	#[test]
	fn should_detect_corrupted_record() {
		let temp = TempDir::new("merge_sort_corruption").unwrap();
		let handler = MergeSortHandler::new(
			temp.path(), "t", Some("id".into()), None, SortOrder::Asc, 10,
		);

		let input: Vec<_> = (1..=3).map(|i| Ok(number_row(i, "abc"))).collect();
		let path = handler.sort(input.into_iter()).unwrap();

		{
			let mut file = OpenOptions::new().write(true).open(&path).unwrap();
			file.seek(SeekFrom::Start(10)).unwrap();
			file.write_all(&[0xff]).unwrap();
			file.flush().unwrap();
		}

		let mut stream = SortedRows::open(path).unwrap();
		assert!(stream.next().unwrap().is_err());
	}
}
