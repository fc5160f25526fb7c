//! Duplicate-pointer lists backing B-tree keys.
//!
//! Each record is a checksummed `(prev, current, next)` triple of i64
//! offsets. `current` points at a heap row, `prev`/`next` link the chain
//! for one key. The file header tracks a `free_slot` write cursor and the
//! end of file.
//!
//! Deletes park `free_slot` on the freed record but never build a free
//! list, so a later write may simply overwrite the hole. This mirrors the
//! allocation strategy of the original engine.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use error::{ErrorKind, Result};
use hash::{mismatch, polynomial_rolling_hash};

const CHECKSUM_SIZE: usize = 4;
// free_slot i64 + eof i64
const HEADER_SIZE: usize = 16;
// prev + current + next
const TRIPLE_SIZE: usize = 24;

/// Manages the pointer-list file.
#[derive(Debug, Clone)]
pub struct PointerListManager {
	path: PathBuf,
	/// Position the next triple will be written to.
	pub free_slot: i64,
	/// One past the last byte ever written.
	pub eof: i64,
}

impl PointerListManager {
	/// Creates the pointer-list file with a fresh header.
	pub fn create<P: AsRef<Path>>(path: P) -> Result<PointerListManager> {
		let start = (CHECKSUM_SIZE + HEADER_SIZE) as i64;
		let manager = PointerListManager {
			path: path.as_ref().to_path_buf(),
			free_slot: start,
			eof: start,
		};

		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&manager.path)?;
		manager.write_header(&mut file)?;

		Ok(manager)
	}

	/// Opens an existing pointer-list file and verifies its header.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<PointerListManager> {
		let path = path.as_ref();
		let mut file = OpenOptions::new().read(true).open(path)
			.map_err(|_| ErrorKind::Table(
				format!("Index file {} is missing", path.display())
			))?;

		let mut checksum = [0u8; CHECKSUM_SIZE];
		let mut header = [0u8; HEADER_SIZE];
		file.read_exact(&mut checksum)
			.map_err(|_| corrupted(path, "PointerList header mismatch"))?;
		file.read_exact(&mut header)
			.map_err(|_| corrupted(path, "PointerList header mismatch"))?;

		let stored = LittleEndian::read_u32(&checksum);
		let computed = polynomial_rolling_hash(&header);
		if computed != stored {
			bail!(ErrorKind::Corrupted(path.to_path_buf(), mismatch(computed, stored)));
		}

		Ok(PointerListManager {
			path: path.to_path_buf(),
			free_slot: LittleEndian::read_i64(&header[0..8]),
			eof: LittleEndian::read_i64(&header[8..16]),
		})
	}

	fn write_header(&self, file: &mut ::std::fs::File) -> Result<()> {
		let mut header = [0u8; HEADER_SIZE];
		LittleEndian::write_i64(&mut header[0..8], self.free_slot);
		LittleEndian::write_i64(&mut header[8..16], self.eof);

		let mut checksum = [0u8; CHECKSUM_SIZE];
		LittleEndian::write_u32(&mut checksum, polynomial_rolling_hash(&header));

		file.seek(SeekFrom::Start(0))?;
		file.write_all(&checksum)?;
		file.write_all(&header)?;
		file.flush()?;

		Ok(())
	}

	fn update_header(&self) -> Result<()> {
		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		self.write_header(&mut file)
	}

	fn write_triple(&self, position: i64, prev: i64, current: i64, next: i64) -> Result<()> {
		let mut triple = [0u8; TRIPLE_SIZE];
		LittleEndian::write_i64(&mut triple[0..8], prev);
		LittleEndian::write_i64(&mut triple[8..16], current);
		LittleEndian::write_i64(&mut triple[16..24], next);

		let mut checksum = [0u8; CHECKSUM_SIZE];
		LittleEndian::write_u32(&mut checksum, polynomial_rolling_hash(&triple));

		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		file.seek(SeekFrom::Start(position as u64))?;
		file.write_all(&checksum)?;
		file.write_all(&triple)?;
		file.flush()?;

		Ok(())
	}

	fn read_triple(&self, position: i64) -> Result<(i64, i64, i64)> {
		let msg = format!("PointerList cannot load pointer at position {}", position);

		let mut file = OpenOptions::new().read(true).open(&self.path)?;
		file.seek(SeekFrom::Start(position as u64))?;

		let mut checksum = [0u8; CHECKSUM_SIZE];
		let mut triple = [0u8; TRIPLE_SIZE];
		file.read_exact(&mut checksum).map_err(|_| corrupted(&self.path, &msg))?;
		file.read_exact(&mut triple).map_err(|_| corrupted(&self.path, &msg))?;

		let stored = LittleEndian::read_u32(&checksum);
		let computed = polynomial_rolling_hash(&triple);
		if computed != stored {
			bail!(ErrorKind::Corrupted(self.path.clone(), mismatch(computed, stored)));
		}

		Ok((
			LittleEndian::read_i64(&triple[0..8]),
			LittleEndian::read_i64(&triple[8..16]),
			LittleEndian::read_i64(&triple[16..24]),
		))
	}

	// Advances the write cursor past a record just written at `position`.
	fn allocate_space(&mut self, position: i64) -> Result<()> {
		if position == self.eof {
			self.eof += (TRIPLE_SIZE + CHECKSUM_SIZE) as i64;
		}
		self.free_slot = self.eof;
		self.update_header()
	}

	/// Starts a fresh one-element list holding `pointer` and returns the
	/// position of its head.
	pub fn create_list(&mut self, pointer: i64) -> Result<i64> {
		let position = self.free_slot;
		self.write_triple(position, -1, pointer, -1)?;
		self.allocate_space(position)?;
		Ok(position)
	}

	/// Appends `pointer` at the tail of the list starting at `head`.
	pub fn append(&mut self, head: i64, pointer: i64) -> Result<()> {
		let mut position = head;

		while position != -1 {
			let (prev, current, next) = self.read_triple(position)?;

			if next == -1 {
				let new_position = self.free_slot;
				self.write_triple(new_position, position, pointer, -1)?;
				self.write_triple(position, prev, current, new_position)?;
				self.allocate_space(new_position)?;
				return Ok(());
			}

			position = next;
		}

		Ok(())
	}

	/// Heap offset stored in the first element of the list.
	pub fn first(&self, head: i64) -> Result<i64> {
		let (_, current, _) = self.read_triple(head)?;
		Ok(current)
	}

	/// Unlinks the element holding `pointer` from the list starting at
	/// `head` and returns the new head (`-1` when the list is now empty).
	pub fn delete(&mut self, head: i64, pointer: i64) -> Result<i64> {
		let mut position = head;
		let mut new_head = -1;

		while position != -1 {
			let (prev, current, next) = self.read_triple(position)?;

			if current == pointer {
				if prev != -1 {
					let (prev_prev, prev_current, _) = self.read_triple(prev)?;
					self.write_triple(prev, prev_prev, prev_current, next)?;
				}
				if next != -1 {
					let (_, next_current, next_next) = self.read_triple(next)?;
					self.write_triple(next, prev, next_current, next_next)?;
					new_head = next;
				}

				// parked, not reclaimed; the next write may overwrite it
				self.free_slot = position;

				if head == position {
					return Ok(new_head);
				}
				return Ok(head);
			}

			position = next;
		}

		Ok(head)
	}

	/// Materializes every heap offset in the list, head first.
	pub fn traverse(&self, head: i64) -> Result<Vec<i64>> {
		let mut pointers = Vec::new();
		let mut position = head;

		while position != -1 {
			let (_, current, next) = self.read_triple(position)?;
			pointers.push(current);
			position = next;
		}

		Ok(pointers)
	}
}

fn corrupted(path: &Path, msg: &str) -> ::error::Error {
	ErrorKind::Corrupted(path.to_path_buf(), msg.to_string()).into()
}
