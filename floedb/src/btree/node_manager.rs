//! Checksummed, fixed-footprint node records for the B-tree file.
//!
//! Layout of the node file:
//!
//! ```text
//!  header record                node records
//!   /                            /
//! | cksum | t | root | eof | key tag | key max |  | cksum | len | payload | ...
//!    u32   i32  i64    i64    1 byte    i32         u32     i32   const
//! ```
//!
//! Every payload has the same length for a given `(t, key type, key max
//! size)`, so node offsets stay valid across rewrites.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use btree::KeyType;
use error::{ErrorKind, Result};
use hash::{mismatch, polynomial_rolling_hash};

const CHECKSUM_SIZE: usize = 4;
// i32 t + i64 root_offset + i64 eof + key tag + i32 key_max_size
const HEADER_SIZE: usize = 25;

/// Manages the node file: header bookkeeping plus checksummed record
/// reads and writes. Offsets handed out by `save` never move.
#[derive(Debug, Clone)]
pub struct NodeManager {
	path: PathBuf,
	/// Minimum degree of the tree stored in this file.
	pub t: usize,
	/// Offset of the root node record, `-1` when the tree is empty.
	pub root_offset: i64,
	/// One past the last byte ever written.
	pub eof: i64,
	/// Key type of the indexed column.
	pub key_type: KeyType,
	/// Fixed byte width reserved for string keys; zero for other key types.
	pub key_max_size: usize,
}

impl NodeManager {
	/// Creates the node file with a fresh header. The first node record
	/// will land right after the header.
	pub fn create<P: AsRef<Path>>(
		path: P,
		t: usize,
		key_type: KeyType,
		key_max_size: usize,
	) -> Result<NodeManager> {
		let start = (CHECKSUM_SIZE + HEADER_SIZE) as i64;
		let manager = NodeManager {
			path: path.as_ref().to_path_buf(),
			t,
			root_offset: start,
			eof: start,
			key_type,
			key_max_size,
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

	/// Opens an existing node file and verifies its header checksum.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<NodeManager> {
		let path = path.as_ref();
		let mut file = OpenOptions::new().read(true).open(path)
			.map_err(|_| ErrorKind::Table(
				format!("Index file {} is missing", path.display())
			))?;

		let mut checksum = [0u8; CHECKSUM_SIZE];
		let mut header = [0u8; HEADER_SIZE];
		file.read_exact(&mut checksum)
			.map_err(|_| corrupted(path, "BTree header mismatch"))?;
		file.read_exact(&mut header)
			.map_err(|_| corrupted(path, "BTree header mismatch"))?;

		let stored = LittleEndian::read_u32(&checksum);
		let computed = polynomial_rolling_hash(&header);
		if computed != stored {
			bail!(ErrorKind::Corrupted(path.to_path_buf(), mismatch(computed, stored)));
		}

		let t = LittleEndian::read_i32(&header[0..4]) as usize;
		let root_offset = LittleEndian::read_i64(&header[4..12]);
		let eof = LittleEndian::read_i64(&header[12..20]);
		let key_type = KeyType::from_tag(header[20]).ok_or_else(|| {
			ErrorKind::Corrupted(path.to_path_buf(), "BTree header mismatch".into())
		})?;
		let key_max_size = LittleEndian::read_i32(&header[21..25]) as usize;

		Ok(NodeManager {
			path: path.to_path_buf(),
			t,
			root_offset,
			eof,
			key_type,
			key_max_size,
		})
	}

	/// Rewrites the checksummed header in place.
	pub fn update_header(&self) -> Result<()> {
		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		self.write_header(&mut file)
	}

	fn write_header(&self, file: &mut ::std::fs::File) -> Result<()> {
		let mut header = [0u8; HEADER_SIZE];
		LittleEndian::write_i32(&mut header[0..4], self.t as i32);
		LittleEndian::write_i64(&mut header[4..12], self.root_offset);
		LittleEndian::write_i64(&mut header[12..20], self.eof);
		header[20] = self.key_type.tag();
		LittleEndian::write_i32(&mut header[21..25], self.key_max_size as i32);

		let mut checksum = [0u8; CHECKSUM_SIZE];
		LittleEndian::write_u32(&mut checksum, polynomial_rolling_hash(&header));

		file.seek(SeekFrom::Start(0))?;
		file.write_all(&checksum)?;
		file.write_all(&header)?;
		file.flush()?;

		Ok(())
	}

	/// Writes a node payload at `offset`, or at the end of the file when
	/// `offset` is `None`. Returns the offset the record landed at.
	pub fn save(&mut self, offset: Option<i64>, payload: &[u8]) -> Result<i64> {
		let mut node_data = Vec::with_capacity(4 + payload.len());
		let mut len = [0u8; 4];
		LittleEndian::write_i32(&mut len, payload.len() as i32);
		node_data.extend_from_slice(&len);
		node_data.extend_from_slice(payload);

		let mut checksum = [0u8; CHECKSUM_SIZE];
		LittleEndian::write_u32(&mut checksum, polynomial_rolling_hash(&node_data));

		let offset = offset.unwrap_or(self.eof);

		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		file.seek(SeekFrom::Start(offset as u64))?;
		file.write_all(&checksum)?;
		file.write_all(&node_data)?;
		file.flush()?;

		if self.eof < offset + node_data.len() as i64 {
			self.eof = offset + node_data.len() as i64 + CHECKSUM_SIZE as i64;
		}

		self.update_header()?;

		Ok(offset)
	}

	/// Loads and verifies the node payload stored at `offset`.
	pub fn load(&self, offset: i64) -> Result<Vec<u8>> {
		let mut file = OpenOptions::new().read(true).open(&self.path)?;
		file.seek(SeekFrom::Start(offset as u64))?;

		let mut checksum = [0u8; CHECKSUM_SIZE];
		let mut len = [0u8; 4];
		let not_loadable = format!("BTree cannot load node with offset {}", offset);
		file.read_exact(&mut checksum)
			.map_err(|_| corrupted(&self.path, "cannot read the node hash"))?;
		file.read_exact(&mut len)
			.map_err(|_| corrupted(&self.path, &not_loadable))?;

		let length = LittleEndian::read_i32(&len);
		if length < 0 {
			bail!(ErrorKind::Corrupted(self.path.clone(), not_loadable.clone()));
		}

		let mut payload = vec![0u8; length as usize];
		file.read_exact(&mut payload)
			.map_err(|_| corrupted(&self.path, &not_loadable))?;

		let stored = LittleEndian::read_u32(&checksum);
		let mut node_data = len.to_vec();
		node_data.extend_from_slice(&payload);
		let computed = polynomial_rolling_hash(&node_data);
		if computed != stored {
			bail!(ErrorKind::Corrupted(self.path.clone(), mismatch(computed, stored)));
		}

		Ok(payload)
	}
}

fn corrupted(path: &Path, msg: &str) -> ::error::Error {
	ErrorKind::Corrupted(path.to_path_buf(), msg.to_string()).into()
}
