//! Persistent B-tree with duplicate-pointer lists.
//!
//! A tree of minimum degree `t` lives in two files: the node file
//! (fixed-footprint node records, see [`node_manager`]) and the
//! pointer-list file (per-key duplicate chains, see [`pointer_list`]).
//! Every key carries two pointers: the primary heap-row offset and the
//! head of the duplicate list for further rows sharing the key.
//!
//! Insert and delete follow the classic textbook shape: inserts pre-split
//! full children on the way down, deletes borrow from or merge with
//! siblings so that every visited child has at least `t` keys before
//! descending.

pub mod node_manager;
pub mod pointer_list;

use std::cmp::Ordering;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use date::Date;
use error::{ErrorKind, Result};
use sort::binary_insertion_sort;
use value::{Number, Value};
use self::node_manager::NodeManager;
use self::pointer_list::PointerListManager;

/// Logical key type of an index, written into the node file header.
///
/// Numeric columns are tagged `I`; the per-key records distinguish
/// integer and float payloads, which occupy the same eight bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
	/// Numbers, encoded as little-endian i64 or IEEE-754 double.
	Number,
	/// Dates, encoded as the ten-byte text form.
	Date,
	/// Strings, null-padded to the fixed key width.
	Str,
}

impl KeyType {
	pub fn tag(&self) -> u8 {
		match *self {
			KeyType::Number => b'I',
			KeyType::Date => b'D',
			KeyType::Str => b'S',
		}
	}

	pub fn from_tag(tag: u8) -> Option<KeyType> {
		match tag {
			b'I' | b'F' | b'N' => Some(KeyType::Number),
			b'D' => Some(KeyType::Date),
			b'S' => Some(KeyType::Str),
			_ => None,
		}
	}

	/// Constant on-disk footprint of one key slot: tag, key payload and
	/// the two pointers. This is what keeps node records relocatable.
	pub fn key_size(&self, key_max_size: usize) -> usize {
		let payload = match *self {
			KeyType::Number => 8,
			KeyType::Date => 10,
			KeyType::Str => 4 + key_max_size,
		};
		1 + payload + 16
	}
}

/// A typed index key.
#[derive(Debug, Clone)]
pub enum Key {
	Int(i64),
	Float(f64),
	Date(Date),
	Str(String),
}

// mixed int/float keys with the same magnitude are the same key
impl PartialEq for Key {
	fn eq(&self, other: &Self) -> bool {
		self.compare(other) == Ordering::Equal
	}
}

impl Key {
	/// Converts a cell value into its index key form.
	pub fn from_value(value: &Value) -> Key {
		match *value {
			Value::Number(Number::Int(v)) => Key::Int(v as i64),
			Value::Number(Number::Float(v)) => Key::Float(v),
			Value::Str(ref s) => Key::Str(s.clone()),
			Value::Date(d) => Key::Date(d),
		}
	}

	pub fn compare(&self, other: &Key) -> Ordering {
		match (self, other) {
			(&Key::Int(a), &Key::Int(b)) => a.cmp(&b),
			(&Key::Int(a), &Key::Float(b)) => flat_cmp(a as f64, b),
			(&Key::Float(a), &Key::Int(b)) => flat_cmp(a, b as f64),
			(&Key::Float(a), &Key::Float(b)) => flat_cmp(a, b),
			(&Key::Date(ref a), &Key::Date(ref b)) => a.cmp(b),
			(&Key::Str(ref a), &Key::Str(ref b)) => a.as_bytes().cmp(b.as_bytes()),
			_ => unreachable!("keys within one index share the column's key type; qed"),
		}
	}
}

fn flat_cmp(a: f64, b: f64) -> Ordering {
	a.partial_cmp(&b).expect("index keys come from parsed literals and are never NaN; qed")
}

/// One key slot of a node: the key plus its primary heap pointer and the
/// head of its duplicate-pointer list (`-1` when the key is unique).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeKey {
	pub key: Key,
	pub primary: i64,
	pub list_head: i64,
}

impl NodeKey {
	fn serialize_into(&self, out: &mut Vec<u8>, key_max_size: usize) -> Result<()> {
		let mut buf = [0u8; 8];
		match self.key {
			Key::Int(v) => {
				out.push(b'I');
				LittleEndian::write_i64(&mut buf, v);
				out.extend_from_slice(&buf);
			},
			Key::Float(v) => {
				out.push(b'F');
				LittleEndian::write_f64(&mut buf, v);
				out.extend_from_slice(&buf);
			},
			Key::Date(ref d) => {
				out.push(b'D');
				out.extend_from_slice(d.to_string().as_bytes());
			},
			Key::Str(ref s) => {
				if s.len() > key_max_size {
					bail!(ErrorKind::Value(
						format!("Value has to be less than {} characters!", key_max_size)
					));
				}
				out.push(b'S');
				LittleEndian::write_i32(&mut buf[..4], key_max_size as i32);
				out.extend_from_slice(&buf[..4]);
				out.extend_from_slice(s.as_bytes());
				for _ in s.len()..key_max_size {
					out.push(0);
				}
			},
		}

		LittleEndian::write_i64(&mut buf, self.primary);
		out.extend_from_slice(&buf);
		LittleEndian::write_i64(&mut buf, self.list_head);
		out.extend_from_slice(&buf);

		Ok(())
	}

	fn deserialize(data: &[u8]) -> Result<NodeKey> {
		let mut offset = 1;
		let key = match data[0] {
			b'I' => {
				let key = Key::Int(LittleEndian::read_i64(&data[offset..offset + 8]));
				offset += 8;
				key
			},
			b'F' => {
				let key = Key::Float(LittleEndian::read_f64(&data[offset..offset + 8]));
				offset += 8;
				key
			},
			b'D' => {
				let text = ::std::str::from_utf8(&data[offset..offset + 10])
					.map_err(|_| ErrorKind::Table("Corrupted file: key date is not ASCII".into()))?;
				offset += 10;
				Key::Date(text.parse::<Date>()
					.map_err(|_| ErrorKind::Table("Corrupted file: key date is malformed".into()))?)
			},
			b'S' => {
				let length = LittleEndian::read_i32(&data[offset..offset + 4]) as usize;
				offset += 4;
				let raw = &data[offset..offset + length];
				offset += length;
				let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
				Key::Str(String::from_utf8(raw[..end].to_vec())
					.map_err(|_| ErrorKind::Table("Corrupted file: key string is not UTF-8".into()))?)
			},
			_ => bail!(ErrorKind::Table("Corrupted file: unknown key tag".into())),
		};

		let primary = LittleEndian::read_i64(&data[offset..offset + 8]);
		let list_head = LittleEndian::read_i64(&data[offset + 8..offset + 16]);

		Ok(NodeKey { key, primary, list_head })
	}
}

/// One node of the tree, loaded into memory.
#[derive(Debug, Clone)]
pub struct BTreeNode {
	t: usize,
	offset: i64,
	is_leaf: bool,
	keys: Vec<NodeKey>,
	children: Vec<i64>,
}

impl BTreeNode {
	fn new(t: usize, is_leaf: bool) -> BTreeNode {
		BTreeNode {
			t,
			offset: -1,
			is_leaf,
			keys: Vec::new(),
			children: Vec::new(),
		}
	}

	fn max_keys(&self) -> usize {
		2 * self.t - 1
	}

	fn max_children(&self) -> usize {
		2 * self.t
	}

	fn is_full(&self) -> bool {
		self.keys.len() == self.max_keys()
	}

	/// Index of the first key not smaller than `key`.
	fn find_key_index(&self, key: &Key) -> usize {
		let mut idx = 0;
		while idx < self.keys.len() && key.compare(&self.keys[idx].key) == Ordering::Greater {
			idx += 1;
		}
		idx
	}

	// node keys are few, binary insertion sort keeps the slot order stable
	fn sort_keys(&mut self) {
		let keys = ::std::mem::replace(&mut self.keys, Vec::new());
		self.keys = binary_insertion_sort(keys, |a, b| a.key.compare(&b.key));
	}

	fn serialize(&self, key_type: KeyType, key_max_size: usize) -> Result<Vec<u8>> {
		let key_size = key_type.key_size(key_max_size);
		let mut out = Vec::with_capacity(9 + self.max_keys() * key_size + self.max_children() * 8);

		out.push(self.is_leaf as u8);
		let mut buf = [0u8; 8];
		LittleEndian::write_i32(&mut buf[..4], self.keys.len() as i32);
		out.extend_from_slice(&buf[..4]);
		LittleEndian::write_i32(&mut buf[..4], self.children.len() as i32);
		out.extend_from_slice(&buf[..4]);

		for key in &self.keys {
			key.serialize_into(&mut out, key_max_size)?;
		}
		for _ in self.keys.len()..self.max_keys() {
			out.extend(::std::iter::repeat(0).take(key_size));
		}

		for i in 0..self.max_children() {
			let child = self.children.get(i).cloned().unwrap_or(-1);
			LittleEndian::write_i64(&mut buf, child);
			out.extend_from_slice(&buf);
		}

		Ok(out)
	}

	fn deserialize(
		data: &[u8],
		offset: i64,
		t: usize,
		key_type: KeyType,
		key_max_size: usize,
	) -> Result<BTreeNode> {
		let key_size = key_type.key_size(key_max_size);
		let expected = 9 + (2 * t - 1) * key_size + 2 * t * 8;
		if data.len() != expected {
			bail!(ErrorKind::Table(
				format!("Corrupted file: BTree node at offset {} has a wrong length", offset)
			));
		}

		let is_leaf = data[0] == 1;
		let keys_num = LittleEndian::read_i32(&data[1..5]) as usize;
		let children_num = LittleEndian::read_i32(&data[5..9]) as usize;
		if keys_num > 2 * t - 1 || children_num > 2 * t {
			bail!(ErrorKind::Table(
				format!("Corrupted file: BTree node at offset {} has a wrong length", offset)
			));
		}

		let mut cursor = 9;
		let mut keys = Vec::with_capacity(keys_num);
		for _ in 0..keys_num {
			keys.push(NodeKey::deserialize(&data[cursor..cursor + key_size])?);
			cursor += key_size;
		}
		cursor = 9 + (2 * t - 1) * key_size;

		let mut children = Vec::with_capacity(children_num);
		for i in 0..children_num {
			let child = LittleEndian::read_i64(&data[cursor + i * 8..cursor + i * 8 + 8]);
			if child != -1 {
				children.push(child);
			}
		}

		Ok(BTreeNode { t, offset, is_leaf, keys, children })
	}
}

/// The persistent B-tree. Cheap to clone: both managers hold only paths
/// and cached header fields, every record access opens the file anew.
#[derive(Debug, Clone)]
pub struct BTree {
	node_manager: NodeManager,
	pointer_manager: PointerListManager,
}

impl BTree {
	/// Creates the two backing files and an empty leaf root.
	pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(
		t: usize,
		key_type: KeyType,
		key_max_size: usize,
		node_path: P,
		pointer_path: Q,
	) -> Result<BTree> {
		let mut node_manager = NodeManager::create(node_path, t, key_type, key_max_size)?;
		let pointer_manager = PointerListManager::create(pointer_path)?;

		let mut root = BTreeNode::new(t, true);
		let payload = root.serialize(key_type, key_max_size)?;
		root.offset = node_manager.save(None, &payload)?;

		Ok(BTree { node_manager, pointer_manager })
	}

	/// Opens an existing tree.
	pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(node_path: P, pointer_path: Q) -> Result<BTree> {
		Ok(BTree {
			node_manager: NodeManager::open(node_path)?,
			pointer_manager: PointerListManager::open(pointer_path)?,
		})
	}

	fn t(&self) -> usize {
		self.node_manager.t
	}

	fn load_node(&self, offset: i64) -> Result<BTreeNode> {
		let payload = self.node_manager.load(offset)?;
		BTreeNode::deserialize(
			&payload,
			offset,
			self.node_manager.t,
			self.node_manager.key_type,
			self.node_manager.key_max_size,
		)
	}

	fn save_node(&mut self, node: &mut BTreeNode) -> Result<i64> {
		let payload = node.serialize(self.node_manager.key_type, self.node_manager.key_max_size)?;
		let offset = if node.offset == -1 { None } else { Some(node.offset) };
		node.offset = self.node_manager.save(offset, &payload)?;
		Ok(node.offset)
	}

	fn pointers_for(&self, key: &NodeKey) -> Result<Vec<i64>> {
		let mut pointers = vec![key.primary];
		if key.list_head != -1 {
			pointers.extend(self.pointer_manager.traverse(key.list_head)?);
		}
		Ok(pointers)
	}

	/// Every heap offset stored under `key`: the primary pointer followed
	/// by the duplicate list, or `None` on a miss.
	pub fn search(&self, key: &Key) -> Result<Option<Vec<i64>>> {
		match self.search_entry(key)? {
			Some((node, idx)) => self.pointers_for(&node.keys[idx]).map(Some),
			None => Ok(None),
		}
	}

	fn search_entry(&self, key: &Key) -> Result<Option<(BTreeNode, usize)>> {
		if self.node_manager.root_offset == -1 {
			return Ok(None);
		}
		self.search_in(self.node_manager.root_offset, key)
	}

	fn search_in(&self, node_offset: i64, key: &Key) -> Result<Option<(BTreeNode, usize)>> {
		let node = self.load_node(node_offset)?;
		let idx = node.find_key_index(key);

		if idx < node.keys.len() && node.keys[idx].key == *key {
			return Ok(Some((node, idx)));
		}
		if node.is_leaf {
			return Ok(None);
		}

		let child = node.children[idx];
		self.search_in(child, key)
	}

	/// Registers `pointer` under `key`, creating the key if needed or
	/// extending its duplicate list if it already exists.
	pub fn insert(&mut self, key: Key, pointer: i64) -> Result<()> {
		// an emptied tree grows a fresh root
		if self.node_manager.root_offset == -1 {
			let mut root = BTreeNode::new(self.t(), true);
			root.keys.push(NodeKey { key, primary: pointer, list_head: -1 });
			let offset = self.save_node(&mut root)?;
			self.node_manager.root_offset = offset;
			self.node_manager.update_header()?;
			return Ok(());
		}

		if let Some((mut node, idx)) = self.search_entry(&key)? {
			if node.keys[idx].list_head == -1 {
				let head = self.pointer_manager.create_list(pointer)?;
				node.keys[idx].list_head = head;
				self.save_node(&mut node)?;
			} else {
				let head = node.keys[idx].list_head;
				self.pointer_manager.append(head, pointer)?;
			}
			return Ok(());
		}

		let root = self.load_node(self.node_manager.root_offset)?;

		if root.is_full() {
			let mut new_root = BTreeNode::new(self.t(), false);
			new_root.children.push(root.offset);
			self.split_child(&mut new_root, 0)?;

			let new_root_offset = self.save_node(&mut new_root)?;
			self.node_manager.root_offset = new_root_offset;
			self.node_manager.update_header()?;

			self.insert_non_full(&mut new_root, key, pointer)?;
			self.save_node(&mut new_root)?;
		} else {
			let mut root = root;
			self.insert_non_full(&mut root, key, pointer)?;
			self.save_node(&mut root)?;
		}

		Ok(())
	}

	fn insert_non_full(&mut self, node: &mut BTreeNode, key: Key, pointer: i64) -> Result<()> {
		if node.is_leaf {
			node.keys.push(NodeKey { key, primary: pointer, list_head: -1 });
			node.sort_keys();
			return Ok(());
		}

		let mut idx = node.keys.len();
		while idx > 0 && key.compare(&node.keys[idx - 1].key) == Ordering::Less {
			idx -= 1;
		}

		let mut child = self.load_node(node.children[idx])?;
		if child.is_full() {
			self.split_child(node, idx)?;
			if key.compare(&node.keys[idx].key) == Ordering::Greater {
				idx += 1;
			}
			child = self.load_node(node.children[idx])?;
		}

		self.insert_non_full(&mut child, key, pointer)?;
		self.save_node(&mut child)?;

		Ok(())
	}

	// Splits the full child at `idx`, promoting its middle key into the
	// parent. Both halves are rewritten, the parent gains the new child.
	fn split_child(&mut self, parent: &mut BTreeNode, idx: usize) -> Result<()> {
		let t = self.t();
		let mut child = self.load_node(parent.children[idx])?;
		let mut sibling = BTreeNode::new(t, child.is_leaf);

		parent.keys.insert(idx, child.keys[t - 1].clone());
		sibling.keys = child.keys.split_off(t);
		child.keys.truncate(t - 1);

		if !child.is_leaf {
			sibling.children = child.children.split_off(t);
		}

		self.save_node(&mut child)?;
		let sibling_offset = self.save_node(&mut sibling)?;
		parent.children.insert(idx + 1, sibling_offset);

		self.save_node(parent)?;

		Ok(())
	}

	/// Removes `key` and rebalances. Removing the last key of a leaf root
	/// empties the tree (`root_offset` becomes `-1`).
	pub fn delete(&mut self, key: &Key) -> Result<()> {
		if self.node_manager.root_offset == -1 {
			return Ok(());
		}

		let mut root = self.load_node(self.node_manager.root_offset)?;
		self.delete_from_node(&mut root, key)?;
		self.save_node(&mut root)?;

		if root.keys.is_empty() {
			if !root.is_leaf {
				self.node_manager.root_offset = root.children[0];
			} else {
				self.node_manager.root_offset = -1;
			}
			self.node_manager.update_header()?;
		}

		Ok(())
	}

	fn delete_from_node(&mut self, node: &mut BTreeNode, key: &Key) -> Result<()> {
		let idx = node.find_key_index(key);

		if idx < node.keys.len() && node.keys[idx].key == *key {
			if node.is_leaf {
				node.keys.remove(idx);
			} else {
				self.delete_internal(node, idx)?;
			}
			self.save_node(node)?;
			return Ok(());
		}

		if node.is_leaf {
			return Ok(());
		}

		let mut idx = idx;
		let child = self.load_node(node.children[idx])?;
		if child.keys.len() < self.t() {
			self.fix_child(node, idx)?;
			// a merge into the left sibling shifts the descent target
			if idx >= node.children.len() {
				idx = node.children.len() - 1;
			}
		}

		let mut child = self.load_node(node.children[idx])?;
		self.delete_from_node(&mut child, key)?;
		self.save_node(&mut child)?;

		Ok(())
	}

	fn delete_internal(&mut self, node: &mut BTreeNode, idx: usize) -> Result<()> {
		let t = self.t();
		let key = node.keys[idx].clone();
		let left = self.load_node(node.children[idx])?;
		let right = self.load_node(node.children[idx + 1])?;

		if left.keys.len() >= t {
			let pred = self.predecessor(node, idx)?;
			node.keys[idx] = pred.clone();
			self.save_node(node)?;

			let mut left = left;
			self.delete_from_node(&mut left, &pred.key)?;
			self.save_node(&mut left)?;
		} else if right.keys.len() >= t {
			let succ = self.successor(node, idx)?;
			node.keys[idx] = succ.clone();
			self.save_node(node)?;

			let mut right = right;
			self.delete_from_node(&mut right, &succ.key)?;
			self.save_node(&mut right)?;
		} else {
			self.merge(node, idx)?;
			self.save_node(node)?;

			let mut merged = self.load_node(node.children[idx])?;
			self.delete_from_node(&mut merged, &key.key)?;
			self.save_node(&mut merged)?;
		}

		Ok(())
	}

	// Ensures the child at `idx` has at least `t` keys before descending,
	// borrowing from a rich sibling or merging with a poor one.
	fn fix_child(&mut self, parent: &mut BTreeNode, idx: usize) -> Result<()> {
		let t = self.t();

		if idx > 0 {
			let left = self.load_node(parent.children[idx - 1])?;
			if left.keys.len() >= t {
				return self.borrow_from_left(parent, idx);
			}
		}

		if idx < parent.children.len() - 1 {
			let right = self.load_node(parent.children[idx + 1])?;
			if right.keys.len() >= t {
				return self.borrow_from_right(parent, idx);
			}
		}

		if idx < parent.children.len() - 1 {
			self.merge(parent, idx)
		} else {
			self.merge(parent, idx - 1)
		}
	}

	fn merge(&mut self, parent: &mut BTreeNode, idx: usize) -> Result<()> {
		let mut left = self.load_node(parent.children[idx])?;
		let right = self.load_node(parent.children[idx + 1])?;

		left.keys.push(parent.keys[idx].clone());
		left.keys.extend(right.keys);

		if !left.is_leaf {
			left.children.extend(right.children);
		}

		parent.keys.remove(idx);
		parent.children.remove(idx + 1);

		self.save_node(parent)?;
		self.save_node(&mut left)?;

		Ok(())
	}

	fn borrow_from_left(&mut self, parent: &mut BTreeNode, idx: usize) -> Result<()> {
		let mut child = self.load_node(parent.children[idx])?;
		let mut left = self.load_node(parent.children[idx - 1])?;

		child.keys.insert(0, parent.keys[idx - 1].clone());
		parent.keys[idx - 1] = left.keys.pop()
			.expect("the sibling was checked to have at least t keys; qed");

		if !child.is_leaf {
			let grandchild = left.children.pop()
				.expect("an internal node has one more child than keys; qed");
			child.children.insert(0, grandchild);
		}

		self.save_node(parent)?;
		self.save_node(&mut child)?;
		self.save_node(&mut left)?;

		Ok(())
	}

	fn borrow_from_right(&mut self, parent: &mut BTreeNode, idx: usize) -> Result<()> {
		let mut child = self.load_node(parent.children[idx])?;
		let mut right = self.load_node(parent.children[idx + 1])?;

		child.keys.push(parent.keys[idx].clone());
		parent.keys[idx] = right.keys.remove(0);

		if !child.is_leaf {
			child.children.push(right.children.remove(0));
		}

		self.save_node(parent)?;
		self.save_node(&mut child)?;
		self.save_node(&mut right)?;

		Ok(())
	}

	fn predecessor(&self, node: &BTreeNode, idx: usize) -> Result<NodeKey> {
		let mut current = self.load_node(node.children[idx])?;
		while !current.is_leaf {
			let last = *current.children.last()
				.expect("an internal node always has children; qed");
			current = self.load_node(last)?;
		}
		Ok(current.keys.last()
			.expect("a non-root node always holds at least t-1 keys; qed")
			.clone())
	}

	fn successor(&self, node: &BTreeNode, idx: usize) -> Result<NodeKey> {
		let mut current = self.load_node(node.children[idx + 1])?;
		while !current.is_leaf {
			let first = current.children[0];
			current = self.load_node(first)?;
		}
		Ok(current.keys[0].clone())
	}

	/// Detaches one heap pointer from `key`. The key itself is removed
	/// only when its last pointer goes; otherwise the duplicate list
	/// donates a new primary pointer.
	pub fn delete_pointer(&mut self, key: &Key, pointer: i64) -> Result<()> {
		let (mut node, idx) = match self.search_entry(key)? {
			Some(hit) => hit,
			None => return Ok(()),
		};

		let primary = node.keys[idx].primary;
		let head = node.keys[idx].list_head;

		if primary == pointer {
			if head == -1 {
				return self.delete(key);
			}
			let new_primary = self.pointer_manager.first(head)?;
			node.keys[idx].primary = new_primary;
			node.keys[idx].list_head = self.pointer_manager.delete(head, new_primary)?;
		} else {
			node.keys[idx].list_head = self.pointer_manager.delete(head, pointer)?;
		}

		self.save_node(&mut node)?;

		Ok(())
	}

	/// Lazy ordered stream of pointer lists for all keys in
	/// `[lower, upper]` (both bounds inclusive).
	pub fn range_search(&self, lower: Key, upper: Key) -> RangeSearch {
		let mut search = RangeSearch {
			tree: self.clone(),
			lower,
			upper,
			stack: Vec::new(),
			finished: false,
			pending_error: None,
		};

		if self.node_manager.root_offset == -1 {
			search.finished = true;
			return search;
		}

		match self.load_node(self.node_manager.root_offset) {
			Ok(node) => search.stack.push(Frame::new(node)),
			Err(err) => search.pending_error = Some(err),
		}

		search
	}
}

/// In-order streaming over a key range; see [`BTree::range_search`].
pub struct RangeSearch {
	tree: BTree,
	lower: Key,
	upper: Key,
	stack: Vec<Frame>,
	finished: bool,
	pending_error: Option<::error::Error>,
}

struct Frame {
	node: BTreeNode,
	idx: usize,
	state: FrameState,
}

#[derive(Clone, Copy, PartialEq)]
enum FrameState {
	// skipping keys below the lower bound
	Lower,
	// streaming keys within the bounds
	Within,
	// a child subtree was streamed, the key above it is due
	WithinEmit,
	// the last child remains
	Final,
	Done,
}

impl Frame {
	fn new(node: BTreeNode) -> Frame {
		Frame { node, idx: 0, state: FrameState::Lower }
	}
}

enum Step {
	Continue,
	Pop,
	Push(i64),
	Emit(NodeKey),
}

impl Iterator for RangeSearch {
	type Item = Result<Vec<i64>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished {
			return None;
		}
		if let Some(err) = self.pending_error.take() {
			self.finished = true;
			return Some(Err(err));
		}

		loop {
			let step = {
				let frame = match self.stack.last_mut() {
					Some(frame) => frame,
					None => {
						self.finished = true;
						return None;
					},
				};

				match frame.state {
					FrameState::Lower => {
						if frame.idx < frame.node.keys.len()
							&& frame.node.keys[frame.idx].key.compare(&self.lower) == Ordering::Less
						{
							let child = if frame.node.is_leaf {
								None
							} else {
								Some(frame.node.children[frame.idx])
							};
							frame.idx += 1;
							match child {
								Some(offset) => Step::Push(offset),
								None => Step::Continue,
							}
						} else {
							frame.state = FrameState::Within;
							Step::Continue
						}
					},
					FrameState::Within => {
						if frame.idx < frame.node.keys.len()
							&& frame.node.keys[frame.idx].key.compare(&self.upper) != Ordering::Greater
						{
							if frame.node.is_leaf {
								let key = frame.node.keys[frame.idx].clone();
								frame.idx += 1;
								Step::Emit(key)
							} else {
								frame.state = FrameState::WithinEmit;
								Step::Push(frame.node.children[frame.idx])
							}
						} else {
							frame.state = FrameState::Final;
							Step::Continue
						}
					},
					FrameState::WithinEmit => {
						frame.state = FrameState::Within;
						let key = frame.node.keys[frame.idx].clone();
						frame.idx += 1;
						Step::Emit(key)
					},
					FrameState::Final => {
						frame.state = FrameState::Done;
						if frame.node.is_leaf {
							Step::Continue
						} else {
							Step::Push(frame.node.children[frame.idx])
						}
					},
					FrameState::Done => Step::Pop,
				}
			};

			match step {
				Step::Continue => continue,
				Step::Pop => {
					self.stack.pop();
				},
				Step::Push(offset) => match self.tree.load_node(offset) {
					Ok(node) => self.stack.push(Frame::new(node)),
					Err(err) => {
						self.finished = true;
						return Some(Err(err));
					},
				},
				Step::Emit(key) => match self.tree.pointers_for(&key) {
					Ok(pointers) => return Some(Ok(pointers)),
					Err(err) => {
						self.finished = true;
						return Some(Err(err));
					},
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use super::{BTree, Key, KeyType};

	fn int_tree(temp: &TempDir) -> BTree {
		BTree::create(
			3,
			KeyType::Number,
			0,
			temp.path().join("idx.index"),
			temp.path().join("idx.data"),
		).unwrap()
	}

	// walks the whole tree checking the textbook shape rules
	fn assert_shape(tree: &BTree) {
		let root_offset = tree.node_manager.root_offset;
		if root_offset == -1 {
			return;
		}

		let mut leaf_depth = None;
		let mut stack = vec![(root_offset, 0usize, true)];

		while let Some((offset, depth, is_root)) = stack.pop() {
			let node = tree.load_node(offset).unwrap();
			let t = tree.t();

			if !is_root {
				assert!(node.keys.len() >= t - 1, "node below minimum occupancy");
			}
			assert!(node.keys.len() <= 2 * t - 1, "node above maximum occupancy");

			for pair in node.keys.windows(2) {
				assert!(
					pair[0].key.compare(&pair[1].key) == ::std::cmp::Ordering::Less,
					"keys within a node must be strictly increasing"
				);
			}

			if node.is_leaf {
				assert!(node.children.is_empty());
				match leaf_depth {
					None => leaf_depth = Some(depth),
					Some(expected) => assert_eq!(expected, depth, "all leaves at equal depth"),
				}
			} else {
				assert_eq!(node.children.len(), node.keys.len() + 1);
				for child in &node.children {
					stack.push((*child, depth + 1, false));
				}
			}
		}
	}

	#[test]
	fn test_insert_search_with_splits() {
		let temp = TempDir::new("btree_insert").unwrap();
		let mut tree = int_tree(&temp);

		for i in 0..50 {
			tree.insert(Key::Int(i), i * 10).unwrap();
		}
		assert_shape(&tree);

		for i in 0..50 {
			assert_eq!(tree.search(&Key::Int(i)).unwrap().unwrap(), vec![i * 10]);
		}
		assert_eq!(tree.search(&Key::Int(50)).unwrap(), None);
	}

	#[test]
	fn test_duplicate_keys_collect_pointers() {
		let temp = TempDir::new("btree_duplicates").unwrap();
		let mut tree = int_tree(&temp);

		tree.insert(Key::Int(7), 100).unwrap();
		tree.insert(Key::Int(7), 200).unwrap();
		tree.insert(Key::Int(7), 300).unwrap();

		assert_eq!(tree.search(&Key::Int(7)).unwrap().unwrap(), vec![100, 200, 300]);
	}

	#[test]
	fn test_delete_rebalances() {
		let temp = TempDir::new("btree_delete").unwrap();
		let mut tree = int_tree(&temp);

		for i in 0..50 {
			tree.insert(Key::Int(i), i).unwrap();
		}
		for i in (0..50).filter(|i| i % 3 == 0) {
			tree.delete(&Key::Int(i)).unwrap();
			assert_shape(&tree);
		}

		for i in 0..50 {
			let found = tree.search(&Key::Int(i)).unwrap();
			if i % 3 == 0 {
				assert_eq!(found, None);
			} else {
				assert_eq!(found.unwrap(), vec![i]);
			}
		}
	}

	#[test]
	fn test_delete_everything_empties_the_tree() {
		let temp = TempDir::new("btree_empty").unwrap();
		let mut tree = int_tree(&temp);

		for i in 0..20 {
			tree.insert(Key::Int(i), i).unwrap();
		}
		for i in 0..20 {
			tree.delete(&Key::Int(i)).unwrap();
		}

		assert_eq!(tree.node_manager.root_offset, -1);
		assert_eq!(tree.search(&Key::Int(3)).unwrap(), None);
		assert_eq!(tree.range_search(Key::Int(0), Key::Int(100)).count(), 0);

		// the tree grows back from empty
		tree.insert(Key::Int(5), 55).unwrap();
		assert_eq!(tree.search(&Key::Int(5)).unwrap().unwrap(), vec![55]);
	}

	#[test]
	fn test_delete_pointer_promotes_duplicates() {
		let temp = TempDir::new("btree_delete_pointer").unwrap();
		let mut tree = int_tree(&temp);

		tree.insert(Key::Int(1), 10).unwrap();
		tree.insert(Key::Int(1), 20).unwrap();
		tree.insert(Key::Int(1), 30).unwrap();

		// the primary goes, the first duplicate takes over
		tree.delete_pointer(&Key::Int(1), 10).unwrap();
		assert_eq!(tree.search(&Key::Int(1)).unwrap().unwrap(), vec![20, 30]);

		// a duplicate goes
		tree.delete_pointer(&Key::Int(1), 30).unwrap();
		assert_eq!(tree.search(&Key::Int(1)).unwrap().unwrap(), vec![20]);

		// the last pointer removes the key itself
		tree.delete_pointer(&Key::Int(1), 20).unwrap();
		assert_eq!(tree.search(&Key::Int(1)).unwrap(), None);
	}

	#[test]
	fn test_range_search_is_ordered_and_bounded() {
		let temp = TempDir::new("btree_range").unwrap();
		let mut tree = int_tree(&temp);

		for i in (0..60).rev() {
			tree.insert(Key::Int(i), i).unwrap();
		}

		let hits: Vec<i64> = tree.range_search(Key::Int(10), Key::Int(20))
			.map(|lists| lists.unwrap())
			.flat_map(|lists| lists)
			.collect();
		assert_eq!(hits, (10..21).collect::<Vec<i64>>());

		let all: Vec<i64> = tree
			.range_search(Key::Float(::std::f64::NEG_INFINITY), Key::Float(::std::f64::INFINITY))
			.map(|lists| lists.unwrap())
			.flat_map(|lists| lists)
			.collect();
		assert_eq!(all, (0..60).collect::<Vec<i64>>());
	}

	#[test]
	fn test_string_keys_roundtrip_with_padding() {
		let temp = TempDir::new("btree_strings").unwrap();
		let mut tree = BTree::create(
			3,
			KeyType::Str,
			8,
			temp.path().join("idx.index"),
			temp.path().join("idx.data"),
		).unwrap();

		for name in &["pine", "oak", "fir", "birch", "aspen", "cedar", "elm"] {
			tree.insert(Key::Str(name.to_string()), name.len() as i64).unwrap();
		}

		assert_eq!(tree.search(&Key::Str("oak".into())).unwrap().unwrap(), vec![3]);
		assert_eq!(tree.search(&Key::Str("oa".into())).unwrap(), None);

		let ordered: Vec<i64> = tree
			.range_search(Key::Str(" ".into()), Key::Str("~~~~~~~~".into()))
			.map(|lists| lists.unwrap())
			.flat_map(|lists| lists)
			.collect();
		// aspen birch cedar elm fir oak pine
		assert_eq!(ordered, vec![5, 5, 5, 3, 3, 3, 4]);
	}

	#[test]
	fn test_reopen_preserves_the_tree() {
		let temp = TempDir::new("btree_reopen").unwrap();
		{
			let mut tree = int_tree(&temp);
			for i in 0..30 {
				tree.insert(Key::Int(i), i).unwrap();
			}
		}

		let tree = BTree::open(
			temp.path().join("idx.index"),
			temp.path().join("idx.data"),
		).unwrap();
		assert_shape(&tree);
		for i in 0..30 {
			assert_eq!(tree.search(&Key::Int(i)).unwrap().unwrap(), vec![i]);
		}
	}
}
