//! Top-level catalog handle and the statement entry point.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use error::{ErrorKind, Result};
use query::parser::Parser;
use query::statement::QueryResult;
use query::tokenizer::Tokenizer;
use table::Table;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
	/// Rows buffered per run by the external merge sort.
	pub sort_chunk_size: usize,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			sort_chunk_size: 1000,
		}
	}
}

impl Options {
	fn validate(self) -> Result<Options> {
		if self.sort_chunk_size == 0 {
			bail!(ErrorKind::InvalidOptions(
				"sort_chunk_size",
				"must not be 0.".into()
			));
		}
		Ok(self)
	}
}

/// A database: a directory of tables, one subdirectory each.
///
/// The handle holds an exclusive advisory lock for its lifetime; the
/// engine itself is single-threaded and unsynchronized, the lock only
/// keeps a second process out.
#[derive(Debug)]
pub struct Database {
	root: PathBuf,
	options: Options,
	lock_file: File,
}

impl Database {
	const LOCK_FILE: &'static str = "LOCK";

	/// Opens (creating it if needed) the database at `root`.
	pub fn open<P: AsRef<Path>>(root: P, options: Options) -> Result<Database> {
		let options = options.validate()?;
		let root = root.as_ref().to_path_buf();
		fs::create_dir_all(&root)?;

		let lock_file_path = root.join(Self::LOCK_FILE);
		let lock_file = fs::OpenOptions::new()
			.write(true)
			.create(true)
			.open(&lock_file_path)?;
		lock_file.try_lock_exclusive()
			.map_err(|_| ErrorKind::DatabaseLocked(lock_file_path))?;

		Ok(Database { root, options, lock_file })
	}

	/// The directory the tables live in.
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Opens a table of this database by name.
	pub fn table(&self, name: &str) -> Result<Table> {
		Table::open(&self.root, name)
	}

	/// Tokenizes, parses and executes one statement string.
	pub fn execute_statement(&self, query: &str) -> Result<QueryResult> {
		let tokens = Tokenizer::tokenize(query);
		let statement = Parser::parse(tokens)?;
		statement.execute(&self.root, &self.options)
	}
}

impl Drop for Database {
	fn drop(&mut self) {
		let _ = self.lock_file.unlock();
	}
}
