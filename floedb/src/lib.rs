//! Single-node relational storage engine.
//!
//! Assumptions:
//!
//! - a catalog of independent tables on local disk
//!
//! - rows live in a heap file as a doubly-linked list of
//!   variable-length records with free-slot reuse
//!
//! - one optional B-tree index per column, persisted in its own files
//!
//! - a restricted SQL-like statement surface, executed synchronously on
//!   the caller's thread
//!
//! Each table occupies one directory:
//!
//! ```text
//! <root>/<table>/<table>.data           heap file
//! <root>/<table>/<table>.meta           checksummed textual metadata
//! <root>/<table>/<index>_index.index    B-tree node file
//! <root>/<table>/<index>_index.data     duplicate-pointer-list file
//! ```
//!
//! A heap record is a node of the row list:
//!
//! ```text
//!  checksum   header             row
//!   /          /                  /
//! | u32 | prev | next | row_len | ... |
//! ```
//!
//! Every persisted record in every file carries a 32-bit polynomial
//! rolling hash; a mismatch on read fails the operation rather than
//! silently serving corrupt state.
//!
//! `DISTINCT` and `ORDER BY` are realized by an external k-way merge
//! sort, so result sets never need to fit in memory.

#![warn(missing_docs)]

extern crate byteorder;
#[macro_use]
extern crate error_chain;
extern crate fs2;
extern crate hex_slice;
extern crate indexmap;
extern crate itertools;
#[macro_use]
extern crate log;
extern crate rand;
#[cfg(test)]
#[macro_use]
extern crate matches;
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod btree;
mod column;
mod database;
mod date;
mod error;
mod hash;
mod index;
mod merge_sort;
mod metadata;
mod query;
mod row;
mod sort;
mod table;
mod value;

pub use column::{Column, ColumnType};
pub use database::{Database, Options};
pub use date::Date;
pub use error::{Error, ErrorKind, Result};
pub use merge_sort::SortOrder;
pub use metadata::{FreeSlot, IndexEntry, Metadata};
pub use query::statement::{QueryResult, Rows};
pub use row::Row;
pub use table::{GetRows, ScanRows, Table, TableInfo};
pub use value::{Number, Value};
