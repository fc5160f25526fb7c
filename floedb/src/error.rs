#![allow(unknown_lints)]
#![allow(missing_docs)]

use std::{io, num};
use std::path::PathBuf;

error_chain! {
	foreign_links {
		Io(io::Error);
		ParseInt(num::ParseIntError);
		ParseFloat(num::ParseFloatError);
	}

	errors {
		Parse(msg: String) {
			description("Statement violates the grammar or names a missing column"),
			display("Invalid query: {}", msg),
		}
		Table(msg: String) {
			description("Table layout is wrong or a required part is missing"),
			display("Error with table: {}", msg),
		}
		Corrupted(path: PathBuf, msg: String) {
			description("Stored checksum does not match the record"),
			display("Corrupted file: {} (at {})", msg, path.display()),
		}
		Value(msg: String) {
			description("Value rejected by a column validator"),
			display("Invalid value: {}", msg),
		}
		OutOfRange(msg: String) {
			description("Row number is past the end of the table"),
			display("Out of range: {}", msg),
		}
		InvalidOptions(field: &'static str, error: String) {
			description("Invalid options were provided"),
			display("Invalid value of `{}`: {}", field, error),
		}
		DatabaseLocked(path: PathBuf) {
			description("Database file lock is currently acquired"),
			display("Could not acquire database file lock: {}. \
					 If you're sure that no other process is using \
					 the database you can delete this file.", path.display()),
		}
	}
}

impl PartialEq for ErrorKind {
	fn eq(&self, other: &Self) -> bool {
		use self::ErrorKind::*;

		match (self, other) {
			(&Parse(ref msg), &Parse(ref msg2))
				if msg == msg2 => true,
			(&Table(ref msg), &Table(ref msg2))
				if msg == msg2 => true,
			(&Corrupted(ref path, ref msg), &Corrupted(ref path2, ref msg2))
				if path == path2 && msg == msg2 => true,
			(&Value(ref msg), &Value(ref msg2))
				if msg == msg2 => true,
			(&OutOfRange(ref msg), &OutOfRange(ref msg2))
				if msg == msg2 => true,
			(&InvalidOptions(field, ref error), &InvalidOptions(field2, ref error2))
				if field == field2 && error == error2 => true,
			(&DatabaseLocked(ref path), &DatabaseLocked(ref path2))
				if path == path2 => true,
			_ => false,
		}
	}
}
