extern crate clap;
extern crate floedb;

use std::io::{self, BufRead, Write};

use clap::{App, Arg};
use floedb::{Database, ErrorKind, Options, QueryResult};

fn print_rows(result: QueryResult) {
	let columns = match result.columns {
		Some(columns) => columns,
		None => return,
	};
	let rows = match result.rows {
		Some(rows) => rows,
		None => return,
	};

	let header: Vec<&str> = columns.keys().map(|name| name.as_str()).collect();
	println!("{}", header.join(" | "));

	for row in rows {
		match row {
			Ok(row) => {
				let cells: Vec<String> = columns.keys()
					.map(|name| row.get(name).map(|v| v.to_string()).unwrap_or_default())
					.collect();
				println!("{}", cells.join(" | "));
			},
			Err(err) => {
				report(&err);
				return;
			},
		}
	}
}

fn print_tableinfo(result: &QueryResult) {
	let info = match result.tableinfo {
		Some(ref info) => info,
		None => return,
	};

	println!("-----------------------------");
	println!("Total number of rows: {}.", info.rows_count);
	println!("Metadata file size: {}", format_size(info.metadata_file_size));
	println!("Data file size: {}", format_size(info.data_file_size));
	println!("Columns:");
	for &(ref name, ref col_type) in &info.columns {
		println!("{}: {}", name, col_type);
	}
	if !info.indexes.is_empty() {
		println!("Indexes: {}", info.indexes.join(", "));
	}
	println!("-----------------------------");
}

fn format_size(mut size: u64) -> String {
	for unit in &["bytes", "KB", "MB"] {
		if size < 1024 {
			return format!("{} {}", size, unit);
		}
		size /= 1024;
	}
	format!("{} GB", size)
}

fn report(err: &floedb::Error) {
	match *err.kind() {
		ErrorKind::Parse(_) => println!("Invalid query: {}", err),
		ErrorKind::Table(_) | ErrorKind::Corrupted(_, _) => println!("{}", err),
		ErrorKind::Value(_) => println!("{}", err),
		ErrorKind::OutOfRange(_) => println!("{}", err),
		_ => println!("General Error: {}", err),
	}
}

fn run(db: &Database, query: &str) {
	match db.execute_statement(query) {
		Ok(result) => {
			println!("{}", result.message);
			print_tableinfo(&result);
			print_rows(result);
		},
		Err(err) => report(&err),
	}
}

fn main() {
	let matches =
		App::new("floedb-cli")
			.version("0.1.0")
			.about("A simple command line interface for floedb")
			.arg(Arg::with_name("DIR")
				.help("Directory the tables live in")
				.required(true))
			.arg(Arg::with_name("QUERY")
				.short("q")
				.long("query")
				.help("Execute a single statement and exit")
				.takes_value(true))
			.get_matches();

	let dir = matches.value_of("DIR").expect("DIR is a required argument; qed");
	let db = match Database::open(dir, Options::default()) {
		Ok(db) => db,
		Err(err) => {
			println!("{}", err);
			return;
		},
	};

	if let Some(query) = matches.value_of("QUERY") {
		run(&db, query);
		return;
	}

	let stdin = io::stdin();
	loop {
		print!("> ");
		io::stdout().flush().expect("stdout is writable; qed");

		let mut line = String::new();
		match stdin.lock().read_line(&mut line) {
			Ok(0) => break,
			Ok(_) => {},
			Err(_) => break,
		}

		let query = line.trim();
		if query == "e" || query == "exit" {
			break;
		}
		if query.is_empty() {
			continue;
		}

		run(&db, query);
	}
}
