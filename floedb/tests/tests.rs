extern crate floedb;
extern crate tempdir;

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tempdir::TempDir;
use floedb::{Database, ErrorKind, Options, Row};

#[derive(Debug)]
enum Action {
	Exec(&'static str),
	ExecErr(&'static str),
	AssertRows(&'static str, &'static [&'static [&'static str]]),
	AssertRowCount(&'static str, u64),
}

use Action::*;

fn cells(row: &Row) -> Vec<String> {
	row.values().map(|value| value.to_string()).collect()
}

fn fetch(db: &Database, query: &str) -> Vec<Vec<String>> {
	let result = db.execute_statement(query).unwrap();
	result.rows.expect("the statement yields rows")
		.map(|row| cells(&row.unwrap()))
		.collect()
}

fn run_actions(db: &Database, actions: &[Action]) {
	for action in actions {
		println!("action: {:?}", action);
		match *action {
			Exec(query) => {
				db.execute_statement(query).unwrap();
			},
			ExecErr(query) => {
				assert!(db.execute_statement(query).is_err());
			},
			AssertRows(query, expected) => {
				let got = fetch(db, query);
				let expected: Vec<Vec<String>> = expected.iter()
					.map(|row| row.iter().map(|cell| cell.to_string()).collect())
					.collect();
				assert_eq!(got, expected);
			},
			AssertRowCount(table, expected) => {
				assert_eq!(db.table(table).unwrap().metadata.rows_count, expected);
			},
		}
	}
}

macro_rules! db_test {
	($name: tt, $($actions: expr),*) => {
		#[test]
		fn $name() {
			let temp = TempDir::new(stringify!($name)).unwrap();
			let db = Database::open(temp.path(), Options::default()).unwrap();

			run_actions(&db, &[$($actions),*]);
		}
	}
}

db_test!(
	test_create_insert_scan,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb');"),
	AssertRows("SELECT * FROM t;", &[&["1", "a"], &["2", "bb"]]),
	AssertRowCount("t", 2)
);

db_test!(
	test_positional_delete_then_get,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb');"),
	Exec("DELETE FROM t ROW 1;"),
	AssertRows("GET ROW 1 FROM t;", &[&["2", "bb"]]),
	AssertRowCount("t", 1)
);

db_test!(
	test_positional_get_out_of_range,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a');"),
	ExecErr("DELETE FROM t ROW 5;")
);

db_test!(
	test_defaults_and_validators,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:4 DEFAULT:'none');"),
	Exec("INSERT INTO t (id) VALUES (1);"),
	AssertRows("SELECT * FROM t;", &[&["1", "none"]]),
	// over MAX_SIZE
	ExecErr("INSERT INTO t (id, name) VALUES (2, 'abcde');"),
	// wrong type
	ExecErr("INSERT INTO t (id, name) VALUES ('x', 'ab');"),
	// mandatory column missing
	ExecErr("INSERT INTO t (name) VALUES ('ab');")
);

db_test!(
	test_delete_where,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'a'), (4, 'c');"),
	Exec("DELETE FROM t WHERE name = 'a';"),
	AssertRows("SELECT id FROM t;", &[&["2"], &["4"]]),
	AssertRowCount("t", 2)
);

db_test!(
	test_select_where_without_index,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb'), (3, 'c');"),
	AssertRows("SELECT name FROM t WHERE id >= 2 AND NOT name = 'c';", &[&["bb"]]),
	AssertRows("SELECT name FROM t WHERE id = 1 OR name = 'c';", &[&["a"], &["c"]]),
	ExecErr("SELECT name FROM t WHERE id < 'abc';")
);

db_test!(
	test_select_projection_rules,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a');"),
	AssertRows("SELECT name, id FROM t;", &[&["a", "1"]]),
	// * only as the sole projection
	ExecErr("SELECT *, id FROM t;"),
	ExecErr("SELECT ghost FROM t;"),
	ExecErr("SELECT id FROM t ORDER BY name;")
);

db_test!(
	test_distinct_with_order,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES \
		  (1, 'a'), (2, 'a'), (3, 'b'), (4, 'b'), (5, 'a'), (6, 'c');"),
	AssertRows("SELECT DISTINCT name FROM t ORDER BY name ASC;", &[&["a"], &["b"], &["c"]]),
	AssertRows("SELECT DISTINCT name FROM t ORDER BY name DESC;", &[&["c"], &["b"], &["a"]])
);

db_test!(
	test_index_plans,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb'), (3, 'c'), (4, 'dd');"),
	Exec("CREATE INDEX idx_id ON t (id);"),
	AssertRows("SELECT * FROM t WHERE id >= 2;", &[&["2", "bb"], &["3", "c"], &["4", "dd"]]),
	AssertRows("SELECT name FROM t WHERE id = 3;", &[&["c"]]),
	AssertRows("SELECT name FROM t WHERE id != 3;", &[&["a"], &["bb"], &["dd"]]),
	AssertRows("SELECT name FROM t WHERE id >= 2 AND id < 4;", &[&["bb"], &["c"]]),
	AssertRows("SELECT name FROM t WHERE id <= 1 OR id > 3;", &[&["a"], &["dd"]]),
	// flipped operands reach the same plan
	AssertRows("SELECT name FROM t WHERE 2 <= id AND 4 > id;", &[&["bb"], &["c"]]),
	Exec("DROP INDEX idx_id ON t;"),
	AssertRows("SELECT name FROM t WHERE id = 3;", &[&["c"]]),
	ExecErr("DROP INDEX idx_id ON t;")
);

db_test!(
	test_index_follows_mutations,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:10);"),
	Exec("CREATE INDEX idx_id ON t (id);"),
	Exec("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b'), (2, 'c'), (3, 'd');"),
	AssertRows("SELECT name FROM t WHERE id = 2;", &[&["b"], &["c"]]),
	Exec("DELETE FROM t WHERE name = 'b';"),
	AssertRows("SELECT name FROM t WHERE id = 2;", &[&["c"]]),
	Exec("DELETE FROM t WHERE id = 2;"),
	AssertRows("SELECT name FROM t WHERE id = 2;", &[]),
	AssertRows("SELECT name FROM t WHERE id >= 1;", &[&["a"], &["d"]])
);

db_test!(
	test_dates,
	Exec("CREATE TABLE t (id:number, born:date);"),
	Exec("INSERT INTO t (id, born) VALUES (1, '29.02.2024'), (2, '01.03.2024'), (3, '31.12.2023');"),
	ExecErr("INSERT INTO t (id, born) VALUES (4, '29.02.2023');"),
	AssertRows("SELECT id FROM t WHERE born < '01.01.2024';", &[&["3"]]),
	AssertRows(
		"SELECT born FROM t ORDER BY born ASC;",
		&[&["31.12.2023"], &["29.02.2024"], &["01.03.2024"]]
	)
);

db_test!(
	test_duplicate_table_is_rejected,
	Exec("CREATE TABLE t (id:number);"),
	ExecErr("CREATE TABLE t (id:number);"),
	Exec("DROP TABLE t;"),
	Exec("CREATE TABLE t (id:number);")
);

db_test!(
	test_insert_random,
	Exec("CREATE TABLE t (id:number, name:string MAX_SIZE:8, born:date);"),
	Exec("INSERT INTO t (id, name, born) RANDOM 25;"),
	AssertRowCount("t", 25)
);

#[test]
fn test_free_slot_reuse() {
	let temp = TempDir::new("free_slot_reuse").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:10);").unwrap();
	db.execute_statement("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb');").unwrap();
	db.execute_statement("DELETE FROM t ROW 1;").unwrap();

	{
		let table = db.table("t").unwrap();
		assert_eq!(table.metadata.free_slots.len(), 1);
		assert_eq!(table.metadata.free_slots[0].position, 0);
	}

	// same serialized size as the deleted row, the freed slot is taken
	db.execute_statement("INSERT INTO t (id, name) VALUES (3, 'c');").unwrap();

	let table = db.table("t").unwrap();
	assert!(table.metadata.free_slots.is_empty());
	// the new row sits at the first row's original position, as the tail
	assert_eq!(table.metadata.last_offset, 0);

	assert_eq!(
		fetch(&db, "SELECT * FROM t;"),
		vec![vec!["2".to_string(), "bb".to_string()], vec!["3".to_string(), "c".to_string()]]
	);
}

#[test]
fn test_free_slot_skipped_when_too_small() {
	let temp = TempDir::new("free_slot_small").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:20);").unwrap();
	db.execute_statement("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b');").unwrap();
	db.execute_statement("DELETE FROM t ROW 1;").unwrap();

	// larger than the freed slot, must go to the table end
	db.execute_statement("INSERT INTO t (id, name) VALUES (3, 'cccccccccc');").unwrap();

	let table = db.table("t").unwrap();
	assert_eq!(table.metadata.free_slots.len(), 1);
	assert!(table.metadata.last_offset > table.metadata.free_slots[0].position);
}

#[test]
fn test_corrupted_heap_record_refuses_to_read() {
	let temp = TempDir::new("heap_corruption").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:10);").unwrap();
	db.execute_statement("INSERT INTO t (id, name) VALUES (1, 'a');").unwrap();

	let data_path = temp.path().join("t").join("t.data");
	let mut file = OpenOptions::new().write(true).open(&data_path).unwrap();
	file.seek(SeekFrom::Start(17)).unwrap();
	file.write_all(&[0xff]).unwrap();
	file.flush().unwrap();

	let rows: Vec<_> = db.execute_statement("SELECT * FROM t;").unwrap()
		.rows.unwrap()
		.collect();
	assert!(rows[0].is_err());
}

#[test]
fn test_corrupted_metadata_refuses_to_open() {
	let temp = TempDir::new("metadata_corruption").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number);").unwrap();

	let meta_path = temp.path().join("t").join("t.meta");
	let contents = fs::read_to_string(&meta_path).unwrap();
	fs::write(&meta_path, contents.replace("Rows:0", "Rows:9")).unwrap();

	let err = db.execute_statement("SELECT * FROM t;").unwrap_err();
	assert!(match *err.kind() {
		ErrorKind::Corrupted(_, _) => true,
		_ => false,
	});
}

#[test]
fn test_corrupted_index_fails_indexed_select() {
	let temp = TempDir::new("index_corruption").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:10);").unwrap();
	db.execute_statement("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb');").unwrap();
	db.execute_statement("CREATE INDEX idx_id ON t (id);").unwrap();

	// one flipped byte inside the root node record
	let index_path = temp.path().join("t").join("idx_id_index.index");
	let mut file = OpenOptions::new().write(true).open(&index_path).unwrap();
	file.seek(SeekFrom::Start(45)).unwrap();
	file.write_all(&[0xff]).unwrap();
	file.flush().unwrap();

	let err = db.execute_statement("SELECT * FROM t WHERE id >= 2;").unwrap_err();
	assert!(match *err.kind() {
		ErrorKind::Corrupted(_, _) => true,
		_ => false,
	});

	// the table itself stays readable
	assert_eq!(fetch(&db, "SELECT name FROM t;").len(), 2);
}

fn insert_descending(db: &Database, count: i64) {
	let mut next = count;
	while next > 0 {
		let lower = ::std::cmp::max(1, next - 499);
		let tuples: Vec<String> = (lower..=next).rev().map(|i| format!("({})", i)).collect();
		let statement = format!("INSERT INTO t (id) VALUES {};", tuples.join(", "));
		db.execute_statement(&statement).unwrap();
		next = lower - 1;
	}
}

#[test]
fn test_order_by_spills_and_cleans_temp_files() {
	let temp = TempDir::new("external_sort").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number);").unwrap();
	insert_descending(&db, 2500);

	let rows = fetch(&db, "SELECT id FROM t ORDER BY id ASC;");
	let got: Vec<String> = rows.into_iter().map(|mut row| row.remove(0)).collect();
	let expected: Vec<String> = (1..=2500).map(|i| i.to_string()).collect();
	assert_eq!(got, expected);

	// every spill file is gone once the stream is drained
	let leftovers = fs::read_dir(temp.path().join("t")).unwrap()
		.filter(|entry| {
			let name = entry.as_ref().unwrap().file_name();
			name.to_string_lossy().ends_with(".temp")
		})
		.count();
	assert_eq!(leftovers, 0);
}

fn data_bytes(root: &Path) -> Vec<u8> {
	fs::read(root.join("t").join("t.data")).unwrap()
}

#[test]
fn test_defragment_compacts_and_is_idempotent() {
	let temp = TempDir::new("defragment").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:10);").unwrap();
	db.execute_statement(
		"INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'bb'), (3, 'ccc'), (4, 'dddd'), (5, 'e');"
	).unwrap();
	db.execute_statement("CREATE INDEX idx_id ON t (id);").unwrap();
	db.execute_statement("DELETE FROM t ROW 2, 4;").unwrap();

	let fragmented_end = db.table("t").unwrap().metadata.table_end;

	db.execute_statement("DEFRAGMENT t;").unwrap();

	{
		let table = db.table("t").unwrap();
		assert!(table.metadata.free_slots.is_empty());
		assert!(table.metadata.table_end < fragmented_end);
		assert_eq!(table.metadata.first_offset, 0);
	}
	assert_eq!(
		fetch(&db, "SELECT id FROM t;"),
		vec![vec!["1".to_string()], vec!["3".to_string()], vec!["5".to_string()]]
	);
	// the rebuilt index answers through the new offsets
	assert_eq!(fetch(&db, "SELECT name FROM t WHERE id = 3;"), vec![vec!["ccc".to_string()]]);

	let after_first = data_bytes(temp.path());
	db.execute_statement("DEFRAGMENT t;").unwrap();
	let after_second = data_bytes(temp.path());
	assert_eq!(after_first, after_second);
}

#[test]
fn test_drop_table_removes_index_files() {
	let temp = TempDir::new("drop_table").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number);").unwrap();
	db.execute_statement("CREATE INDEX idx_id ON t (id);").unwrap();
	assert!(temp.path().join("t").join("idx_id_index.index").is_file());

	let result = db.execute_statement("DROP TABLE t;").unwrap();
	assert!(result.table_action);
	assert!(!temp.path().join("t").exists());
}

#[test]
fn test_tableinfo_summary() {
	let temp = TempDir::new("tableinfo").unwrap();
	let db = Database::open(temp.path(), Options::default()).unwrap();

	db.execute_statement("CREATE TABLE t (id:number, name:string MAX_SIZE:10);").unwrap();
	db.execute_statement("INSERT INTO t (id, name) VALUES (1, 'a');").unwrap();
	db.execute_statement("CREATE INDEX idx_id ON t (id);").unwrap();

	let result = db.execute_statement("TABLEINFO t;").unwrap();
	let info = result.tableinfo.unwrap();
	assert_eq!(info.table_name, "t");
	assert_eq!(info.rows_count, 1);
	assert_eq!(info.columns, vec![
		("id".to_string(), "number".to_string()),
		("name".to_string(), "string".to_string()),
	]);
	assert_eq!(info.indexes, vec!["idx_id".to_string()]);
	assert!(info.data_file_size > 0);
	assert!(info.metadata_file_size > 0);
}
