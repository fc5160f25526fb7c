//! Rows and the heap row codec.

use byteorder::{ByteOrder, LittleEndian};
use indexmap::IndexMap;
use std::str::FromStr;

use column::{Column, ColumnType};
use date::Date;
use error::{ErrorKind, Result};
use value::{Number, Value};

/// An ordered association from column name to typed value.
///
/// Iteration order follows insertion order, which for rows read from a
/// table is the column order declared at `CREATE TABLE`.
pub type Row = IndexMap<String, Value>;

/// Serializes `row` column by column in the order declared by `columns`.
///
/// Encodings per type:
///
/// ```text
/// number  'I' + int32 LE   or   'F' + float64 LE
/// string  int32 LE byte length + UTF-8 bytes
/// date    exactly ten ASCII bytes DD.MM.YYYY
/// ```
pub fn serialize_row(columns: &[Column], row: &Row) -> Result<Vec<u8>> {
	let mut bytes = Vec::new();
	let mut buf = [0u8; 8];

	for column in columns {
		let value = row.get(&column.name).ok_or_else(|| {
			ErrorKind::Table(format!("Column '{}' requires a value!", column.name))
		})?;

		match (column.column_type, value) {
			(ColumnType::Number, &Value::Number(Number::Int(v))) => {
				bytes.push(b'I');
				LittleEndian::write_i32(&mut buf[..4], v);
				bytes.extend_from_slice(&buf[..4]);
			},
			(ColumnType::Number, &Value::Number(Number::Float(v))) => {
				bytes.push(b'F');
				LittleEndian::write_f64(&mut buf, v);
				bytes.extend_from_slice(&buf);
			},
			(ColumnType::Str, &Value::Str(ref s)) => {
				LittleEndian::write_i32(&mut buf[..4], s.len() as i32);
				bytes.extend_from_slice(&buf[..4]);
				bytes.extend_from_slice(s.as_bytes());
			},
			(ColumnType::Date, &Value::Date(ref d)) => {
				bytes.extend_from_slice(d.to_string().as_bytes());
			},
			_ => bail!(ErrorKind::Value(
				format!("Value for column {} has to be of type '{}'!",
					column.name, column.column_type)
			)),
		}
	}

	Ok(bytes)
}

/// Decodes a row payload produced by [`serialize_row`] for the same
/// column list.
pub fn deserialize_row(columns: &[Column], data: &[u8]) -> Result<Row> {
	let mut offset = 0;
	let mut row = Row::with_capacity(columns.len());

	for column in columns {
		let value = match column.column_type {
			ColumnType::Number => {
				let tag = take(data, &mut offset, 1)?[0];
				match tag {
					b'I' => {
						let raw = take(data, &mut offset, 4)?;
						Value::Number(Number::Int(LittleEndian::read_i32(raw)))
					},
					b'F' => {
						let raw = take(data, &mut offset, 8)?;
						Value::Number(Number::Float(LittleEndian::read_f64(raw)))
					},
					_ => bail!(ErrorKind::Table("Corrupted file: unknown number tag".into())),
				}
			},
			ColumnType::Str => {
				let len = LittleEndian::read_i32(take(data, &mut offset, 4)?);
				if len < 0 {
					bail!(ErrorKind::Table("Corrupted file: negative string length".into()));
				}
				let raw = take(data, &mut offset, len as usize)?;
				let text = String::from_utf8(raw.to_vec()).map_err(|_| {
					ErrorKind::Table("Corrupted file: row string is not UTF-8".into())
				})?;
				Value::Str(text)
			},
			ColumnType::Date => {
				let raw = take(data, &mut offset, 10)?;
				let text = String::from_utf8(raw.to_vec()).map_err(|_| {
					ErrorKind::Table("Corrupted file: row date is not ASCII".into())
				})?;
				Value::Date(Date::from_str(&text).map_err(|_| {
					ErrorKind::Table("Corrupted file: row date is malformed".into())
				})?)
			},
		};

		row.insert(column.name.clone(), value);
	}

	Ok(row)
}

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
	if *offset + len > data.len() {
		bail!(ErrorKind::Table("Corrupted file: row payload is truncated".into()));
	}
	let slice = &data[*offset..*offset + len];
	*offset += len;
	Ok(slice)
}

#[cfg(test)]
mod tests {
	use column::{Column, ColumnType};
	use date::Date;
	use value::{Number, Value};
	use super::{deserialize_row, serialize_row, Row};

	fn schema() -> Vec<Column> {
		vec![
			Column::new("id", ColumnType::Number, None, None).unwrap(),
			Column::new("name", ColumnType::Str, None, None).unwrap(),
			Column::new("created", ColumnType::Date, None, None).unwrap(),
		]
	}

	fn sample_row(id: Value, name: &str, created: &str) -> Row {
		let mut row = Row::new();
		row.insert("id".into(), id);
		row.insert("name".into(), Value::Str(name.into()));
		row.insert("created".into(), Value::Date(created.parse::<Date>().unwrap()));
		row
	}

	#[test]
	fn test_roundtrip_int_row() {
		let columns = schema();
		let row = sample_row(Value::Number(Number::Int(42)), "glacier", "01.02.2003");

		let bytes = serialize_row(&columns, &row).unwrap();
		assert_eq!(deserialize_row(&columns, &bytes).unwrap(), row);
	}

	#[test]
	fn test_roundtrip_float_row() {
		let columns = schema();
		let row = sample_row(Value::Number(Number::Float(2.5)), "x y z", "29.02.2024");

		let bytes = serialize_row(&columns, &row).unwrap();
		assert_eq!(deserialize_row(&columns, &bytes).unwrap(), row);
	}

	#[test]
	fn test_missing_column_is_an_error() {
		let columns = schema();
		let mut row = Row::new();
		row.insert("id".into(), Value::Number(Number::Int(1)));

		assert!(serialize_row(&columns, &row).is_err());
	}

	#[test]
	fn test_truncated_payload_is_an_error() {
		let columns = schema();
		let row = sample_row(Value::Number(Number::Int(7)), "abc", "01.01.2001");

		let bytes = serialize_row(&columns, &row).unwrap();
		assert!(deserialize_row(&columns, &bytes[..bytes.len() - 1]).is_err());
	}

	quickcheck! {
		fn quickcheck_roundtrip(id: i32, name: String) -> bool {
			if name.trim().is_empty() || name.len() > 255 {
				return true;
			}
			let columns = vec![
				Column::new("id", ColumnType::Number, None, None).unwrap(),
				Column::new("name", ColumnType::Str, None, None).unwrap(),
			];
			let mut row = Row::new();
			row.insert("id".into(), Value::Number(Number::Int(id)));
			row.insert("name".into(), Value::Str(name));

			let bytes = serialize_row(&columns, &row).unwrap();
			deserialize_row(&columns, &bytes).unwrap() == row
		}
	}
}
