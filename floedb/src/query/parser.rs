//! Recursive-descent statement parser.
//!
//! One token of lookahead suffices for the whole grammar. Every
//! statement must be terminated by `;` and the terminator must be the
//! last token before end of input.

use indexmap::IndexMap;

use error::{ErrorKind, Result};
use merge_sort::SortOrder;
use query::expression::{CompareOp, Expr, Operand};
use query::statement::{ColumnDef, OrderBy, Statement};
use query::tokenizer::{Token, TokenKind};
use row::Row;
use value::{Number, Value};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Parses one tokenized statement.
pub struct Parser {
	tokens: Vec<Token>,
	pos: usize,
}

impl Parser {
	/// Parses the token stream into a single statement.
	pub fn parse(tokens: Vec<Token>) -> Result<Statement> {
		let mut parser = Parser { tokens, pos: 0 };

		let statement = match parser.current().kind {
			TokenKind::Create => parser.parse_create()?,
			TokenKind::Drop => parser.parse_drop()?,
			TokenKind::TableInfo => parser.parse_tableinfo()?,
			TokenKind::Insert => parser.parse_insert()?,
			TokenKind::Get => parser.parse_get()?,
			TokenKind::Delete => parser.parse_delete()?,
			TokenKind::Select => parser.parse_select()?,
			TokenKind::Defragment => parser.parse_defragment()?,
			ref kind => bail!(ErrorKind::Parse(
				format!("Unknown statement starting with token {:?}", kind)
			)),
		};

		parser.expect(TokenKind::Semicolon)?;
		if parser.current().kind != TokenKind::Eof {
			bail!(ErrorKind::Parse("Invalid statement".into()));
		}

		Ok(statement)
	}

	fn current(&self) -> &Token {
		static EOF: Token = Token { kind: TokenKind::Eof, value: String::new() };
		self.tokens.get(self.pos).unwrap_or(&EOF)
	}

	fn advance(&mut self) {
		self.pos += 1;
	}

	fn expect(&mut self, kind: TokenKind) -> Result<Token> {
		let token = self.current().clone();
		if token.kind == kind {
			self.advance();
			Ok(token)
		} else {
			Err(ErrorKind::Parse(
				format!("Expected token type {:?}, got {:?}", kind, token.kind)
			).into())
		}
	}

	fn identifier(&mut self) -> Result<String> {
		let token = self.expect(TokenKind::Identifier)?;
		if token.value.len() > MAX_IDENTIFIER_LEN {
			bail!(ErrorKind::Parse(
				format!("Identifier '{}' is longer than {} characters", token.value, MAX_IDENTIFIER_LEN)
			));
		}
		Ok(token.value)
	}

	// literal tokens become typed values right away
	fn literal(&mut self) -> Result<Value> {
		let token = self.current().clone();
		let value = match token.kind {
			TokenKind::Number => {
				// integers overflowing i32 degrade to floats
				match token.value.parse::<i32>() {
					Ok(v) => Value::Number(Number::Int(v)),
					Err(_) => Value::Number(Number::Float(
						token.value.parse::<f64>().map_err(|_| {
							ErrorKind::Parse(format!("Malformed number literal '{}'", token.value))
						})?
					)),
				}
			},
			TokenKind::Float => Value::Number(Number::Float(
				token.value.parse::<f64>().map_err(|_| {
					ErrorKind::Parse(format!("Malformed number literal '{}'", token.value))
				})?
			)),
			TokenKind::StringLit => Value::Str(token.value.clone()),
			TokenKind::DateLit => Value::Date(token.value.parse().map_err(|_| {
				ErrorKind::Parse(format!("Malformed date literal '{}'", token.value))
			})?),
			ref kind => bail!(ErrorKind::Parse(
				format!("Expected a literal, got {:?}", kind)
			)),
		};
		self.advance();
		Ok(value)
	}

	fn parse_create(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Create)?;
		match self.current().kind {
			TokenKind::Table => self.parse_create_table(),
			TokenKind::Index => self.parse_create_index(),
			_ => Err(ErrorKind::Parse("Expected TABLE or INDEX after CREATE".into()).into()),
		}
	}

	fn parse_create_table(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Table)?;
		let table_name = self.identifier()?;
		self.expect(TokenKind::LParen)?;

		let mut columns = Vec::new();

		while self.current().kind != TokenKind::RParen {
			let name = self.identifier()?;
			self.expect(TokenKind::Colon)?;
			let col_type = self.identifier()?;

			let mut constraints = IndexMap::new();

			loop {
				let constraint = match self.current().kind {
					TokenKind::Default | TokenKind::MaxSize => self.current().value.clone(),
					_ => break,
				};
				self.advance();
				self.expect(TokenKind::Colon)?;
				let value = self.literal()?;
				constraints.insert(constraint, value);

				if self.current().kind == TokenKind::Comma
					|| self.current().kind == TokenKind::RParen
				{
					break;
				}
			}

			columns.push(ColumnDef { name, col_type, constraints });

			if self.current().kind == TokenKind::Comma {
				self.advance();
			} else {
				break;
			}
		}

		self.expect(TokenKind::RParen)?;

		if columns.is_empty() {
			bail!(ErrorKind::Parse("No columns given to create".into()));
		}

		Ok(Statement::CreateTable { table_name, columns })
	}

	fn parse_create_index(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Index)?;
		let index_name = self.identifier()?;
		self.expect(TokenKind::On)?;
		let table_name = self.identifier()?;
		self.expect(TokenKind::LParen)?;
		let column_name = self.identifier()?;
		self.expect(TokenKind::RParen)?;

		Ok(Statement::CreateIndex { index_name, table_name, column_name })
	}

	fn parse_drop(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Drop)?;
		match self.current().kind {
			TokenKind::Table => {
				self.advance();
				let table_name = self.identifier()?;
				Ok(Statement::DropTable { table_name })
			},
			TokenKind::Index => {
				self.advance();
				let index_name = self.identifier()?;
				self.expect(TokenKind::On)?;
				let table_name = self.identifier()?;
				Ok(Statement::DropIndex { index_name, table_name })
			},
			_ => Err(ErrorKind::Parse("Expected TABLE or INDEX after DROP".into()).into()),
		}
	}

	fn parse_tableinfo(&mut self) -> Result<Statement> {
		self.expect(TokenKind::TableInfo)?;
		let table_name = self.identifier()?;
		Ok(Statement::TableInfo { table_name })
	}

	fn parse_insert(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Insert)?;
		self.expect(TokenKind::Into)?;
		let table_name = self.identifier()?;
		self.expect(TokenKind::LParen)?;

		let mut columns = Vec::new();
		while self.current().kind != TokenKind::RParen {
			columns.push(self.identifier()?);
			if self.current().kind == TokenKind::Comma {
				self.advance();
			} else {
				break;
			}
		}
		self.expect(TokenKind::RParen)?;

		if columns.is_empty() {
			bail!(ErrorKind::Parse("No columns given to insert".into()));
		}

		match self.current().kind {
			TokenKind::Values => self.parse_insert_values(table_name, columns),
			TokenKind::Random => self.parse_insert_random(table_name, columns),
			_ => Err(ErrorKind::Parse("Expected VALUES or RANDOM!".into()).into()),
		}
	}

	fn parse_insert_values(&mut self, table_name: String, columns: Vec<String>) -> Result<Statement> {
		self.expect(TokenKind::Values)?;

		let mut rows = Vec::new();

		loop {
			self.expect(TokenKind::LParen)?;
			let mut values = Vec::new();

			while self.current().kind != TokenKind::RParen {
				values.push(self.literal()?);
				if self.current().kind == TokenKind::Comma {
					self.advance();
				} else {
					break;
				}
			}
			self.expect(TokenKind::RParen)?;

			if values.len() != columns.len() {
				bail!(ErrorKind::Parse("Invalid number of values".into()));
			}

			let mut row = Row::with_capacity(columns.len());
			for (column, value) in columns.iter().zip(values) {
				row.insert(column.clone(), value);
			}
			rows.push(row);

			if self.current().kind == TokenKind::Comma {
				self.advance();
			} else {
				break;
			}
		}

		Ok(Statement::InsertValues { table_name, rows })
	}

	fn parse_insert_random(&mut self, table_name: String, columns: Vec<String>) -> Result<Statement> {
		self.expect(TokenKind::Random)?;

		let token = self.expect(TokenKind::Number)
			.map_err(|_| ErrorKind::Parse("Expected a number after RANDOM!".into()))?;
		let count = token.value.parse::<i64>()
			.map_err(|_| ErrorKind::Parse("Expected a number after RANDOM!".into()))?;

		if count <= 0 {
			bail!(ErrorKind::Parse("Expected a positive number!".into()));
		}

		Ok(Statement::InsertRandom { table_name, columns, count })
	}

	fn row_numbers(&mut self) -> Result<Vec<i64>> {
		let mut numbers = Vec::new();

		while self.current().kind == TokenKind::Number {
			let token = self.current().clone();
			numbers.push(token.value.parse::<i64>().map_err(|_| {
				ErrorKind::Parse(format!("Malformed row number '{}'", token.value))
			})?);
			self.advance();
			if self.current().kind == TokenKind::Comma {
				self.advance();
			} else {
				break;
			}
		}

		Ok(numbers)
	}

	fn parse_get(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Get)?;
		self.expect(TokenKind::Row)?;
		let row_numbers = self.row_numbers()?;
		if row_numbers.is_empty() {
			bail!(ErrorKind::Parse("No rows given to get".into()));
		}
		self.expect(TokenKind::From)?;
		let table_name = self.identifier()?;

		Ok(Statement::GetRows { table_name, row_numbers })
	}

	fn parse_delete(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Delete)?;
		self.expect(TokenKind::From)?;
		let table_name = self.identifier()?;

		match self.current().kind {
			TokenKind::Row => {
				self.advance();
				let row_numbers = self.row_numbers()?;
				if row_numbers.is_empty() {
					bail!(ErrorKind::Parse("No rows given to delete".into()));
				}
				Ok(Statement::DeleteRows { table_name, row_numbers })
			},
			TokenKind::Where => {
				self.advance();
				let where_expr = self.parse_expr()?;
				Ok(Statement::DeleteWhere { table_name, where_expr })
			},
			_ => Err(ErrorKind::Parse(
				"Expected ROW or WHERE after DELETE FROM <table_name>".into()
			).into()),
		}
	}

	fn parse_select(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Select)?;

		let mut distinct = false;
		if self.current().kind == TokenKind::Distinct {
			distinct = true;
			self.advance();
		}

		let mut columns = Vec::new();
		loop {
			match self.current().kind {
				TokenKind::Identifier => columns.push(self.identifier()?),
				// the sole legal non-identifier projection
				TokenKind::Unknown if self.current().value == "*" => {
					columns.push("*".to_string());
					self.advance();
				},
				TokenKind::Eof => bail!(ErrorKind::Parse("Unexpected EOF in SELECT columns".into())),
				ref kind => bail!(ErrorKind::Parse(
					format!("Unexpected token in SELECT columns: {:?}", kind)
				)),
			}
			if self.current().kind == TokenKind::Comma {
				self.advance();
			} else {
				break;
			}
		}

		if columns.is_empty() {
			bail!(ErrorKind::Parse("No columns given to select".into()));
		}

		self.expect(TokenKind::From)?;
		let table_name = self.identifier()?;

		let mut where_expr = None;
		if self.current().kind == TokenKind::Where {
			self.advance();
			where_expr = Some(self.parse_expr()?);
		}

		let mut order_by = None;
		if self.current().kind == TokenKind::Order {
			self.advance();
			self.expect(TokenKind::By)?;
			let column = self.identifier()?;

			let mut order = SortOrder::Asc;
			if self.current().kind == TokenKind::Identifier {
				match self.current().value.as_str() {
					"ASC" => {
						self.advance();
					},
					"DESC" => {
						order = SortOrder::Desc;
						self.advance();
					},
					_ => bail!(ErrorKind::Parse("Direction can be either ASC or DESC!".into())),
				}
			}

			order_by = Some(OrderBy { column, order });
		}

		Ok(Statement::Select { columns, table_name, distinct, where_expr, order_by })
	}

	fn parse_defragment(&mut self) -> Result<Statement> {
		self.expect(TokenKind::Defragment)?;
		let table_name = self.identifier()?;
		Ok(Statement::Defragment { table_name })
	}

	fn parse_expr(&mut self) -> Result<Expr> {
		self.parse_or_expr()
	}

	fn parse_or_expr(&mut self) -> Result<Expr> {
		let mut node = self.parse_and_expr()?;
		while self.current().kind == TokenKind::Or {
			self.advance();
			let right = self.parse_and_expr()?;
			node = Expr::Or(Box::new(node), Box::new(right));
		}
		Ok(node)
	}

	fn parse_and_expr(&mut self) -> Result<Expr> {
		let mut node = self.parse_not_expr()?;
		while self.current().kind == TokenKind::And {
			self.advance();
			let right = self.parse_not_expr()?;
			node = Expr::And(Box::new(node), Box::new(right));
		}
		Ok(node)
	}

	fn parse_not_expr(&mut self) -> Result<Expr> {
		if self.current().kind == TokenKind::Not {
			self.advance();
			let inner = self.parse_not_expr()?;
			return Ok(Expr::Not(Box::new(inner)));
		}
		self.parse_primary()
	}

	fn parse_primary(&mut self) -> Result<Expr> {
		if self.current().kind == TokenKind::LParen {
			self.advance();
			let node = self.parse_expr()?;
			self.expect(TokenKind::RParen)?;
			return Ok(node);
		}
		self.parse_comparison()
	}

	fn parse_comparison(&mut self) -> Result<Expr> {
		let left = self.parse_operand()?;

		let op = match self.current().kind {
			TokenKind::Eq => CompareOp::Eq,
			TokenKind::Neq => CompareOp::Neq,
			TokenKind::Lt => CompareOp::Lt,
			TokenKind::Leq => CompareOp::Leq,
			TokenKind::Gt => CompareOp::Gt,
			TokenKind::Geq => CompareOp::Geq,
			_ => bail!(ErrorKind::Parse("Unexpected comparison!".into())),
		};
		self.advance();

		let right = self.parse_operand()?;

		Ok(Expr::Compare { left, op, right })
	}

	fn parse_operand(&mut self) -> Result<Operand> {
		match self.current().kind {
			TokenKind::Identifier => Ok(Operand::Column(self.identifier()?)),
			TokenKind::Number | TokenKind::Float | TokenKind::StringLit | TokenKind::DateLit => {
				Ok(Operand::Literal(self.literal()?))
			},
			ref kind => Err(ErrorKind::Parse(
				format!("Unexpected token in value: {:?}", kind)
			).into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use error::ErrorKind;
	use merge_sort::SortOrder;
	use query::expression::{CompareOp, Expr, Operand};
	use query::statement::Statement;
	use query::tokenizer::Tokenizer;
	use value::{Number, Value};
	use super::Parser;

	fn parse(text: &str) -> ::error::Result<Statement> {
		Parser::parse(Tokenizer::tokenize(text))
	}

	#[test]
	fn test_create_table_with_constraints() {
		let statement = parse(
			"CREATE TABLE people (id:number, name:string MAX_SIZE:10 DEFAULT:'unknown');"
		).unwrap();

		match statement {
			Statement::CreateTable { table_name, columns } => {
				assert_eq!(table_name, "people");
				assert_eq!(columns.len(), 2);
				assert_eq!(columns[0].name, "id");
				assert_eq!(columns[0].col_type, "number");
				assert!(columns[0].constraints.is_empty());
				assert_eq!(
					columns[1].constraints.get("MAX_SIZE"),
					Some(&Value::Number(Number::Int(10)))
				);
				assert_eq!(
					columns[1].constraints.get("DEFAULT"),
					Some(&Value::Str("unknown".into()))
				);
			},
			other => panic!("expected CREATE TABLE, got {:?}", other),
		}
	}

	#[test]
	fn test_insert_values_builds_rows() {
		let statement = parse(
			"INSERT INTO people (id, name) VALUES (1, 'ann'), (2, 'bob');"
		).unwrap();

		match statement {
			Statement::InsertValues { table_name, rows } => {
				assert_eq!(table_name, "people");
				assert_eq!(rows.len(), 2);
				assert_eq!(rows[0]["id"], Value::Number(Number::Int(1)));
				assert_eq!(rows[1]["name"], Value::Str("bob".into()));
			},
			other => panic!("expected INSERT, got {:?}", other),
		}
	}

	#[test]
	fn test_select_with_everything() {
		let statement = parse(
			"SELECT DISTINCT name FROM people WHERE id >= 2 AND NOT name = 'x' ORDER BY name DESC;"
		).unwrap();

		match statement {
			Statement::Select { columns, table_name, distinct, where_expr, order_by } => {
				assert_eq!(columns, vec!["name".to_string()]);
				assert_eq!(table_name, "people");
				assert!(distinct);
				let order_by = order_by.unwrap();
				assert_eq!(order_by.column, "name");
				assert_eq!(order_by.order, SortOrder::Desc);

				match where_expr.unwrap() {
					Expr::And(left, right) => {
						assert_eq!(*left, Expr::Compare {
							left: Operand::Column("id".into()),
							op: CompareOp::Geq,
							right: Operand::Literal(Value::Number(Number::Int(2))),
						});
						assert!(matches!(*right, Expr::Not(_)));
					},
					other => panic!("expected AND at the top, got {:?}", other),
				}
			},
			other => panic!("expected SELECT, got {:?}", other),
		}
	}

	#[test]
	fn test_star_projection() {
		let statement = parse("SELECT * FROM people;").unwrap();
		match statement {
			Statement::Select { columns, .. } => assert_eq!(columns, vec!["*".to_string()]),
			other => panic!("expected SELECT, got {:?}", other),
		}
	}

	#[test]
	fn test_statements_must_terminate() {
		assert!(parse("SELECT * FROM people").is_err());
		assert!(parse("SELECT * FROM people; SELECT").is_err());
		assert!(matches!(
			*parse("DROP people;").unwrap_err().kind(),
			ErrorKind::Parse(_)
		));
	}

	#[test]
	fn test_get_and_delete_rows() {
		match parse("GET ROW 3, 1, 2 FROM people;").unwrap() {
			Statement::GetRows { row_numbers, .. } => assert_eq!(row_numbers, vec![3, 1, 2]),
			other => panic!("expected GET, got {:?}", other),
		}

		match parse("DELETE FROM people ROW 4;").unwrap() {
			Statement::DeleteRows { row_numbers, .. } => assert_eq!(row_numbers, vec![4]),
			other => panic!("expected DELETE, got {:?}", other),
		}

		assert!(parse("DELETE FROM people;").is_err());
	}

	#[test]
	fn test_insert_random() {
		match parse("INSERT INTO people (id, name) RANDOM 50;").unwrap() {
			Statement::InsertRandom { columns, count, .. } => {
				assert_eq!(columns, vec!["id".to_string(), "name".to_string()]);
				assert_eq!(count, 50);
			},
			other => panic!("expected INSERT RANDOM, got {:?}", other),
		}

		assert!(parse("INSERT INTO people (id) RANDOM -2;").is_err());
		assert!(parse("INSERT INTO people (id) RANDOM;").is_err());
	}

	#[test]
	fn test_date_literals_in_where() {
		let statement = parse("DELETE FROM people WHERE born < '01.01.2000';").unwrap();
		match statement {
			Statement::DeleteWhere { where_expr, .. } => match where_expr {
				Expr::Compare { right: Operand::Literal(Value::Date(date)), .. } => {
					assert_eq!(date.to_string(), "01.01.2000");
				},
				other => panic!("expected a date comparison, got {:?}", other),
			},
			other => panic!("expected DELETE WHERE, got {:?}", other),
		}
	}
}
