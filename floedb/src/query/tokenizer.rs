//! Hand-written statement tokenizer.

use date::Date;

/// Kinds of lexemes the tokenizer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
	// general
	Eof,
	Identifier,
	StringLit,
	Number,
	Float,
	DateLit,

	// operators / punctuation
	Comma,
	LParen,
	RParen,
	Colon,
	Semicolon,
	Eq,
	Lt,
	Gt,
	Neq,
	Leq,
	Geq,
	And,
	Or,
	Not,

	// keywords
	Create,
	Table,
	Drop,
	TableInfo,
	Insert,
	Into,
	Values,
	Get,
	Row,
	From,
	Delete,
	Select,
	Where,
	Order,
	By,
	Distinct,
	Index,
	On,
	Random,
	Defragment,

	// constraints
	Default,
	MaxSize,

	// catch-all
	Unknown,
}

/// One lexeme with its raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
	pub kind: TokenKind,
	pub value: String,
}

impl Token {
	fn new(kind: TokenKind, value: &str) -> Token {
		Token { kind, value: value.to_string() }
	}
}

// keywords are recognized in their upper-case spelling only
fn keyword(text: &str) -> Option<TokenKind> {
	match text {
		"CREATE" => Some(TokenKind::Create),
		"TABLE" => Some(TokenKind::Table),
		"DROP" => Some(TokenKind::Drop),
		"TABLEINFO" => Some(TokenKind::TableInfo),
		"INSERT" => Some(TokenKind::Insert),
		"INTO" => Some(TokenKind::Into),
		"VALUES" => Some(TokenKind::Values),
		"GET" => Some(TokenKind::Get),
		"ROW" => Some(TokenKind::Row),
		"FROM" => Some(TokenKind::From),
		"DELETE" => Some(TokenKind::Delete),
		"SELECT" => Some(TokenKind::Select),
		"WHERE" => Some(TokenKind::Where),
		"AND" => Some(TokenKind::And),
		"OR" => Some(TokenKind::Or),
		"NOT" => Some(TokenKind::Not),
		"ORDER" => Some(TokenKind::Order),
		"BY" => Some(TokenKind::By),
		"DISTINCT" => Some(TokenKind::Distinct),
		"INDEX" => Some(TokenKind::Index),
		"ON" => Some(TokenKind::On),
		"DEFAULT" => Some(TokenKind::Default),
		"MAX_SIZE" => Some(TokenKind::MaxSize),
		"RANDOM" => Some(TokenKind::Random),
		"DEFRAGMENT" => Some(TokenKind::Defragment),
		_ => None,
	}
}

/// Reads a statement character by character and produces tokens.
pub struct Tokenizer {
	chars: Vec<char>,
	pos: usize,
}

impl Tokenizer {
	/// Tokenizes the whole statement, ending with an EOF token.
	pub fn tokenize(text: &str) -> Vec<Token> {
		let mut tokenizer = Tokenizer { chars: text.chars().collect(), pos: 0 };
		let mut tokens = Vec::new();

		loop {
			let token = tokenizer.next_token();
			let done = token.kind == TokenKind::Eof;
			tokens.push(token);
			if done {
				return tokens;
			}
		}
	}

	fn current(&self) -> Option<char> {
		self.chars.get(self.pos).cloned()
	}

	fn peek(&self) -> Option<char> {
		self.chars.get(self.pos + 1).cloned()
	}

	fn advance(&mut self) {
		self.pos += 1;
	}

	fn skip_whitespace(&mut self) {
		while self.current().map(|c| c.is_whitespace()).unwrap_or(false) {
			self.advance();
		}
	}

	fn next_token(&mut self) -> Token {
		self.skip_whitespace();

		let current = match self.current() {
			Some(c) => c,
			None => return Token::new(TokenKind::Eof, ""),
		};

		if current == '"' || current == '\'' {
			return self.collect_string_or_date(current);
		}

		match current {
			',' => {
				self.advance();
				return Token::new(TokenKind::Comma, ",");
			},
			'(' => {
				self.advance();
				return Token::new(TokenKind::LParen, "(");
			},
			')' => {
				self.advance();
				return Token::new(TokenKind::RParen, ")");
			},
			':' => {
				self.advance();
				return Token::new(TokenKind::Colon, ":");
			},
			';' => {
				self.advance();
				return Token::new(TokenKind::Semicolon, ";");
			},
			'<' => {
				self.advance();
				if self.current() == Some('=') {
					self.advance();
					return Token::new(TokenKind::Leq, "<=");
				}
				return Token::new(TokenKind::Lt, "<");
			},
			'>' => {
				self.advance();
				if self.current() == Some('=') {
					self.advance();
					return Token::new(TokenKind::Geq, ">=");
				}
				return Token::new(TokenKind::Gt, ">");
			},
			'=' => {
				self.advance();
				return Token::new(TokenKind::Eq, "=");
			},
			'!' => {
				if self.peek() == Some('=') {
					self.advance();
					self.advance();
					return Token::new(TokenKind::Neq, "!=");
				}
			},
			_ => {},
		}

		if current.is_ascii_digit() || current == '-' {
			return self.collect_number();
		}

		if current.is_ascii_alphabetic() || current == '_' {
			return self.collect_identifier_or_keyword();
		}

		self.advance();
		Token::new(TokenKind::Unknown, &current.to_string())
	}

	fn collect_identifier_or_keyword(&mut self) -> Token {
		let mut result = String::new();

		while let Some(c) = self.current() {
			if c.is_ascii_alphanumeric() || c == '_' {
				result.push(c);
				self.advance();
			} else {
				break;
			}
		}

		match keyword(&result) {
			Some(kind) => Token::new(kind, &result),
			None => Token::new(TokenKind::Identifier, &result),
		}
	}

	fn collect_number(&mut self) -> Token {
		let mut result = String::new();
		let mut has_decimal_point = false;

		if self.current() == Some('-') {
			result.push('-');
			self.advance();
		}

		while let Some(c) = self.current() {
			if c == '.' {
				if has_decimal_point {
					// a second dot cannot start a float, give up
					result.push(c);
					self.advance();
					return Token::new(TokenKind::Unknown, &result);
				}
				has_decimal_point = true;
			} else if !c.is_ascii_digit() {
				break;
			}
			result.push(c);
			self.advance();
		}

		if has_decimal_point {
			Token::new(TokenKind::Float, &result)
		} else {
			Token::new(TokenKind::Number, &result)
		}
	}

	fn collect_string_or_date(&mut self, quote: char) -> Token {
		self.advance();
		let mut result = String::new();

		while let Some(c) = self.current() {
			if c == quote {
				break;
			}
			result.push(c);
			self.advance();
		}

		if self.current() == Some(quote) {
			self.advance();
		}

		if Date::is_valid_date_string(&result) {
			Token::new(TokenKind::DateLit, &result)
		} else {
			Token::new(TokenKind::StringLit, &result)
		}
	}
}
