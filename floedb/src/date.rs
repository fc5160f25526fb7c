//! Calendar date value with the `DD.MM.YYYY` text form.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use error::{Error, ErrorKind, Result};

/// A validated day/month/year triple.
///
/// The text form is always exactly ten ASCII bytes (`DD.MM.YYYY`), which
/// is also how dates are persisted in row and key records. Ordering is
/// chronological, which coincides with the lexicographic ordering of the
/// text form within a fixed-width year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date {
	/// Day of month, starting at 1.
	pub day: u32,
	/// Month, 1 to 12.
	pub month: u32,
	/// Year, 0 to 9999.
	pub year: u32,
}

impl Date {
	/// Creates a date, rejecting anything the calendar does not contain.
	pub fn new(day: u32, month: u32, year: u32) -> Result<Date> {
		if month < 1 || month > 12 {
			bail!(ErrorKind::Value("Month must be between 1 and 12.".into()));
		}
		if year > 9999 {
			bail!(ErrorKind::Value("Year must be between 0 and 9999.".into()));
		}
		let days = Self::days_in_month(month, year);
		if day < 1 || day > days {
			bail!(ErrorKind::Value(
				format!("Day must be between 1 and {} for month {}.", days, month)
			));
		}

		Ok(Date { day, month, year })
	}

	/// Leap years are divisible by 4 and not by 100, or divisible by 400.
	pub fn is_leap_year(year: u32) -> bool {
		(year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
	}

	fn days_in_month(month: u32, year: u32) -> u32 {
		match month {
			1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
			4 | 6 | 9 | 11 => 30,
			2 if Self::is_leap_year(year) => 29,
			2 => 28,
			_ => 0,
		}
	}

	/// True when `text` is a well-formed `DD.MM.YYYY` calendar date.
	///
	/// The tokenizer uses this to decide whether a quoted literal becomes
	/// a date token or stays a plain string.
	pub fn is_valid_date_string(text: &str) -> bool {
		text.parse::<Date>().is_ok()
	}
}

impl FromStr for Date {
	type Err = Error;

	fn from_str(text: &str) -> Result<Date> {
		let parts: Vec<&str> = text.split('.').collect();
		if parts.len() != 3 || parts[0].len() != 2 || parts[1].len() != 2 || parts[2].len() != 4 {
			bail!(ErrorKind::Value("Date must be in the format 'DD.MM.YYYY'".into()));
		}

		let day = parts[0].parse::<u32>()
			.map_err(|_| ErrorKind::Value("Date must be in the format 'DD.MM.YYYY'".into()))?;
		let month = parts[1].parse::<u32>()
			.map_err(|_| ErrorKind::Value("Date must be in the format 'DD.MM.YYYY'".into()))?;
		let year = parts[2].parse::<u32>()
			.map_err(|_| ErrorKind::Value("Date must be in the format 'DD.MM.YYYY'".into()))?;

		Date::new(day, month, year)
	}
}

impl fmt::Display for Date {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:02}.{:02}.{:04}", self.day, self.month, self.year)
	}
}

impl PartialOrd for Date {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Date {
	fn cmp(&self, other: &Self) -> Ordering {
		(self.year, self.month, self.day).cmp(&(other.year, other.month, other.day))
	}
}
