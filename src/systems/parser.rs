//! Record parser for semicolon-delimited raw extract files

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::data::SalesRecord;
use crate::error::{IngestError, IngestResult};

pub const FIELD_DELIMITER: char = ';';

/// Record-type marker of a completed sale
pub const SALE_RECORD_MARKER: &str = "B";

/// A sale line must reach the property-type position
pub const MIN_SALE_FIELDS: usize = 19;

/// Positions of the fields extracted from a sale line
mod field {
	pub const RECORD_TYPE: usize = 0;
	pub const DISTRICT_CODE: usize = 1;
	pub const PROPERTY_ID: usize = 2;
	pub const VALUATION_NUM: usize = 3;
	pub const HOUSE_NUMBER: usize = 7;
	pub const STREET_NAME: usize = 8;
	pub const SUBURB: usize = 9;
	pub const POSTCODE: usize = 10;
	pub const AREA: usize = 11;
	pub const AREA_UNIT: usize = 12;
	pub const CONTRACT_DATE: usize = 13;
	pub const PURCHASE_PRICE: usize = 15;
	pub const ZONING: usize = 16;
	pub const PROPERTY_TYPE: usize = 18;
}

/// Why a line did not produce a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSkip {
	/// First field is not the sale marker (other record types, blank lines)
	NotSale,
	/// A sale line with fewer than [`MIN_SALE_FIELDS`] fields
	TooFewFields(usize),
	MissingContractDate,
	MissingPurchasePrice,
}

/// Parse one raw line into a sale record.
///
/// Only lines whose first field is exactly `B` qualify. Suburb and property
/// type are upper-cased; free-text fields are trimmed.
pub fn parse_line(line: &str, source_file: &str) -> Result<SalesRecord, LineSkip> {
	let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
	if parts[field::RECORD_TYPE] != SALE_RECORD_MARKER {
		return Err(LineSkip::NotSale);
	}
	if parts.len() < MIN_SALE_FIELDS {
		return Err(LineSkip::TooFewFields(parts.len()));
	}

	let contract_date = parts[field::CONTRACT_DATE];
	if contract_date.trim().is_empty() {
		return Err(LineSkip::MissingContractDate);
	}
	let purchase_price = parts[field::PURCHASE_PRICE];
	if purchase_price.trim().is_empty() {
		return Err(LineSkip::MissingPurchasePrice);
	}

	Ok(SalesRecord {
		district_code: parts[field::DISTRICT_CODE].to_string(),
		property_id: parts[field::PROPERTY_ID].to_string(),
		valuation_num: parts[field::VALUATION_NUM].to_string(),
		house_number: parts[field::HOUSE_NUMBER].trim().to_string(),
		street_name: parts[field::STREET_NAME].trim().to_string(),
		suburb: parts[field::SUBURB].trim().to_uppercase(),
		postcode: parts[field::POSTCODE].trim().to_string(),
		area: parts[field::AREA].trim().to_string(),
		area_unit: parts[field::AREA_UNIT].trim().to_string(),
		contract_date: contract_date.to_string(),
		purchase_price: purchase_price.to_string(),
		zoning: parts[field::ZONING].trim().to_string(),
		property_type: parts[field::PROPERTY_TYPE].trim().to_uppercase(),
		source_file: source_file.to_string(),
	})
}

/// Line-level counters; malformed input is counted rather than logged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
	pub lines: usize,
	pub sale_records: usize,
	pub non_sale_lines: usize,
	pub short_lines: usize,
	pub missing_required: usize,
}

impl ParseStats {
	fn observe(&mut self, outcome: &Result<SalesRecord, LineSkip>) {
		self.lines += 1;
		match outcome {
			Ok(_) => self.sale_records += 1,
			Err(LineSkip::NotSale) => self.non_sale_lines += 1,
			Err(LineSkip::TooFewFields(_)) => self.short_lines += 1,
			Err(LineSkip::MissingContractDate | LineSkip::MissingPurchasePrice) => {
				self.missing_required += 1
			}
		}
	}

	pub fn merge(&mut self, other: &ParseStats) {
		self.lines += other.lines;
		self.sale_records += other.sale_records;
		self.non_sale_lines += other.non_sale_lines;
		self.short_lines += other.short_lines;
		self.missing_required += other.missing_required;
	}

	/// Sale-marked lines that were rejected as malformed
	pub fn malformed(&self) -> usize {
		self.short_lines + self.missing_required
	}
}

impl std::fmt::Display for ParseStats {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{} lines: {} sale records, {} other record types, {} short, {} missing date/price",
			self.lines,
			self.sale_records,
			self.non_sale_lines,
			self.short_lines,
			self.missing_required
		)
	}
}

/// A raw extract file decoded into memory.
///
/// Invalid UTF-8 is replaced with U+FFFD so one bad byte costs at most the
/// line it sits on.
#[derive(Debug, Clone)]
pub struct RawFile {
	pub path: PathBuf,
	/// Base name, attached to every record as provenance
	pub name: String,
	text: String,
}

impl RawFile {
	pub fn read(path: &Path) -> IngestResult<Self> {
		let bytes = std::fs::read(path).map_err(|source| IngestError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(Self::from_bytes(path, &bytes))
	}

	pub fn from_bytes(path: &Path, bytes: &[u8]) -> Self {
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();
		Self {
			path: path.to_path_buf(),
			name,
			text: String::from_utf8_lossy(bytes).into_owned(),
		}
	}

	/// Lazily parse the file, yielding one record per qualifying line
	pub fn records(&self) -> Records<'_> {
		Records {
			lines: self.text.lines(),
			source_file: &self.name,
			stats: ParseStats::default(),
		}
	}
}

/// Iterator over the sale records of a [`RawFile`]
pub struct Records<'a> {
	lines: std::str::Lines<'a>,
	source_file: &'a str,
	stats: ParseStats,
}

impl Records<'_> {
	/// Counters for the lines consumed so far
	pub fn stats(&self) -> ParseStats {
		self.stats
	}
}

impl Iterator for Records<'_> {
	type Item = SalesRecord;

	fn next(&mut self) -> Option<SalesRecord> {
		loop {
			let line = self.lines.next()?;
			let outcome = parse_line(line, self.source_file);
			self.stats.observe(&outcome);
			if let Ok(record) = outcome {
				return Some(record);
			}
		}
	}
}

/// All records of one file with its line counters
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
	pub records: Vec<SalesRecord>,
	pub stats: ParseStats,
}

/// Read and fully parse one raw file
pub fn parse_file(path: &Path) -> IngestResult<ParsedFile> {
	let raw = RawFile::read(path)?;
	let mut records = raw.records();
	let parsed: Vec<SalesRecord> = records.by_ref().collect();
	let stats = records.stats();
	trace!("Parser: {} -> {}", raw.name, stats);
	Ok(ParsedFile {
		records: parsed,
		stats,
	})
}
