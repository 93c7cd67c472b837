//! Normalization: typing raw records into the sales history

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::NormalizeRules;
use crate::data::{SalesRecord, TypedSalesRecord, quarter_of};
use crate::error::PipelineResult;
use crate::report::SurvivalLog;
use crate::systems::Stage;

/// Parse a purchase price. A leading `$` is accepted; anything that is not a
/// finite number is missing.
pub fn parse_price(raw: &str) -> Option<f64> {
	let raw = raw.trim();
	let raw = raw.strip_prefix('$').unwrap_or(raw);
	parse_finite(raw)
}

/// Parse a land area; blanks and junk are missing
pub fn parse_area(raw: &str) -> Option<f64> {
	parse_finite(raw.trim())
}

fn parse_finite(raw: &str) -> Option<f64> {
	raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an 8-digit `YYYYMMDD` contract date
pub fn parse_contract_date(raw: &str) -> Option<NaiveDate> {
	let raw = raw.trim();
	if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	let year = raw[0..4].parse().ok()?;
	let month = raw[4..6].parse().ok()?;
	let day = raw[6..8].parse().ok()?;
	NaiveDate::from_ymd_opt(year, month, day)
}

/// Join the address parts with single spaces, collapsing runs of whitespace
pub fn full_address(house_number: &str, street_name: &str, suburb: &str, postcode: &str) -> String {
	[house_number, street_name, suburb, postcode]
		.iter()
		.flat_map(|part| part.split_whitespace())
		.collect::<Vec<_>>()
		.join(" ")
}

/// Row accounting for one normalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
	pub input: usize,
	pub missing_price: usize,
	pub missing_date: usize,
	pub below_price_floor: usize,
	pub output: usize,
}

impl NormalizeReport {
	pub fn dropped(&self) -> usize {
		self.missing_price + self.missing_date + self.below_price_floor
	}

	/// Rows left after each drop rule, in the order the rules apply
	pub fn survival(&self) -> SurvivalLog {
		let mut log = SurvivalLog::new(self.input);
		let mut remaining = self.input - self.missing_price;
		log.record("Dropping records without a valid price", remaining);
		remaining -= self.missing_date;
		log.record("Dropping records without a valid contract date", remaining);
		remaining -= self.below_price_floor;
		log.record("Dropping nominal sales", remaining);
		log
	}
}

impl std::fmt::Display for NormalizeReport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "Raw records: {}", self.input)?;
		writeln!(f, "  dropped, missing or unparseable price: {}", self.missing_price)?;
		writeln!(f, "  dropped, missing or unparseable date: {}", self.missing_date)?;
		writeln!(f, "  dropped, at or below price floor: {}", self.below_price_floor)?;
		write!(f, "Typed records: {}", self.output)
	}
}

/// Coerces raw string records into [`TypedSalesRecord`]s.
///
/// Records missing a price or contract date after coercion are dropped, as
/// are nominal sales at or below `min_price_exclusive`. Drops are counted in
/// the [`NormalizeReport`], never logged per row.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
	pub rules: NormalizeRules,
}

enum Rejection {
	MissingPrice,
	MissingDate,
	BelowFloor,
}

impl Normalizer {
	pub fn new(rules: NormalizeRules) -> Self {
		Self { rules }
	}

	fn type_record(&self, record: SalesRecord) -> Result<TypedSalesRecord, Rejection> {
		let purchase_price = parse_price(&record.purchase_price).ok_or(Rejection::MissingPrice)?;
		let contract_date =
			parse_contract_date(&record.contract_date).ok_or(Rejection::MissingDate)?;
		if purchase_price <= self.rules.min_price_exclusive {
			return Err(Rejection::BelowFloor);
		}

		let full_address = full_address(
			&record.house_number,
			&record.street_name,
			&record.suburb,
			&record.postcode,
		);
		Ok(TypedSalesRecord {
			area: parse_area(&record.area),
			year: contract_date.year(),
			month: contract_date.month() as i32,
			quarter: quarter_of(contract_date),
			contract_date,
			purchase_price,
			full_address,
			district_code: record.district_code,
			property_id: record.property_id,
			valuation_num: record.valuation_num,
			house_number: record.house_number,
			street_name: record.street_name,
			suburb: record.suburb,
			postcode: record.postcode,
			area_unit: record.area_unit,
			zoning: record.zoning,
			property_type: record.property_type,
			source_file: record.source_file,
		})
	}

	pub fn normalize(&self, records: Vec<SalesRecord>) -> (Vec<TypedSalesRecord>, NormalizeReport) {
		let mut report = NormalizeReport {
			input: records.len(),
			..Default::default()
		};
		let mut typed = Vec::with_capacity(records.len());

		for record in records {
			match self.type_record(record) {
				Ok(t) => typed.push(t),
				Err(Rejection::MissingPrice) => report.missing_price += 1,
				Err(Rejection::MissingDate) => report.missing_date += 1,
				Err(Rejection::BelowFloor) => report.below_price_floor += 1,
			}
		}
		report.output = typed.len();

		debug!(
			"Normalize: {} missing price, {} missing date, {} at or below {}",
			report.missing_price,
			report.missing_date,
			report.below_price_floor,
			self.rules.min_price_exclusive
		);
		info!("Normalize: {} of {} records typed", report.output, report.input);
		(typed, report)
	}
}

impl Stage for Normalizer {
	type Input = Vec<SalesRecord>;
	type Output = (Vec<TypedSalesRecord>, NormalizeReport);

	fn run(&self, records: Vec<SalesRecord>) -> PipelineResult<Self::Output> {
		Ok(self.normalize(records))
	}

	fn name(&self) -> &'static str {
		"Normalizer"
	}

	fn description(&self) -> &'static str {
		"Coerces prices and dates, derives calendar fields and addresses"
	}
}
