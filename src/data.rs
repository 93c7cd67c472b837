//! Record types for each pipeline stage and the columnar sales table

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::*;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01, the epoch of polars `Date`
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// One sale as extracted from a raw line, before any type coercion.
///
/// Fields hold the raw text of their position. `suburb` and `property_type`
/// are upper-cased and the free-text fields are trimmed at parse time;
/// `contract_date`, `purchase_price` and `area` are left untouched for the
/// normalization stage to coerce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRecord {
	pub district_code: String,
	pub property_id: String,
	pub valuation_num: String,
	pub house_number: String,
	pub street_name: String,
	pub suburb: String,
	pub postcode: String,
	pub area: String,
	pub area_unit: String,
	pub contract_date: String,
	pub purchase_price: String,
	pub zoning: String,
	pub property_type: String,
	/// Base name of the raw file the line came from
	pub source_file: String,
}

/// A sale whose required fields coerced cleanly, with derived calendar and
/// address fields. Built once per surviving `SalesRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSalesRecord {
	pub district_code: String,
	pub property_id: String,
	pub valuation_num: String,
	pub house_number: String,
	pub street_name: String,
	pub suburb: String,
	pub postcode: String,
	pub area: Option<f64>,
	pub area_unit: String,
	pub contract_date: NaiveDate,
	pub purchase_price: f64,
	pub zoning: String,
	pub property_type: String,
	pub source_file: String,
	pub year: i32,
	pub month: i32,
	pub quarter: i32,
	pub full_address: String,
}

impl TypedSalesRecord {
	/// Days since 1970-01-01, the physical representation of a polars `Date`
	pub fn contract_date_days(&self) -> i32 {
		self.contract_date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
	}
}

/// The sales history table: every typed record, one row each.
///
/// ## DataFrame Schema
///
/// - identity, location, zoning, type and provenance columns: `String`
/// - **`Area`**: nullable `Float64`
/// - **`ContractDate`**: `Date`
/// - **`PurchasePrice`**: `Float64`
/// - **`Year`**, **`Month`**, **`Quarter`**: `Int32`
/// - **`FullAddress`**: `String`
///
/// Column order follows [`SALES_HISTORY_COLUMNS`]. Row order carries no
/// meaning; parallel ingestion does not preserve file order.
#[derive(Debug, Clone)]
pub struct SalesHistory {
	pub data: DataFrame,
}

impl SalesHistory {
	/// Create an empty table with the full schema
	pub fn empty() -> PolarsResult<Self> {
		Self::from_records(&[])
	}

	/// Wrap a table loaded from disk
	pub fn from_dataframe(data: DataFrame) -> Self {
		Self { data }
	}

	/// Build the table from typed records
	pub fn from_records(records: &[TypedSalesRecord]) -> PolarsResult<Self> {
		fn text<'a>(
			records: &'a [TypedSalesRecord],
			field: impl Fn(&'a TypedSalesRecord) -> &'a str,
		) -> Vec<&'a str> {
			records.iter().map(field).collect()
		}

		let areas: Vec<Option<f64>> = records.iter().map(|r| r.area).collect();
		let prices: Vec<f64> = records.iter().map(|r| r.purchase_price).collect();
		let dates = Series::new(
			CONTRACT_DATE,
			records
				.iter()
				.map(TypedSalesRecord::contract_date_days)
				.collect::<Vec<i32>>(),
		)
		.cast(&DataType::Date)?;
		let years: Vec<i32> = records.iter().map(|r| r.year).collect();
		let months: Vec<i32> = records.iter().map(|r| r.month).collect();
		let quarters: Vec<i32> = records.iter().map(|r| r.quarter).collect();

		let data = DataFrame::new(vec![
			Series::new(DISTRICT_CODE, text(records, |r| r.district_code.as_str())),
			Series::new(PROPERTY_ID, text(records, |r| r.property_id.as_str())),
			Series::new(VALUATION_NUM, text(records, |r| r.valuation_num.as_str())),
			Series::new(HOUSE_NUMBER, text(records, |r| r.house_number.as_str())),
			Series::new(STREET_NAME, text(records, |r| r.street_name.as_str())),
			Series::new(SUBURB, text(records, |r| r.suburb.as_str())),
			Series::new(POSTCODE, text(records, |r| r.postcode.as_str())),
			Series::new(AREA, areas),
			Series::new(AREA_UNIT, text(records, |r| r.area_unit.as_str())),
			dates,
			Series::new(PURCHASE_PRICE, prices),
			Series::new(ZONING, text(records, |r| r.zoning.as_str())),
			Series::new(PROPERTY_TYPE, text(records, |r| r.property_type.as_str())),
			Series::new(SOURCE_FILE, text(records, |r| r.source_file.as_str())),
			Series::new(YEAR, years),
			Series::new(MONTH, months),
			Series::new(QUARTER, quarters),
			Series::new(FULL_ADDRESS, text(records, |r| r.full_address.as_str())),
		])?;

		Ok(Self { data })
	}

	pub fn len(&self) -> usize {
		self.data.height()
	}

	pub fn is_empty(&self) -> bool {
		self.data.height() == 0
	}

	/// Row counts per contract year, ascending by year
	pub fn counts_by_year(&self) -> PolarsResult<Vec<(i32, usize)>> {
		let mut counts = BTreeMap::new();
		for year in self.data.column(YEAR)?.i32()?.into_iter().flatten() {
			*counts.entry(year).or_insert(0usize) += 1;
		}
		Ok(counts.into_iter().collect())
	}
}

/// Derive the calendar quarter (1-4) of a date
pub fn quarter_of(date: NaiveDate) -> i32 {
	(date.month0() / 3 + 1) as i32
}
