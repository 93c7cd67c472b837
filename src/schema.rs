//! Column names of the persisted datasets and the contracts consumers rely on

use polars::prelude::*;

use crate::error::{PipelineError, PipelineResult};

pub const DISTRICT_CODE: &str = "DistrictCode";
pub const PROPERTY_ID: &str = "PropertyID";
pub const VALUATION_NUM: &str = "ValuationNum";
pub const HOUSE_NUMBER: &str = "HouseNumber";
pub const STREET_NAME: &str = "StreetName";
pub const SUBURB: &str = "Suburb";
pub const POSTCODE: &str = "Postcode";
pub const AREA: &str = "Area";
pub const AREA_UNIT: &str = "AreaUnit";
pub const CONTRACT_DATE: &str = "ContractDate";
pub const PURCHASE_PRICE: &str = "PurchasePrice";
pub const ZONING: &str = "Zoning";
pub const PROPERTY_TYPE: &str = "PropertyType";
pub const SOURCE_FILE: &str = "SourceFile";
pub const YEAR: &str = "Year";
pub const MONTH: &str = "Month";
pub const QUARTER: &str = "Quarter";
pub const FULL_ADDRESS: &str = "FullAddress";

/// Column order of the sales history and training datasets
pub const SALES_HISTORY_COLUMNS: [&str; 18] = [
	DISTRICT_CODE,
	PROPERTY_ID,
	VALUATION_NUM,
	HOUSE_NUMBER,
	STREET_NAME,
	SUBURB,
	POSTCODE,
	AREA,
	AREA_UNIT,
	CONTRACT_DATE,
	PURCHASE_PRICE,
	ZONING,
	PROPERTY_TYPE,
	SOURCE_FILE,
	YEAR,
	MONTH,
	QUARTER,
	FULL_ADDRESS,
];

/// Columns the dashboard reads from the sales history
pub const DASHBOARD_COLUMNS: [&str; 8] = [
	YEAR,
	SUBURB,
	PROPERTY_TYPE,
	PURCHASE_PRICE,
	CONTRACT_DATE,
	POSTCODE,
	DISTRICT_CODE,
	ZONING,
];

/// Columns model training reads from the training dataset (features + target)
pub const TRAINING_COLUMNS: [&str; 10] = [
	SUBURB,
	PROPERTY_TYPE,
	POSTCODE,
	DISTRICT_CODE,
	ZONING,
	AREA,
	YEAR,
	MONTH,
	QUARTER,
	PURCHASE_PRICE,
];

/// Key a training row must be unique on
pub const DEDUP_KEY: [&str; 3] = [PROPERTY_ID, CONTRACT_DATE, PURCHASE_PRICE];

/// Check that `df` carries every column in `required`
pub fn check_columns(
	df: &DataFrame,
	required: &[&str],
	dataset: &'static str,
) -> PipelineResult<()> {
	let present = df.get_column_names();
	let missing: Vec<String> = required
		.iter()
		.filter(|name| !present.contains(*name))
		.map(|name| name.to_string())
		.collect();
	if missing.is_empty() {
		Ok(())
	} else {
		Err(PipelineError::Contract { dataset, missing })
	}
}
