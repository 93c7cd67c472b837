//! Fixtures shared by unit tests

use chrono::{Datelike, NaiveDate};
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::data::{TypedSalesRecord, quarter_of};

/// Build a semicolon-delimited "B" line with the given key fields.
/// Other positions carry plausible values; the line has 24 fields.
pub fn sale_line(property_id: &str, contract_date: &str, price: &str, property_type: &str) -> String {
	let mut fields = vec![String::new(); 24];
	fields[0] = "B".to_string();
	fields[1] = "001".to_string();
	fields[2] = property_id.to_string();
	fields[3] = "1".to_string();
	fields[4] = "20200120 01:02".to_string();
	fields[7] = " 12 ".to_string();
	fields[8] = "SMITH  ST ".to_string();
	fields[9] = " parramatta".to_string();
	fields[10] = "2150".to_string();
	fields[11] = "556.4".to_string();
	fields[12] = "M".to_string();
	fields[13] = contract_date.to_string();
	fields[14] = "20200120".to_string();
	fields[15] = price.to_string();
	fields[16] = "R2".to_string();
	fields[17] = "R".to_string();
	fields[18] = property_type.to_string();
	fields.join(";")
}

pub fn typed_record(property_id: &str, date: (i32, u32, u32), price: f64) -> TypedSalesRecord {
	let contract_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
	TypedSalesRecord {
		district_code: "001".to_string(),
		property_id: property_id.to_string(),
		valuation_num: "1".to_string(),
		house_number: "12".to_string(),
		street_name: "SMITH ST".to_string(),
		suburb: "PARRAMATTA".to_string(),
		postcode: "2150".to_string(),
		area: Some(556.4),
		area_unit: "M".to_string(),
		contract_date,
		purchase_price: price,
		zoning: "R2".to_string(),
		property_type: "RESIDENCE".to_string(),
		source_file: "001_SALES_DATA.DAT".to_string(),
		year: contract_date.year(),
		month: contract_date.month() as i32,
		quarter: quarter_of(contract_date),
		full_address: "12 SMITH ST PARRAMATTA 2150".to_string(),
	}
}

/// An in-memory zip archive holding `entries` uncompressed
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
	let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
	for (name, bytes) in entries {
		zip.start_file(*name, options).unwrap();
		zip.write_all(bytes).unwrap();
	}
	zip.finish().unwrap().into_inner()
}
