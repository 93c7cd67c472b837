//! Quality filter: derives the training dataset from the sales history

use polars::prelude::*;

use crate::config::QualityRules;
use crate::data::SalesHistory;
use crate::error::PipelineResult;
use crate::report::SurvivalLog;
use crate::schema::{DEDUP_KEY, PROPERTY_TYPE, PURCHASE_PRICE, YEAR};
use crate::systems::Stage;

/// The filtered training table and how many rows each rule kept
#[derive(Debug, Clone)]
pub struct TrainingSet {
	pub data: DataFrame,
	pub survival: SurvivalLog,
}

impl TrainingSet {
	pub fn len(&self) -> usize {
		self.data.height()
	}

	pub fn is_empty(&self) -> bool {
		self.data.height() == 0
	}
}

/// Applies the acceptance rules in order: year range, property type
/// whitelist, price range, then deduplication on
/// (PropertyID, ContractDate, PurchasePrice). Every bound is inclusive.
/// Each rule can only shrink the table.
#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
	pub rules: QualityRules,
}

impl QualityFilter {
	pub fn new(rules: QualityRules) -> Self {
		Self { rules }
	}

	fn property_type_predicate(&self) -> Expr {
		self.rules
			.property_types
			.iter()
			.map(|t| col(PROPERTY_TYPE).eq(lit(t.clone())))
			.reduce(|acc, e| acc.or(e))
			.unwrap_or(lit(false))
	}

	pub fn apply(&self, history: &SalesHistory) -> PipelineResult<TrainingSet> {
		let rules = &self.rules;
		let mut survival = SurvivalLog::new(history.len());

		let df = history
			.data
			.clone()
			.lazy()
			.filter(
				col(YEAR)
					.gt_eq(lit(rules.min_year))
					.and(col(YEAR).lt_eq(lit(rules.max_year))),
			)
			.collect()?;
		survival.record(
			format!("Filtering Years ({}-{})", rules.min_year, rules.max_year),
			df.height(),
		);

		let df = df.lazy().filter(self.property_type_predicate()).collect()?;
		survival.record(
			format!("Filtering Property Types ({})", rules.property_types.join(" / ")),
			df.height(),
		);

		let df = df
			.lazy()
			.filter(
				col(PURCHASE_PRICE)
					.gt_eq(lit(rules.min_price))
					.and(col(PURCHASE_PRICE).lt_eq(lit(rules.max_price))),
			)
			.collect()?;
		survival.record(
			format!("Filtering Price Outliers (${}-${})", rules.min_price, rules.max_price),
			df.height(),
		);

		let key = DEDUP_KEY.iter().map(|c| c.to_string()).collect();
		let df = df
			.lazy()
			.unique_stable(Some(key), UniqueKeepStrategy::First)
			.collect()?;
		survival.record("Dropping duplicate sales", df.height());

		Ok(TrainingSet { data: df, survival })
	}
}

impl Stage for QualityFilter {
	type Input = SalesHistory;
	type Output = TrainingSet;

	fn run(&self, history: SalesHistory) -> PipelineResult<TrainingSet> {
		self.apply(&history)
	}

	fn name(&self) -> &'static str {
		"QualityFilter"
	}

	fn description(&self) -> &'static str {
		"Applies year, type and price rules and drops duplicate sales"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::TypedSalesRecord;
	use crate::schema::PROPERTY_ID;
	use crate::testing::typed_record;

	fn ids(set: &TrainingSet) -> Vec<String> {
		let mut ids: Vec<String> = set
			.data
			.column(PROPERTY_ID)
			.unwrap()
			.str()
			.unwrap()
			.into_iter()
			.flatten()
			.map(str::to_string)
			.collect();
		ids.sort();
		ids
	}

	fn with_type(mut r: TypedSalesRecord, property_type: &str) -> TypedSalesRecord {
		r.property_type = property_type.to_string();
		r
	}

	fn history(records: &[TypedSalesRecord]) -> SalesHistory {
		SalesHistory::from_records(records).unwrap()
	}

	#[test_log::test]
	fn test_year_bounds_inclusive() {
		let h = history(&[
			typed_record("y2017", (2017, 12, 31), 500000.0),
			typed_record("y2018", (2018, 1, 1), 500000.0),
			typed_record("y2024", (2024, 12, 31), 500000.0),
			typed_record("y2025", (2025, 1, 1), 500000.0),
		]);

		let set = QualityFilter::default().apply(&h).unwrap();
		assert_eq!(ids(&set), vec!["y2018", "y2024"]);
	}

	#[test_log::test]
	fn test_price_bounds_inclusive() {
		let h = history(&[
			typed_record("low", (2020, 1, 1), 199_999.99),
			typed_record("min", (2020, 1, 1), 200_000.0),
			typed_record("max", (2020, 1, 1), 10_000_000.0),
			typed_record("high", (2020, 1, 1), 10_000_000.01),
		]);

		let set = QualityFilter::default().apply(&h).unwrap();
		assert_eq!(ids(&set), vec!["max", "min"]);
	}

	#[test_log::test]
	fn test_property_type_whitelist() {
		let h = history(&[
			with_type(typed_record("house", (2020, 1, 1), 500000.0), "RESIDENCE"),
			with_type(typed_record("unit", (2020, 1, 1), 500000.0), "STRATA UNIT"),
			with_type(typed_record("land", (2020, 1, 1), 500000.0), "VACANT LAND"),
			with_type(typed_record("lower", (2020, 1, 1), 500000.0), "residence"),
		]);

		let set = QualityFilter::default().apply(&h).unwrap();
		assert_eq!(ids(&set), vec!["house", "unit"]);
	}

	#[test_log::test]
	fn test_dedup_on_key_triple() {
		let mut other_source = typed_record("1", (2020, 5, 1), 500000.0);
		other_source.source_file = "002_SALES_DATA.DAT".to_string();
		let h = history(&[
			typed_record("1", (2020, 5, 1), 500000.0),
			other_source,
			typed_record("1", (2020, 5, 2), 500000.0),
			typed_record("1", (2020, 5, 1), 510000.0),
			typed_record("2", (2020, 5, 1), 500000.0),
		]);

		let set = QualityFilter::default().apply(&h).unwrap();
		assert_eq!(set.len(), 4);
		// the first occurrence survives
		assert_eq!(
			set.data.column("SourceFile").unwrap().str().unwrap().get(0),
			Some("001_SALES_DATA.DAT")
		);
	}

	#[test_log::test]
	fn test_survival_log_never_grows() {
		let h = history(&[
			typed_record("a", (2016, 1, 1), 500000.0),
			with_type(typed_record("b", (2020, 1, 1), 500000.0), "COMMERCIAL"),
			typed_record("c", (2020, 1, 1), 100.0),
			typed_record("d", (2020, 1, 1), 500000.0),
			typed_record("d", (2020, 1, 1), 500000.0),
			typed_record("e", (2021, 3, 1), 750000.0),
		]);

		let set = QualityFilter::default().apply(&h).unwrap();
		let remaining: Vec<usize> = set.survival.steps.iter().map(|s| s.remaining).collect();
		assert_eq!(set.survival.original, 6);
		assert_eq!(remaining, vec![5, 4, 3, 2]);
		assert_eq!(set.survival.remaining(), set.len());
		assert_eq!(ids(&set), vec!["d", "e"]);
	}

	#[test_log::test]
	fn test_filter_is_idempotent() {
		let h = history(&[
			typed_record("a", (2020, 1, 1), 500000.0),
			typed_record("a", (2020, 1, 1), 500000.0),
			typed_record("b", (2019, 1, 1), 900000.0),
		]);
		let filter = QualityFilter::default();

		let once = filter.apply(&h).unwrap();
		let twice = filter
			.apply(&SalesHistory::from_dataframe(once.data.clone()))
			.unwrap();
		assert_eq!(once.len(), 2);
		assert_eq!(twice.len(), 2);
		assert!(twice.data.equals(&once.data));
	}

	#[test_log::test]
	fn test_custom_rules_and_empty_input() {
		let filter = QualityFilter::new(QualityRules {
			min_year: 2020,
			max_year: 2020,
			property_types: vec!["RESIDENCE".to_string()],
			min_price: 1.0,
			max_price: 2.0e6,
		});
		let h = history(&[
			typed_record("a", (2020, 1, 1), 500000.0),
			typed_record("b", (2021, 1, 1), 500000.0),
		]);
		assert_eq!(ids(&filter.apply(&h).unwrap()), vec!["a"]);

		let empty = filter.apply(&SalesHistory::empty().unwrap()).unwrap();
		assert!(empty.is_empty());
		assert_eq!(empty.survival.steps.len(), 4);
	}
}
