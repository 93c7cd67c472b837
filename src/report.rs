//! Row-count reporting: survival tables and raw file summaries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

use crate::systems::normalize::parse_price;
use crate::systems::parser::{ParseStats, ParsedFile};

/// Rows left after one filtering step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalStep {
	pub label: String,
	pub remaining: usize,
}

/// Stage-by-stage row counts relative to the original input.
///
/// Each recorded step is logged at `info` as it happens; the `Display` impl
/// renders the whole table for the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalLog {
	pub original: usize,
	pub steps: Vec<SurvivalStep>,
}

impl SurvivalLog {
	pub fn new(original: usize) -> Self {
		Self {
			original,
			steps: Vec::new(),
		}
	}

	pub fn record(&mut self, label: impl Into<String>, remaining: usize) {
		let label = label.into();
		info!(
			"{}: {} remaining ({:.1}%)",
			label,
			remaining,
			self.percent_of_original(remaining)
		);
		self.steps.push(SurvivalStep { label, remaining });
	}

	/// Rows left after the last step
	pub fn remaining(&self) -> usize {
		self.steps.last().map_or(self.original, |s| s.remaining)
	}

	pub fn percent_of_original(&self, remaining: usize) -> f64 {
		if self.original == 0 {
			0.0
		} else {
			remaining as f64 * 100.0 / self.original as f64
		}
	}
}

impl fmt::Display for SurvivalLog {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Original Records: {}", self.original)?;
		for step in &self.steps {
			write!(
				f,
				"\n{}\n -> Remaining: {} ({:.1}%)",
				step.label,
				step.remaining,
				self.percent_of_original(step.remaining)
			)?;
		}
		Ok(())
	}
}

/// Price statistics over parseable positive prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceStats {
	pub count: usize,
	pub min: f64,
	pub max: f64,
	pub mean: f64,
	pub median: f64,
}

impl PriceStats {
	pub fn from_prices(mut prices: Vec<f64>) -> Option<Self> {
		if prices.is_empty() {
			return None;
		}
		prices.sort_by(f64::total_cmp);
		let count = prices.len();
		let median = if count % 2 == 0 {
			(prices[count / 2 - 1] + prices[count / 2]) / 2.0
		} else {
			prices[count / 2]
		};
		Some(Self {
			count,
			min: prices[0],
			max: prices[count - 1],
			mean: prices.iter().sum::<f64>() / count as f64,
			median,
		})
	}
}

/// Quick look at one raw extract file, for eyeballing a new delivery
#[derive(Debug, Clone, Serialize)]
pub struct RawFileSummary {
	pub file: String,
	pub sale_records: usize,
	pub prices: Option<PriceStats>,
	/// Most common first
	pub property_types: Vec<(String, usize)>,
	pub top_suburbs: Vec<(String, usize)>,
	pub stats: ParseStats,
}

const TOP_SUBURBS: usize = 5;

/// Value counts, most common first; ties ordered by value
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
	let mut counts: HashMap<&str, usize> = HashMap::new();
	for v in values {
		*counts.entry(v).or_default() += 1;
	}
	let mut counts: Vec<(String, usize)> =
		counts.into_iter().map(|(v, n)| (v.to_string(), n)).collect();
	counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	counts
}

impl RawFileSummary {
	pub fn from_parsed(file: impl Into<String>, parsed: &ParsedFile) -> Self {
		let prices = parsed
			.records
			.iter()
			.filter_map(|r| parse_price(&r.purchase_price))
			.filter(|p| *p > 0.0)
			.collect();
		let mut top_suburbs = most_common(parsed.records.iter().map(|r| r.suburb.as_str()));
		top_suburbs.truncate(TOP_SUBURBS);

		Self {
			file: file.into(),
			sale_records: parsed.records.len(),
			prices: PriceStats::from_prices(prices),
			property_types: most_common(parsed.records.iter().map(|r| r.property_type.as_str())),
			top_suburbs,
			stats: parsed.stats,
		}
	}
}

impl fmt::Display for RawFileSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "--- {}: {} sale records ---", self.file, self.sale_records)?;
		writeln!(f, "{}", self.stats)?;
		if let Some(p) = &self.prices {
			writeln!(f, "\nPrice Statistics:")?;
			writeln!(f, "  Count:  {}", p.count)?;
			writeln!(f, "  Min:    ${:.0}", p.min)?;
			writeln!(f, "  Max:    ${:.0}", p.max)?;
			writeln!(f, "  Avg:    ${:.2}", p.mean)?;
			writeln!(f, "  Median: ${:.2}", p.median)?;
		}
		writeln!(f, "\nProperty Type Counts:")?;
		for (t, n) in &self.property_types {
			writeln!(f, "  {}: {}", t, n)?;
		}
		write!(f, "\nTop {} Suburbs:", TOP_SUBURBS)?;
		for (s, n) in &self.top_suburbs {
			write!(f, "\n  {}: {}", s, n)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::systems::parser::RawFile;
	use crate::testing::sale_line;
	use std::path::Path;

	#[test]
	fn test_survival_log_display() {
		let mut log = SurvivalLog::new(200);
		log.record("Filtering Years (2018-2024)", 150);
		log.record("Deduplicate", 149);

		assert_eq!(log.remaining(), 149);
		assert_eq!(
			log.to_string(),
			"Original Records: 200\n\
			 Filtering Years (2018-2024)\n -> Remaining: 150 (75.0%)\n\
			 Deduplicate\n -> Remaining: 149 (74.5%)"
		);
	}

	#[test]
	fn test_survival_log_empty_original() {
		let mut log = SurvivalLog::new(0);
		assert_eq!(log.remaining(), 0);
		log.record("Anything", 0);
		assert_eq!(log.percent_of_original(0), 0.0);
		assert!(log.to_string().ends_with("(0.0%)"));
	}

	#[test]
	fn test_price_stats() {
		let stats = PriceStats::from_prices(vec![300.0, 100.0, 200.0, 400.0]).unwrap();
		assert_eq!(stats.count, 4);
		assert_eq!(stats.min, 100.0);
		assert_eq!(stats.max, 400.0);
		assert_eq!(stats.mean, 250.0);
		assert_eq!(stats.median, 250.0);

		assert_eq!(PriceStats::from_prices(vec![5.0, 1.0, 3.0]).unwrap().median, 3.0);
		assert!(PriceStats::from_prices(Vec::new()).is_none());
	}

	#[test]
	fn test_raw_file_summary() {
		let text = [
			sale_line("1", "20200101", "500000", "RESIDENCE"),
			sale_line("2", "20200101", "700000", "STRATA UNIT"),
			sale_line("3", "20200101", "0", "RESIDENCE"),
			sale_line("4", "20200101", "junk", "VACANT LAND"),
			"S;noise".to_string(),
		]
		.join("\n");
		let raw = RawFile::from_bytes(Path::new("001.DAT"), text.as_bytes());
		let mut records = raw.records();
		let parsed = ParsedFile {
			records: records.by_ref().collect(),
			stats: records.stats(),
		};

		let summary = RawFileSummary::from_parsed("001.DAT", &parsed);

		assert_eq!(summary.sale_records, 4);
		assert_eq!(summary.stats.non_sale_lines, 1);
		let prices = summary.prices.unwrap();
		assert_eq!(prices.count, 2);
		assert_eq!(prices.mean, 600000.0);
		assert_eq!(
			summary.property_types,
			vec![
				("RESIDENCE".to_string(), 2),
				("STRATA UNIT".to_string(), 1),
				("VACANT LAND".to_string(), 1),
			]
		);
		assert_eq!(summary.top_suburbs, vec![("PARRAMATTA".to_string(), 4)]);
		assert!(summary.to_string().contains("Top 5 Suburbs:\n  PARRAMATTA: 4"));
	}
}
