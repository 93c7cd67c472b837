//! Pipeline configuration: directory layout, ingestion and filter rules

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// Settings for the parallel ingestion coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
	/// Number of parsing worker threads
	pub workers: usize,
	/// Target number of chunks per worker; more chunks smooth out skew from
	/// uneven file sizes at the cost of per-task overhead
	pub chunks_per_worker: usize,
	/// Stop waiting for outstanding chunks after this many idle seconds
	pub chunk_timeout_secs: Option<u64>,
}

impl Default for IngestSettings {
	fn default() -> Self {
		Self {
			workers: num_cpus::get().max(1),
			chunks_per_worker: 4,
			chunk_timeout_secs: None,
		}
	}
}

impl IngestSettings {
	pub fn chunk_timeout(&self) -> Option<Duration> {
		self.chunk_timeout_secs.map(Duration::from_secs)
	}
}

/// Rules applied while typing the merged records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeRules {
	/// Sales at or below this price are placeholder transfers and are dropped
	pub min_price_exclusive: f64,
}

impl Default for NormalizeRules {
	fn default() -> Self {
		Self {
			min_price_exclusive: 1000.0,
		}
	}
}

/// Acceptance rules for deriving the training dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityRules {
	pub min_year: i32,
	pub max_year: i32,
	pub property_types: Vec<String>,
	pub min_price: f64,
	pub max_price: f64,
}

impl Default for QualityRules {
	fn default() -> Self {
		Self {
			min_year: 2018,
			max_year: 2024,
			property_types: vec!["RESIDENCE".to_string(), "STRATA UNIT".to_string()],
			min_price: 200_000.0,
			max_price: 10_000_000.0,
		}
	}
}

/// Complete pipeline configuration.
///
/// Every field has a default matching the standard extract layout, so a bare
/// `PipelineConfig::default()` processes `./data`. A JSON file may override any
/// subset of fields:
///
/// ```json
/// { "data_dir": "/srv/sales", "ingest": { "workers": 8 }, "quality": { "min_year": 2020 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
	/// Directory holding archives, raw files and the persisted datasets
	pub data_dir: PathBuf,
	/// Raw extract file extension, matched case-insensitively
	pub raw_extension: String,
	pub sales_history_file: String,
	pub training_file: String,
	pub ingest: IngestSettings,
	pub normalize: NormalizeRules,
	pub quality: QualityRules,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("data"),
			raw_extension: "dat".to_string(),
			sales_history_file: "sales_history.parquet".to_string(),
			training_file: "training_data.parquet".to_string(),
			ingest: IngestSettings::default(),
			normalize: NormalizeRules::default(),
			quality: QualityRules::default(),
		}
	}
}

impl PipelineConfig {
	/// Load a JSON config file; omitted fields keep their defaults
	pub fn load(path: &Path) -> PipelineResult<Self> {
		if !path.exists() {
			return Err(PipelineError::MissingInput {
				stage: "config",
				path: path.to_path_buf(),
			});
		}
		let bytes = std::fs::read(path)?;
		let config: Self = serde_json::from_slice(&bytes)?;
		config.validate()?;
		Ok(config)
	}

	pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.data_dir = dir.into();
		self
	}

	pub fn with_workers(mut self, workers: usize) -> Self {
		self.ingest.workers = workers;
		self
	}

	pub fn with_chunk_timeout_secs(mut self, secs: u64) -> Self {
		self.ingest.chunk_timeout_secs = Some(secs);
		self
	}

	pub fn with_quality_rules(mut self, rules: QualityRules) -> Self {
		self.quality = rules;
		self
	}

	pub fn sales_history_path(&self) -> PathBuf {
		self.data_dir.join(&self.sales_history_file)
	}

	pub fn training_path(&self) -> PathBuf {
		self.data_dir.join(&self.training_file)
	}

	/// Reject settings that would make a stage meaningless
	pub fn validate(&self) -> PipelineResult<()> {
		if self.ingest.workers == 0 {
			return Err(PipelineError::Config(
				"ingest.workers must be at least 1".to_string(),
			));
		}
		if self.ingest.chunks_per_worker == 0 {
			return Err(PipelineError::Config(
				"ingest.chunks_per_worker must be at least 1".to_string(),
			));
		}
		if self.raw_extension.is_empty() {
			return Err(PipelineError::Config(
				"raw_extension must not be empty".to_string(),
			));
		}
		if self.sales_history_file == self.training_file {
			return Err(PipelineError::Config(
				"sales history and training outputs must be different files".to_string(),
			));
		}
		let q = &self.quality;
		if q.min_year > q.max_year {
			return Err(PipelineError::Config(format!(
				"quality year range is inverted: {}..={}",
				q.min_year, q.max_year
			)));
		}
		if q.min_price > q.max_price {
			return Err(PipelineError::Config(format!(
				"quality price range is inverted: {}..={}",
				q.min_price, q.max_price
			)));
		}
		if q.property_types.is_empty() {
			return Err(PipelineError::Config(
				"quality.property_types must name at least one type".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_defaults() {
		let config = PipelineConfig::default();
		assert_eq!(config.data_dir, PathBuf::from("data"));
		assert_eq!(config.ingest.chunks_per_worker, 4);
		assert!(config.ingest.workers >= 1);
		assert_eq!(config.normalize.min_price_exclusive, 1000.0);
		assert_eq!(config.quality.min_year, 2018);
		assert_eq!(config.quality.max_year, 2024);
		assert_eq!(config.quality.property_types, vec!["RESIDENCE", "STRATA UNIT"]);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_output_paths() {
		let config = PipelineConfig::default().with_data_dir("/srv/sales");
		assert_eq!(
			config.sales_history_path(),
			PathBuf::from("/srv/sales/sales_history.parquet")
		);
		assert_eq!(
			config.training_path(),
			PathBuf::from("/srv/sales/training_data.parquet")
		);
	}

	#[test]
	fn test_validate_rejects_bad_settings() {
		assert!(PipelineConfig::default().with_workers(0).validate().is_err());

		let mut config = PipelineConfig::default();
		config.quality.min_year = 2025;
		assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

		let mut config = PipelineConfig::default();
		config.quality.property_types.clear();
		assert!(config.validate().is_err());

		let mut config = PipelineConfig::default();
		config.training_file = config.sales_history_file.clone();
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_load_partial_json() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("pipeline.json");
		std::fs::write(
			&path,
			r#"{ "data_dir": "/srv/sales", "ingest": { "workers": 3 }, "quality": { "min_year": 2020 } }"#,
		)
		.unwrap();

		let config = PipelineConfig::load(&path).unwrap();
		assert_eq!(config.data_dir, PathBuf::from("/srv/sales"));
		assert_eq!(config.ingest.workers, 3);
		assert_eq!(config.ingest.chunks_per_worker, 4);
		assert_eq!(config.quality.min_year, 2020);
		assert_eq!(config.quality.max_year, 2024);
		assert_eq!(config.training_file, "training_data.parquet");
	}

	#[test]
	fn test_load_missing_file() {
		let temp_dir = TempDir::new().unwrap();
		let result = PipelineConfig::load(&temp_dir.path().join("absent.json"));
		assert!(matches!(result, Err(PipelineError::MissingInput { .. })));
	}
}
