//! Error types for the land-sale pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error covering every fatal failure mode of a pipeline stage.
///
/// Most bad input never reaches this type. Corrupt archives, malformed lines
/// and unparseable fields are skipped and counted by the stage that meets
/// them. What remains here are the conditions that stop a stage outright:
///
/// - **Missing input**: the raw files or the sales-history file a stage needs
///   are absent. The stage exits without writing anything.
/// - **Empty dataset**: ingestion or normalization produced no rows, so there
///   is nothing meaningful to persist.
/// - **Contract violations**: a dataset about to be written lacks a column a
///   downstream consumer depends on.
/// - **Ingestion failures**: every parallel chunk failed, or the worker pool
///   could not be built.
/// - **I/O, Polars and JSON errors** raised while persisting or loading.
///
/// ```rust
/// use landsales::{Pipeline, PipelineConfig, PipelineError};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::new(PipelineConfig::default())?;
/// match pipeline.clean() {
///     Ok(summary) => println!("{summary}"),
///     Err(PipelineError::MissingInput { stage, path }) => {
///         eprintln!("{stage}: {} not found, run `process` first", path.display());
///     }
///     Err(err) => return Err(err.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
	/// File system I/O errors
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Polars DataFrame and Parquet errors
	#[error("Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	/// Metadata sidecar or config file (de)serialization errors
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Archive error: {0}")]
	Archive(#[from] ArchiveError),

	#[error("Ingestion error: {0}")]
	Ingest(#[from] IngestError),

	/// An input the stage depends on does not exist
	#[error("{stage}: required input not found: {}", path.display())]
	MissingInput { stage: &'static str, path: PathBuf },

	/// A stage produced zero rows and refused to persist them
	#[error("{stage}: no records to write")]
	EmptyDataset { stage: &'static str },

	/// A dataset is missing columns a downstream consumer requires
	#[error("{dataset} is missing required columns: {}", missing.join(", "))]
	Contract {
		dataset: &'static str,
		missing: Vec<String>,
	},

	#[error("Configuration error: {0}")]
	Config(String),
}

/// Archive extraction errors. The unpacker turns these into skips.
#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("cannot open archive {}: {source}", path.display())]
	Open {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("corrupt archive {}: {source}", path.display())]
	Zip {
		path: PathBuf,
		#[source]
		source: zip::result::ZipError,
	},

	#[error("Archive I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Parallel ingestion errors
#[derive(Debug, Error)]
pub enum IngestError {
	/// A single raw file could not be read; the file is skipped
	#[error("cannot read raw file {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("worker pool unavailable: {0}")]
	WorkerPool(String),

	/// Every dispatched chunk failed, so the merged result would be meaningless
	#[error("all {chunks} ingestion chunks failed")]
	AllChunksFailed { chunks: usize },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test_log::test]
	fn test_pipeline_error_display() {
		let error = PipelineError::Config("workers must be at least 1".to_string());
		assert_eq!(
			error.to_string(),
			"Configuration error: workers must be at least 1"
		);

		let error = PipelineError::MissingInput {
			stage: "clean",
			path: PathBuf::from("/data/sales_history.parquet"),
		};
		assert_eq!(
			error.to_string(),
			"clean: required input not found: /data/sales_history.parquet"
		);

		let error = PipelineError::EmptyDataset { stage: "process" };
		assert_eq!(error.to_string(), "process: no records to write");

		let error = PipelineError::Contract {
			dataset: "training dataset",
			missing: vec!["Area".to_string(), "Quarter".to_string()],
		};
		assert_eq!(
			error.to_string(),
			"training dataset is missing required columns: Area, Quarter"
		);
	}

	#[test_log::test]
	fn test_ingest_error_display() {
		let error = IngestError::AllChunksFailed { chunks: 3 };
		assert_eq!(error.to_string(), "all 3 ingestion chunks failed");
		let wrapped: PipelineError = error.into();
		assert_eq!(
			wrapped.to_string(),
			"Ingestion error: all 3 ingestion chunks failed"
		);

		let error = IngestError::Read {
			path: PathBuf::from("/data/001.DAT"),
			source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
		};
		assert_eq!(error.to_string(), "cannot read raw file /data/001.DAT: denied");
	}

	#[test_log::test]
	fn test_error_conversion() {
		let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
		let error: PipelineError = io_error.into();
		assert!(matches!(error, PipelineError::Io(_)));

		let ingest_error = IngestError::WorkerPool("no threads".to_string());
		let error: PipelineError = ingest_error.into();
		assert!(matches!(error, PipelineError::Ingest(_)));

		let archive_error = ArchiveError::Io(std::io::Error::other("disk full"));
		let error: PipelineError = archive_error.into();
		assert!(matches!(error, PipelineError::Archive(_)));
	}
}
