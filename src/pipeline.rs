//! Main API: the extract, process and clean stages over one data directory

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::SalesHistory;
use crate::error::{PipelineError, PipelineResult};
use crate::persist::{DatasetKind, DatasetStore};
use crate::report::{RawFileSummary, SurvivalLog};
use crate::schema::{DASHBOARD_COLUMNS, TRAINING_COLUMNS, check_columns};
use crate::systems::ingest::{IngestOutcome, ProgressCallback};
use crate::systems::normalize::NormalizeReport;
use crate::systems::parser;
use crate::systems::unpack::UnpackReport;
use crate::systems::{
	ArchiveUnpacker, IngestCoordinator, Normalizer, QualityFilter, RawFileDiscovery, run_stage,
};

#[derive(Debug, Clone)]
pub struct ExtractSummary {
	pub unpack: UnpackReport,
	pub raw_files: usize,
}

impl fmt::Display for ExtractSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.unpack)?;
		write!(f, "Raw files ready: {}", self.raw_files)
	}
}

#[derive(Debug)]
pub struct ProcessSummary {
	/// Raw records have been moved on to normalization
	pub ingest: IngestOutcome,
	pub normalize: NormalizeReport,
	/// Rows left after each normalization drop rule
	pub survival: SurvivalLog,
	pub rows_written: usize,
	pub rows_by_year: Vec<(i32, usize)>,
	pub output: PathBuf,
}

impl fmt::Display for ProcessSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.ingest)?;
		writeln!(f, "{}", self.normalize)?;
		writeln!(f, "{}", self.survival)?;
		writeln!(f, "Records by year:")?;
		for (year, n) in &self.rows_by_year {
			writeln!(f, "  {}: {}", year, n)?;
		}
		write!(f, "Saved {} records to {}", self.rows_written, self.output.display())
	}
}

#[derive(Debug, Clone)]
pub struct CleanSummary {
	pub survival: SurvivalLog,
	pub rows_written: usize,
	pub output: PathBuf,
}

impl fmt::Display for CleanSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.survival)?;
		write!(f, "Saved {} records to {}", self.rows_written, self.output.display())
	}
}

#[derive(Debug)]
pub struct RunSummary {
	pub extract: ExtractSummary,
	pub process: ProcessSummary,
	pub clean: CleanSummary,
}

impl fmt::Display for RunSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "== extract ==\n{}", self.extract)?;
		writeln!(f, "\n== process ==\n{}", self.process)?;
		write!(f, "\n== clean ==\n{}", self.clean)
	}
}

/// Runs the pipeline stages against `config.data_dir`.
///
/// `extract` flattens delivered archives into raw files, `process` turns the
/// raw files into the sales history, and `clean` derives the training set
/// from it. Each stage reads what the previous one left on disk, so they can
/// be run separately.
pub struct Pipeline {
	pub config: PipelineConfig,
	store: DatasetStore,
	progress: Option<ProgressCallback>,
}

impl Pipeline {
	pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
		config.validate()?;
		Ok(Self {
			store: DatasetStore::new(&config.data_dir),
			config,
			progress: None,
		})
	}

	/// Receive ingestion progress as chunks finish
	pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
		self.progress = Some(cb);
		self
	}

	pub fn store(&self) -> &DatasetStore {
		&self.store
	}

	fn discovery(&self) -> RawFileDiscovery {
		RawFileDiscovery::new(&self.config.data_dir, &self.config.raw_extension)
	}

	/// Unpack every archive in the data directory into flat raw files
	pub fn extract(&self) -> PipelineResult<ExtractSummary> {
		info!("Pipeline: extract {}", self.config.data_dir.display());
		let unpacker = ArchiveUnpacker::new(&self.config.data_dir, &self.config.raw_extension);
		let unpack = run_stage(&unpacker, ())?;
		let raw_files = run_stage(&self.discovery(), ())?.len();
		Ok(ExtractSummary { unpack, raw_files })
	}

	/// Parse and normalize all raw files into the sales history dataset
	pub fn process(&self) -> PipelineResult<ProcessSummary> {
		info!("Pipeline: process {}", self.config.data_dir.display());
		let files = run_stage(&self.discovery(), ())?;
		if files.is_empty() {
			return Err(PipelineError::MissingInput {
				stage: "process",
				path: self
					.config
					.data_dir
					.join(format!("*.{}", self.config.raw_extension)),
			});
		}

		let mut coordinator = IngestCoordinator::new(&self.config.ingest);
		if let Some(cb) = &self.progress {
			coordinator = coordinator.with_progress_callback(cb.clone());
		}
		let mut ingest = run_stage(&coordinator, files)?;
		if !ingest.failed.is_empty() {
			warn!(
				"Pipeline: {} chunks failed, {} files missing from the sales history",
				ingest.failed.len(),
				ingest.files_lost()
			);
		}
		let records = std::mem::take(&mut ingest.records);

		let normalizer = Normalizer::new(self.config.normalize.clone());
		let (typed, normalize) = run_stage(&normalizer, records)?;
		if typed.is_empty() {
			return Err(PipelineError::EmptyDataset { stage: "process" });
		}

		let mut history = SalesHistory::from_records(&typed)?;
		drop(typed);
		check_columns(&history.data, &DASHBOARD_COLUMNS, "sales history")?;
		let rows_by_year = history.counts_by_year()?;
		let survival = normalize.survival();
		if self.store.exists(&self.config.sales_history_file) {
			info!("Pipeline: replacing {}", self.config.sales_history_path().display());
		}
		let meta = self.store.write(
			&self.config.sales_history_file,
			DatasetKind::SalesHistory,
			&mut history.data,
			Some(&survival),
		)?;

		Ok(ProcessSummary {
			ingest,
			normalize,
			survival,
			rows_written: meta.row_count,
			rows_by_year,
			output: self.config.sales_history_path(),
		})
	}

	/// Filter the sales history into the training dataset
	pub fn clean(&self) -> PipelineResult<CleanSummary> {
		info!("Pipeline: clean {}", self.config.sales_history_path().display());
		let history = SalesHistory::from_dataframe(
			self.store.read(&self.config.sales_history_file, "clean")?,
		);

		let filter = QualityFilter::new(self.config.quality.clone());
		let mut training = run_stage(&filter, history)?;
		if training.is_empty() {
			return Err(PipelineError::EmptyDataset { stage: "clean" });
		}
		check_columns(&training.data, &TRAINING_COLUMNS, "training data")?;
		if self.store.exists(&self.config.training_file) {
			info!("Pipeline: replacing {}", self.config.training_path().display());
		}
		let meta = self.store.write(
			&self.config.training_file,
			DatasetKind::Training,
			&mut training.data,
			Some(&training.survival),
		)?;

		Ok(CleanSummary {
			survival: training.survival,
			rows_written: meta.row_count,
			output: self.config.training_path(),
		})
	}

	/// `extract`, `process` and `clean` in sequence
	pub fn run_all(&self) -> PipelineResult<RunSummary> {
		let extract = self.extract()?;
		let process = self.process()?;
		let clean = self.clean()?;
		Ok(RunSummary {
			extract,
			process,
			clean,
		})
	}

	/// Summarize one raw file without touching the data directory
	pub fn inspect(&self, path: &Path) -> PipelineResult<RawFileSummary> {
		let parsed = parser::parse_file(path)?;
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| path.display().to_string());
		Ok(RawFileSummary::from_parsed(name, &parsed))
	}
}
