//! Processing stages of the land-sale pipeline

use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::PipelineResult;

pub mod discovery;
pub mod filter;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod unpack;

pub use discovery::RawFileDiscovery;
pub use filter::QualityFilter;
pub use ingest::IngestCoordinator;
pub use normalize::Normalizer;
pub use unpack::ArchiveUnpacker;

/// Common interface for pipeline stages
pub trait Stage {
	type Input;
	type Output;

	/// Run the stage over its input
	fn run(&self, input: Self::Input) -> PipelineResult<Self::Output>;

	/// Stage name for logging and identification
	fn name(&self) -> &'static str;

	/// One-line description of what the stage does
	fn description(&self) -> &'static str;
}

/// Run a stage with start/finish logging and timing
pub fn run_stage<S: Stage>(stage: &S, input: S::Input) -> PipelineResult<S::Output> {
	info!("Stage {}: {}", stage.name(), stage.description());
	let started = Instant::now();
	let output = stage.run(input)?;
	debug!("Stage {}: completed in {:?}", stage.name(), started.elapsed());
	Ok(output)
}

/// Progress information for a running stage
#[derive(Debug, Clone)]
pub struct StageProgress {
	pub stage_name: String,
	pub total_items: usize,
	pub processed_items: usize,
	pub current_item: Option<String>,
}

impl StageProgress {
	pub fn new(stage_name: impl Into<String>, total_items: usize) -> Self {
		Self {
			stage_name: stage_name.into(),
			total_items,
			processed_items: 0,
			current_item: None,
		}
	}

	pub fn update(&mut self, processed: usize, current_item: Option<String>) {
		self.processed_items = processed;
		self.current_item = current_item;
	}

	pub fn progress_ratio(&self) -> f64 {
		if self.total_items == 0 {
			1.0
		} else {
			self.processed_items as f64 / self.total_items as f64
		}
	}

	pub fn is_complete(&self) -> bool {
		self.processed_items >= self.total_items
	}
}

/// Case-insensitive extension match
pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
