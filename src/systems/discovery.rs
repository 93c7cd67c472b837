//! Raw file discovery in the flattened data directory

use std::path::PathBuf;
use tracing::{info, trace, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::systems::{Stage, has_extension};

/// Finds the raw extract files sitting directly in the data directory.
///
/// Only the top level is scanned: the unpacker leaves every raw file there,
/// and anything still nested belongs to a directory it could not flatten.
#[derive(Debug, Clone)]
pub struct RawFileDiscovery {
	pub root: PathBuf,
	pub extension: String,
}

impl RawFileDiscovery {
	pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
		Self {
			root: root.into(),
			extension: extension.into(),
		}
	}

	/// Raw files in the root, sorted by path
	pub fn discover(&self) -> PipelineResult<Vec<PathBuf>> {
		if !self.root.is_dir() {
			return Err(PipelineError::MissingInput {
				stage: "process",
				path: self.root.clone(),
			});
		}
		info!("Discovery: scanning {} for .{} files", self.root.display(), self.extension);

		let mut files = Vec::new();
		for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("Discovery walk error: {}", e);
					continue;
				}
			};
			if entry.file_type().is_file() && has_extension(entry.path(), &self.extension) {
				trace!("Discovery: found {}", entry.path().display());
				files.push(entry.into_path());
			}
		}
		files.sort();

		info!("Discovery: found {} raw files", files.len());
		Ok(files)
	}
}

impl Stage for RawFileDiscovery {
	type Input = ();
	type Output = Vec<PathBuf>;

	fn run(&self, _input: ()) -> PipelineResult<Vec<PathBuf>> {
		self.discover()
	}

	fn name(&self) -> &'static str {
		"RawFileDiscovery"
	}

	fn description(&self) -> &'static str {
		"Lists the raw extract files in the data directory"
	}
}
