//! Archive unpacker: flattens yearly/weekly zip archives into raw files

use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{ArchiveError, ArchiveResult, PipelineError, PipelineResult};
use crate::systems::{Stage, has_extension};

/// An archive that was reported and left untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedArchive {
	pub path: PathBuf,
	pub reason: String,
}

/// What one unpacking pass did to the data directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnpackReport {
	/// Top-level archives fully processed and removed
	pub outer_archives: usize,
	/// Nested archives extracted into the root
	pub inner_archives: usize,
	pub raw_files_moved: usize,
	pub directories_removed: usize,
	/// Raw files not moved because the root already holds a file of that name
	pub name_collisions: Vec<PathBuf>,
	pub skipped: Vec<SkippedArchive>,
}

impl UnpackReport {
	/// True when the pass changed nothing on disk
	pub fn is_noop(&self) -> bool {
		self.outer_archives == 0
			&& self.inner_archives == 0
			&& self.raw_files_moved == 0
			&& self.directories_removed == 0
	}

	fn skip(&mut self, path: &Path, err: &ArchiveError) {
		self.skipped.push(SkippedArchive {
			path: path.to_path_buf(),
			reason: err.to_string(),
		});
	}
}

impl std::fmt::Display for UnpackReport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "Outer archives extracted: {}", self.outer_archives)?;
		writeln!(f, "Inner archives extracted: {}", self.inner_archives)?;
		writeln!(f, "Raw files moved:          {}", self.raw_files_moved)?;
		writeln!(f, "Directories removed:      {}", self.directories_removed)?;
		write!(f, "Archives skipped:         {}", self.skipped.len())?;
		for skipped in &self.skipped {
			write!(f, "\n  {} ({})", skipped.path.display(), skipped.reason)?;
		}
		if !self.name_collisions.is_empty() {
			write!(f, "\nRaw files left in place (name taken in root): {}", self.name_collisions.len())?;
		}
		Ok(())
	}
}

/// Extract every entry of `archive` under `into`, returning the entry count
pub fn extract_zip(archive: &Path, into: &Path) -> ArchiveResult<usize> {
	let file = File::open(archive).map_err(|source| ArchiveError::Open {
		path: archive.to_path_buf(),
		source,
	})?;
	let mut zip = ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
		path: archive.to_path_buf(),
		source,
	})?;
	let entries = zip.len();
	zip.extract(into).map_err(|source| ArchiveError::Zip {
		path: archive.to_path_buf(),
		source,
	})?;
	Ok(entries)
}

/// Flattens a data directory in place.
///
/// Top-level archives are expanded through a private temporary directory:
/// nested archives inside them are extracted straight into the root and raw
/// files are moved up. Remaining subdirectories (pre-extracted year folders)
/// are then walked bottom-up, extracting archives and moving raw files into
/// the root, and pruned once empty.
///
/// The pass is destructive and must not run concurrently against the same
/// root. Re-running it on an already flat root changes nothing.
#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
	pub root: PathBuf,
	/// Raw file extension, matched case-insensitively
	pub raw_extension: String,
}

impl ArchiveUnpacker {
	pub fn new(root: impl Into<PathBuf>, raw_extension: impl Into<String>) -> Self {
		Self {
			root: root.into(),
			raw_extension: raw_extension.into(),
		}
	}

	/// Run both passes. Only a missing or unreadable root is an error;
	/// bad archives are recorded in the report and skipped.
	pub fn unpack(&self) -> PipelineResult<UnpackReport> {
		if !self.root.is_dir() {
			return Err(PipelineError::MissingInput {
				stage: "extract",
				path: self.root.clone(),
			});
		}
		info!("Unpack: starting in {}", self.root.display());
		let mut report = UnpackReport::default();

		for archive in self.top_level(|p| p.is_file() && is_zip(p))? {
			debug!("Unpack: outer archive {}", archive.display());
			match self.unpack_outer(&archive, &mut report) {
				Ok(()) => {
					report.outer_archives += 1;
					info!("Unpack: removed processed archive {}", archive.display());
				}
				Err(e) => {
					error!("Unpack: failed to process {}: {}", archive.display(), e);
					report.skip(&archive, &e);
				}
			}
		}

		for dir in self.top_level(|p| p.is_dir())? {
			debug!("Unpack: flattening directory {}", dir.display());
			self.flatten_directory(&dir, &mut report);
			match fs::remove_dir(&dir) {
				Ok(()) => {
					report.directories_removed += 1;
					info!("Unpack: removed processed directory {}", dir.display());
				}
				Err(_) => warn!(
					"Unpack: directory not empty, skipping removal: {}",
					dir.display()
				),
			}
		}

		info!(
			"Unpack: complete ({} outer, {} inner archives, {} raw files moved, {} skipped)",
			report.outer_archives,
			report.inner_archives,
			report.raw_files_moved,
			report.skipped.len()
		);
		Ok(report)
	}

	fn top_level(&self, keep: impl Fn(&Path) -> bool) -> PipelineResult<Vec<PathBuf>> {
		let mut paths = Vec::new();
		for entry in fs::read_dir(&self.root)? {
			let path = entry?.path();
			if keep(&path) {
				paths.push(path);
			}
		}
		paths.sort();
		Ok(paths)
	}

	fn is_raw(&self, path: &Path) -> bool {
		has_extension(path, &self.raw_extension)
	}

	/// Expand one top-level archive; the archive is removed only on success
	fn unpack_outer(&self, archive: &Path, report: &mut UnpackReport) -> ArchiveResult<()> {
		let temp = tempfile::Builder::new()
			.prefix("_temp_")
			.tempdir_in(&self.root)?;
		extract_zip(archive, temp.path())?;

		for entry in WalkDir::new(temp.path()) {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("Unpack: walk error in {}: {}", temp.path().display(), e);
					continue;
				}
			};
			if !entry.file_type().is_file() {
				continue;
			}
			let path = entry.path();
			if is_zip(path) {
				match extract_zip(path, &self.root) {
					Ok(n) => {
						report.inner_archives += 1;
						debug!("Unpack: extracted inner archive {} ({} entries)", entry.file_name().to_string_lossy(), n);
					}
					Err(e) => {
						error!("Unpack: bad inner archive {}: {}", entry.file_name().to_string_lossy(), e);
						report.skip(path, &e);
					}
				}
			} else if self.is_raw(path) {
				fs::rename(path, self.root.join(entry.file_name()))?;
				report.raw_files_moved += 1;
				trace!("Unpack: moved {}", entry.file_name().to_string_lossy());
			}
		}

		temp.close()?;
		fs::remove_file(archive)?;
		Ok(())
	}

	/// Walk `dir` bottom-up, pulling archives and raw files into the root
	fn flatten_directory(&self, dir: &Path, report: &mut UnpackReport) {
		for entry in WalkDir::new(dir).contents_first(true) {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("Unpack: walk error in {}: {}", dir.display(), e);
					continue;
				}
			};
			let path = entry.path();

			if entry.file_type().is_dir() {
				// `dir` itself is removed by the caller
				if entry.depth() > 0 && fs::remove_dir(path).is_ok() {
					report.directories_removed += 1;
					debug!("Unpack: removed empty dir {}", path.display());
				}
				continue;
			}

			if is_zip(path) {
				let extracted = extract_zip(path, &self.root).and_then(|_| {
					fs::remove_file(path)?;
					Ok(())
				});
				match extracted {
					Ok(()) => {
						report.inner_archives += 1;
						debug!("Unpack: extracted archive in dir {}", path.display());
					}
					Err(e) => {
						error!("Unpack: bad archive {}: {}", path.display(), e);
						report.skip(path, &e);
					}
				}
			} else if self.is_raw(path) {
				let target = self.root.join(entry.file_name());
				if target == path {
					continue;
				}
				if target.exists() {
					warn!(
						"Unpack: {} already present in root, leaving {}",
						entry.file_name().to_string_lossy(),
						path.display()
					);
					report.name_collisions.push(path.to_path_buf());
					continue;
				}
				match fs::rename(path, &target) {
					Ok(()) => {
						report.raw_files_moved += 1;
						trace!("Unpack: moved {}", path.display());
					}
					Err(e) => warn!("Unpack: cannot move {}: {}", path.display(), e),
				}
			}
		}
	}
}

fn is_zip(path: &Path) -> bool {
	has_extension(path, "zip")
}

impl Stage for ArchiveUnpacker {
	type Input = ();
	type Output = UnpackReport;

	fn run(&self, _input: ()) -> PipelineResult<UnpackReport> {
		self.unpack()
	}

	fn name(&self) -> &'static str {
		"ArchiveUnpacker"
	}

	fn description(&self) -> &'static str {
		"Flattens nested zip archives and year folders into raw files"
	}
}
