//! Dataset persistence (Parquet + JSON metadata sidecars)

use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::report::{SurvivalLog, SurvivalStep};

pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
	SalesHistory,
	Training,
}

/// Sidecar describing how a dataset file was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
	pub version: u32,
	pub kind: DatasetKind,
	pub row_count: usize,
	/// UTC milliseconds
	pub written_at: i64,
	#[serde(default)]
	pub steps: Vec<SurvivalStep>,
}

/// Reads and writes the pipeline's output datasets under one directory.
///
/// Writes are whole-file replacements: the table goes to `<file>.tmp`, is
/// synced, then renamed over the target, so readers never see a partial
/// file. The `<file>.meta.json` sidecar is written the same way, after the
/// table.
#[derive(Debug, Clone)]
pub struct DatasetStore {
	pub dir: PathBuf,
}

/// Write through `<path>.tmp` and rename into place; the temp file is
/// removed if any step fails
fn write_atomically<F>(path: &Path, write: F) -> PipelineResult<()>
where
	F: FnOnce(&mut File) -> PipelineResult<()>,
{
	let tmp = tmp_path(path);
	let result = File::create(&tmp)
		.map_err(PipelineError::from)
		.and_then(|mut f| {
			write(&mut f)?;
			f.flush()?;
			f.sync_all()?;
			drop(f);
			atomic_rename(&tmp, path)
		});
	if result.is_err() && tmp.exists() {
		if let Err(e) = fs::remove_file(&tmp) {
			warn!("Cannot remove partial write {}: {}", tmp.display(), e);
		}
	}
	result
}

fn atomic_write_parquet(path: &Path, df: &mut DataFrame) -> PipelineResult<()> {
	write_atomically(path, |f| {
		ParquetWriter::new(f)
			.with_compression(ParquetCompression::Zstd(None))
			.finish(df)?;
		Ok(())
	})
}

fn atomic_write_json(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
	write_atomically(path, |f| {
		f.write_all(bytes)?;
		Ok(())
	})
}

fn tmp_path(path: &Path) -> PathBuf {
	let mut name = path.as_os_str().to_os_string();
	name.push(".tmp");
	PathBuf::from(name)
}

fn atomic_rename(from: &Path, to: &Path) -> PipelineResult<()> {
	// Windows refuses to rename over an existing file
	#[cfg(windows)]
	{
		if to.exists() {
			fs::remove_file(to)?;
		}
	}
	fs::rename(from, to)?;
	Ok(())
}

impl DatasetStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn path(&self, file: &str) -> PathBuf {
		self.dir.join(file)
	}

	pub fn meta_path(&self, file: &str) -> PathBuf {
		self.dir.join(format!("{}.meta.json", file))
	}

	pub fn exists(&self, file: &str) -> bool {
		self.path(file).is_file()
	}

	/// Replace `file` with `df` and refresh its metadata sidecar
	pub fn write(
		&self,
		file: &str,
		kind: DatasetKind,
		df: &mut DataFrame,
		survival: Option<&SurvivalLog>,
	) -> PipelineResult<DatasetMetadata> {
		fs::create_dir_all(&self.dir)?;
		let path = self.path(file);
		atomic_write_parquet(&path, df)?;

		let meta = DatasetMetadata {
			version: METADATA_VERSION,
			kind,
			row_count: df.height(),
			written_at: Utc::now().timestamp_millis(),
			steps: survival.map(|s| s.steps.clone()).unwrap_or_default(),
		};
		atomic_write_json(&self.meta_path(file), &serde_json::to_vec_pretty(&meta)?)?;

		info!("Saved {} rows to {}", meta.row_count, path.display());
		Ok(meta)
	}

	/// Load `file`; `stage` names the caller when the file is absent
	pub fn read(&self, file: &str, stage: &'static str) -> PipelineResult<DataFrame> {
		let path = self.path(file);
		if !path.is_file() {
			return Err(PipelineError::MissingInput { stage, path });
		}
		let df = ParquetReader::new(File::open(&path)?).finish()?;
		debug!("Loaded {} rows from {}", df.height(), path.display());
		Ok(df)
	}

	/// The sidecar for `file`, if one was written
	pub fn read_metadata(&self, file: &str) -> PipelineResult<Option<DatasetMetadata>> {
		let path = self.meta_path(file);
		if !path.is_file() {
			return Ok(None);
		}
		let bytes = fs::read(&path)?;
		Ok(Some(serde_json::from_slice(&bytes)?))
	}
}
