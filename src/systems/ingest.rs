//! Parallel ingestion: fans raw files out to parser workers and merges results

use async_channel as channel;
use futures_lite::future;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::IngestSettings;
use crate::data::SalesRecord;
use crate::error::{IngestError, IngestResult, PipelineResult};
use crate::systems::parser::{self, ParseStats, ParsedFile};
use crate::systems::{Stage, StageProgress};

pub type ProgressCallback = Arc<dyn Fn(StageProgress) + Send + Sync>;

/// A raw file that could not be read; its chunk still completes
#[derive(Debug, Clone, Serialize)]
pub struct UnreadableFile {
	pub path: PathBuf,
	pub reason: String,
}

/// A chunk that finished. `records == 0` means the chunk held no sales,
/// which is distinct from a [`ChunkFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
	pub index: usize,
	pub files: usize,
	pub records: usize,
}

/// A chunk whose worker panicked or never reported back
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
	pub index: usize,
	pub files: Vec<PathBuf>,
	pub reason: String,
}

/// Merged result of one ingestion run
#[derive(Debug, Default)]
pub struct IngestOutcome {
	/// Records of every completed chunk, in chunk completion order
	pub records: Vec<SalesRecord>,
	pub stats: ParseStats,
	pub files_total: usize,
	pub files_parsed: usize,
	pub unreadable: Vec<UnreadableFile>,
	pub completed: Vec<ChunkSummary>,
	pub failed: Vec<ChunkFailure>,
}

impl IngestOutcome {
	/// Completed chunks that produced no records
	pub fn empty_chunks(&self) -> usize {
		self.completed.iter().filter(|c| c.records == 0).count()
	}

	/// Files belonging to failed chunks
	pub fn files_lost(&self) -> usize {
		self.failed.iter().map(|f| f.files.len()).sum()
	}
}

impl std::fmt::Display for IngestOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		writeln!(
			f,
			"Files parsed: {}/{} ({} unreadable)",
			self.files_parsed,
			self.files_total,
			self.unreadable.len()
		)?;
		writeln!(
			f,
			"Chunks: {} completed ({} empty), {} failed ({} files)",
			self.completed.len(),
			self.empty_chunks(),
			self.failed.len(),
			self.files_lost()
		)?;
		writeln!(f, "Lines: {}", self.stats)?;
		write!(f, "Total raw records extracted: {}", self.stats.sale_records)
	}
}

struct ChunkResult {
	summary: ChunkSummary,
	records: Vec<SalesRecord>,
	stats: ParseStats,
	files_parsed: usize,
	unreadable: Vec<UnreadableFile>,
}

enum ChunkMessage {
	Done(ChunkResult),
	Failed(ChunkFailure),
}

enum Next {
	Message(ChunkMessage),
	Closed,
	TimedOut,
}

/// Parse every file of a chunk sequentially
fn process_chunk<F>(index: usize, files: &[PathBuf], parse: &F) -> ChunkResult
where
	F: Fn(&Path) -> IngestResult<ParsedFile>,
{
	let mut records = Vec::new();
	let mut stats = ParseStats::default();
	let mut unreadable = Vec::new();
	let mut files_parsed = 0;

	for path in files {
		match parse(path) {
			Ok(parsed) => {
				records.extend(parsed.records);
				stats.merge(&parsed.stats);
				files_parsed += 1;
			}
			Err(e) => {
				warn!("Ingest: skipping {}: {}", path.display(), e);
				unreadable.push(UnreadableFile {
					path: path.clone(),
					reason: e.to_string(),
				});
			}
		}
	}

	ChunkResult {
		summary: ChunkSummary {
			index,
			files: files.len(),
			records: records.len(),
		},
		records,
		stats,
		files_parsed,
		unreadable,
	}
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		format!("worker panicked: {s}")
	} else if let Some(s) = payload.downcast_ref::<String>() {
		format!("worker panicked: {s}")
	} else {
		"worker panicked".to_string()
	}
}

/// Fans raw files out over a bounded worker pool.
///
/// The file list is cut into contiguous chunks, about `chunks_per_worker`
/// per worker, so a few large files cannot leave most workers idle. Each
/// worker parses its chunk sequentially and sends the whole result back over
/// a channel; the coordinator merges results as they arrive. Workers share
/// no mutable state.
///
/// Every file lands in exactly one chunk. A chunk whose worker panics, or
/// that is still outstanding when the idle timeout expires, is reported as a
/// [`ChunkFailure`] rather than an empty result.
#[derive(Clone)]
pub struct IngestCoordinator {
	pub workers: usize,
	pub chunks_per_worker: usize,
	pub chunk_timeout: Option<Duration>,
	pub progress_callback: Option<ProgressCallback>,
}

impl IngestCoordinator {
	pub fn new(settings: &IngestSettings) -> Self {
		Self {
			workers: settings.workers.max(1),
			chunks_per_worker: settings.chunks_per_worker.max(1),
			chunk_timeout: settings.chunk_timeout(),
			progress_callback: None,
		}
	}

	pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
		self.progress_callback = Some(cb);
		self
	}

	/// Files per chunk for a list of `total` files
	pub fn chunk_size(&self, total: usize) -> usize {
		(total / (self.workers * self.chunks_per_worker)).max(1)
	}

	/// Split `files` into contiguous chunks covering each file exactly once
	pub fn partition(&self, files: &[PathBuf]) -> Vec<Vec<PathBuf>> {
		if files.is_empty() {
			return Vec::new();
		}
		files
			.chunks(self.chunk_size(files.len()))
			.map(<[PathBuf]>::to_vec)
			.collect()
	}

	/// Parse all files with the record parser
	pub fn ingest(&self, files: Vec<PathBuf>) -> IngestResult<IngestOutcome> {
		self.ingest_with(files, parser::parse_file)
	}

	/// Parse all files with `parse`, one chunk per pool task
	pub fn ingest_with<F>(&self, files: Vec<PathBuf>, parse: F) -> IngestResult<IngestOutcome>
	where
		F: Fn(&Path) -> IngestResult<ParsedFile> + Send + Sync + 'static,
	{
		let mut outcome = IngestOutcome {
			files_total: files.len(),
			..Default::default()
		};
		let chunks = self.partition(&files);
		if chunks.is_empty() {
			return Ok(outcome);
		}
		let total_chunks = chunks.len();
		info!(
			"Ingest: {} files in {} chunks across {} workers",
			files.len(),
			total_chunks,
			self.workers
		);

		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(self.workers)
			.thread_name(|i| format!("landsales-ingest-{}", i))
			.build()
			.map_err(|e| IngestError::WorkerPool(e.to_string()))?;

		let (tx, rx) = channel::unbounded::<ChunkMessage>();
		let parse = Arc::new(parse);
		let mut pending: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();

		for (index, chunk) in chunks.into_iter().enumerate() {
			pending.insert(index, chunk.clone());
			let tx = tx.clone();
			let parse = Arc::clone(&parse);
			pool.spawn(move || {
				let result = panic::catch_unwind(AssertUnwindSafe(|| {
					process_chunk(index, &chunk, parse.as_ref())
				}));
				let message = match result {
					Ok(done) => ChunkMessage::Done(done),
					Err(payload) => ChunkMessage::Failed(ChunkFailure {
						index,
						files: chunk,
						reason: panic_reason(payload),
					}),
				};
				// A closed channel means the coordinator stopped waiting
				let _ = tx.send_blocking(message);
			});
		}
		drop(tx);

		let mut progress = StageProgress::new("Ingest", total_chunks);
		smol::block_on(async {
			loop {
				let next = match self.chunk_timeout {
					Some(timeout) => {
						future::or(
							async { rx.recv().await.map_or(Next::Closed, Next::Message) },
							async {
								smol::Timer::after(timeout).await;
								Next::TimedOut
							},
						)
						.await
					}
					None => rx.recv().await.map_or(Next::Closed, Next::Message),
				};

				match next {
					Next::Message(ChunkMessage::Done(done)) => {
						pending.remove(&done.summary.index);
						debug!(
							"Ingest: chunk {} done ({} files, {} records)",
							done.summary.index, done.summary.files, done.summary.records
						);
						outcome.records.extend(done.records);
						outcome.stats.merge(&done.stats);
						outcome.files_parsed += done.files_parsed;
						outcome.unreadable.extend(done.unreadable);
						outcome.completed.push(done.summary);
					}
					Next::Message(ChunkMessage::Failed(failure)) => {
						pending.remove(&failure.index);
						error!(
							"Ingest: chunk {} failed ({} files): {}",
							failure.index,
							failure.files.len(),
							failure.reason
						);
						outcome.failed.push(failure);
					}
					Next::TimedOut => {
						error!(
							"Ingest: no chunk finished within {:?}; abandoning {} outstanding chunks",
							self.chunk_timeout.unwrap_or_default(),
							pending.len()
						);
						let reason = format!(
							"timed out after {:?} without a result",
							self.chunk_timeout.unwrap_or_default()
						);
						for (index, files) in std::mem::take(&mut pending) {
							outcome.failed.push(ChunkFailure {
								index,
								files,
								reason: reason.clone(),
							});
						}
						break;
					}
					Next::Closed => {
						for (index, files) in std::mem::take(&mut pending) {
							error!("Ingest: chunk {} never reported back", index);
							outcome.failed.push(ChunkFailure {
								index,
								files,
								reason: "worker exited without reporting".to_string(),
							});
						}
						break;
					}
				}

				let finished = outcome.completed.len() + outcome.failed.len();
				progress.update(finished, Some(format!("{} records", outcome.records.len())));
				if let Some(ref cb) = self.progress_callback {
					cb(progress.clone());
				}
				if progress.is_complete() {
					break;
				}
			}
		});

		info!(
			"Ingest: {} raw records from {} files ({} chunks failed)",
			outcome.records.len(),
			outcome.files_parsed,
			outcome.failed.len()
		);
		if outcome.completed.is_empty() {
			return Err(IngestError::AllChunksFailed {
				chunks: total_chunks,
			});
		}
		Ok(outcome)
	}
}

impl Stage for IngestCoordinator {
	type Input = Vec<PathBuf>;
	type Output = IngestOutcome;

	fn run(&self, files: Vec<PathBuf>) -> PipelineResult<IngestOutcome> {
		Ok(self.ingest(files)?)
	}

	fn name(&self) -> &'static str {
		"IngestCoordinator"
	}

	fn description(&self) -> &'static str {
		"Parses raw files in parallel chunks and merges the records"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::sale_line;
	use std::collections::HashSet;
	use std::fs;
	use std::sync::Mutex;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tempfile::TempDir;

	fn coordinator(workers: usize, chunks_per_worker: usize) -> IngestCoordinator {
		IngestCoordinator::new(&IngestSettings {
			workers,
			chunks_per_worker,
			chunk_timeout_secs: None,
		})
	}

	fn write_raw_files(dir: &Path, count: usize) -> Vec<PathBuf> {
		(0..count)
			.map(|i| {
				let path = dir.join(format!("{:03}_SALES_DATA.DAT", i));
				let text = format!(
					"A;RTSALEDATA;001\n{}\n{}\nZ;2\n",
					sale_line(&format!("{i}-a"), "20200115", "500000", "RESIDENCE"),
					sale_line(&format!("{i}-b"), "20200116", "650000", "STRATA UNIT"),
				);
				fs::write(&path, text).unwrap();
				path
			})
			.collect()
	}

	fn fake_file(path: &Path) -> ParsedFile {
		let name = path.file_name().unwrap().to_string_lossy().into_owned();
		let line = sale_line(&name, "20200115", "500000", "RESIDENCE");
		ParsedFile {
			records: vec![parser::parse_line(&line, &name).unwrap()],
			stats: ParseStats {
				lines: 1,
				sale_records: 1,
				..Default::default()
			},
		}
	}

	#[test]
	fn test_chunk_size() {
		let c = coordinator(4, 4);
		assert_eq!(c.chunk_size(0), 1);
		assert_eq!(c.chunk_size(10), 1);
		assert_eq!(c.chunk_size(16), 1);
		assert_eq!(c.chunk_size(100), 6);
	}

	#[test]
	fn test_partition_covers_each_file_once() {
		let files: Vec<PathBuf> = (0..103).map(|i| PathBuf::from(format!("{i}.DAT"))).collect();
		let c = coordinator(3, 4);
		let chunks = c.partition(&files);

		assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
		let flattened: Vec<PathBuf> = chunks.into_iter().flatten().collect();
		assert_eq!(flattened, files);

		assert!(c.partition(&[]).is_empty());
	}

	#[test_log::test]
	fn test_ingest_merges_all_files() {
		let temp_dir = TempDir::new().unwrap();
		let files = write_raw_files(temp_dir.path(), 9);

		let outcome = coordinator(2, 2).ingest(files.clone()).unwrap();

		assert_eq!(outcome.files_total, 9);
		assert_eq!(outcome.files_parsed, 9);
		assert!(outcome.failed.is_empty());
		assert_eq!(outcome.records.len(), 18);
		assert_eq!(outcome.stats.non_sale_lines, 18);
		assert_eq!(outcome.completed.iter().map(|c| c.files).sum::<usize>(), 9);

		let ids: HashSet<String> = outcome.records.iter().map(|r| r.property_id.clone()).collect();
		assert_eq!(ids.len(), 18);
		let sources: HashSet<&str> =
			outcome.records.iter().map(|r| r.source_file.as_str()).collect();
		assert_eq!(sources.len(), 9);
	}

	#[test_log::test]
	fn test_each_file_parsed_exactly_once() {
		let files: Vec<PathBuf> = (0..57).map(|i| PathBuf::from(format!("{i}.DAT"))).collect();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen_by_workers = Arc::clone(&seen);

		let outcome = coordinator(4, 4)
			.ingest_with(files.clone(), move |path| {
				seen_by_workers.lock().unwrap().push(path.to_path_buf());
				Ok(fake_file(path))
			})
			.unwrap();

		let mut seen = seen.lock().unwrap().clone();
		seen.sort();
		let mut expected = files;
		expected.sort();
		assert_eq!(seen, expected);
		assert_eq!(outcome.records.len(), 57);
	}

	#[test_log::test]
	fn test_unreadable_file_is_skipped_not_fatal() {
		let temp_dir = TempDir::new().unwrap();
		let mut files = write_raw_files(temp_dir.path(), 3);
		files.push(temp_dir.path().join("missing.DAT"));

		let outcome = coordinator(2, 1).ingest(files).unwrap();

		assert_eq!(outcome.files_parsed, 3);
		assert_eq!(outcome.unreadable.len(), 1);
		assert!(outcome.failed.is_empty());
		assert_eq!(outcome.records.len(), 6);
	}

	#[test_log::test]
	fn test_worker_panic_surfaces_as_failed_chunk() {
		let files: Vec<PathBuf> = ["a.DAT", "b.DAT", "poison.DAT", "d.DAT"]
			.iter()
			.map(PathBuf::from)
			.collect();

		let outcome = coordinator(2, 1)
			.ingest_with(files, |path| {
				if path.to_string_lossy().contains("poison") {
					panic!("malformed beyond repair");
				}
				Ok(fake_file(path))
			})
			.unwrap();

		assert_eq!(outcome.failed.len(), 1);
		let failure = &outcome.failed[0];
		assert!(failure.files.contains(&PathBuf::from("poison.DAT")));
		assert!(failure.reason.contains("malformed beyond repair"));
		assert_eq!(outcome.completed.len(), 1);
		assert_eq!(outcome.records.len(), 2);
	}

	#[test_log::test]
	fn test_empty_chunk_is_not_a_failure() {
		let files: Vec<PathBuf> = ["a.DAT", "b.DAT"].iter().map(PathBuf::from).collect();

		let outcome = coordinator(2, 1)
			.ingest_with(files, |_| Ok(ParsedFile::default()))
			.unwrap();

		assert!(outcome.failed.is_empty());
		assert_eq!(outcome.completed.len(), 2);
		assert_eq!(outcome.empty_chunks(), 2);
		assert!(outcome.records.is_empty());
	}

	#[test_log::test]
	fn test_all_chunks_failing_is_an_error() {
		let files: Vec<PathBuf> = ["a.DAT", "b.DAT"].iter().map(PathBuf::from).collect();

		let result = coordinator(2, 1).ingest_with(files, |_| panic!("boom"));

		assert!(matches!(result, Err(IngestError::AllChunksFailed { chunks: 2 })));
	}

	#[test_log::test]
	fn test_timeout_abandons_stuck_chunk() {
		let files: Vec<PathBuf> = ["fast.DAT", "stuck.DAT"].iter().map(PathBuf::from).collect();
		let mut c = coordinator(2, 1);
		c.chunk_timeout = Some(Duration::from_millis(300));

		let outcome = c
			.ingest_with(files, |path| {
				if path.to_string_lossy().contains("stuck") {
					std::thread::sleep(Duration::from_secs(3));
				}
				Ok(fake_file(path))
			})
			.unwrap();

		assert_eq!(outcome.completed.len(), 1);
		assert_eq!(outcome.failed.len(), 1);
		assert_eq!(outcome.failed[0].files, vec![PathBuf::from("stuck.DAT")]);
		assert!(outcome.failed[0].reason.contains("timed out"));
		assert_eq!(outcome.records.len(), 1);
	}

	#[test_log::test]
	fn test_progress_reports_every_chunk() {
		let files: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("{i}.DAT"))).collect();
		let calls = Arc::new(AtomicUsize::new(0));
		let seen = Arc::new(Mutex::new(Vec::new()));
		let (calls_cb, seen_cb) = (Arc::clone(&calls), Arc::clone(&seen));

		let c = coordinator(2, 2).with_progress_callback(Arc::new(move |p: StageProgress| {
			calls_cb.fetch_add(1, Ordering::Relaxed);
			seen_cb.lock().unwrap().push((p.progress_ratio(), p.is_complete()));
		}));
		let outcome = c.ingest_with(files, |path| Ok(fake_file(path))).unwrap();

		assert_eq!(calls.load(Ordering::Relaxed), 4);
		assert_eq!(outcome.completed.len(), 4);
		let seen = seen.lock().unwrap();
		// only the last report marks the stage complete
		assert_eq!(seen.last(), Some(&(1.0, true)));
		assert!(seen[..3].iter().all(|(_, complete)| !complete));
	}

	#[test]
	fn test_no_files() {
		let outcome = coordinator(2, 4).ingest(Vec::new()).unwrap();
		assert_eq!(outcome.files_total, 0);
		assert!(outcome.records.is_empty());
	}
}
