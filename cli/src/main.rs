use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, subscriber::set_global_default};
use tracing_subscriber::EnvFilter;

use landsales::{Pipeline, PipelineConfig};

fn init_tracing(verbosity: i8) {
	// Map -q/-v to tracing levels; default WARN
	let level = match verbosity {
		i8::MIN..=-1 => Level::ERROR,
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};

	let env_filter = EnvFilter::builder()
		.with_default_directive(level.into())
		.from_env_lossy();

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_level(true)
		.compact()
		.finish();

	let _ = set_global_default(subscriber);
}

fn main() {
	let opts = Opts::parse();
	init_tracing((opts.verbose as i8).saturating_sub(opts.quiet as i8));
	if let Err(e) = run(opts) {
		eprintln!("error: {e:#}");
		std::process::exit(1);
	}
}

fn load_config(opts: &Opts) -> anyhow::Result<PipelineConfig> {
	let mut config = match &opts.config {
		Some(path) => PipelineConfig::load(path)
			.with_context(|| format!("loading config {}", path.display()))?,
		None => PipelineConfig::default(),
	};
	if let Some(dir) = &opts.data_dir {
		config = config.with_data_dir(dir);
	}
	if let Some(workers) = opts.workers {
		config = config.with_workers(workers);
	}
	if let Some(secs) = opts.chunk_timeout_secs {
		config = config.with_chunk_timeout_secs(secs);
	}
	Ok(config)
}

fn run(opts: Opts) -> anyhow::Result<()> {
	let pipeline = Pipeline::new(load_config(&opts)?)?;
	match opts.command {
		Command::Extract => println!("{}", pipeline.extract()?),
		Command::Process => println!("{}", pipeline.process()?),
		Command::Clean => println!("{}", pipeline.clean()?),
		Command::Run => println!("{}", pipeline.run_all()?),
		Command::Inspect { file } => println!("{}", pipeline.inspect(&file)?),
	}
	Ok(())
}

#[derive(Parser)]
#[command(version, about = "Land-sale extract pipeline: unpack, process and clean bulk sales data")]
pub struct Opts {
	/// Increase verbosity (-v, -vv, -vvv). Default WARN.
	#[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
	/// Decrease verbosity (-q).
	#[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
	pub quiet: u8,

	/// Directory holding the archives, raw files and output datasets
	#[arg(long, global = true)]
	pub data_dir: Option<PathBuf>,
	/// JSON config file; flags override its values
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,
	/// Number of parsing workers
	#[arg(long, global = true)]
	pub workers: Option<usize>,
	/// Give up on ingestion chunks after this many idle seconds
	#[arg(long, global = true)]
	pub chunk_timeout_secs: Option<u64>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Unpack yearly and weekly archives into flat raw files
	Extract,
	/// Parse raw files into the sales history dataset
	Process,
	/// Filter the sales history into the training dataset
	Clean,
	/// Extract, process and clean in sequence
	Run,
	/// Summarize one raw extract file
	Inspect {
		/// Raw file to inspect
		file: PathBuf,
	},
}
