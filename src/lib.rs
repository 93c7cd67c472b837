//! # Land-Sale Extract Pipeline
//!
//! Turns bulk government land-sale deliveries (semicolon-delimited extract
//! files nested inside yearly and weekly zip archives) into two Parquet
//! datasets: the full typed sales history, and a filtered, deduplicated
//! training set.
//!
//! Tabular data lives in Polars DataFrames; raw files are parsed in parallel
//! on a rayon pool with results collected over a channel.

pub mod config;
pub mod data;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod report;
pub mod schema;

pub mod systems;

#[cfg(test)]
mod testing;

// Re-export main API types
pub use config::PipelineConfig;
pub use data::{SalesHistory, SalesRecord, TypedSalesRecord};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{CleanSummary, ExtractSummary, Pipeline, ProcessSummary, RunSummary};
pub use report::{RawFileSummary, SurvivalLog};
