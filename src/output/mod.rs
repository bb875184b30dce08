//! Output module for crawl statistics and run summaries
//!
//! This module handles:
//! - Reading aggregate statistics back from the database
//! - The JSON summary printed when a run halts on a fatal condition

pub mod stats;
mod summary;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use summary::RunSummary;
