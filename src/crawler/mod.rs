//! Crawler module - the pipeline orchestrator
//!
//! This module drives the crawl, including:
//! - Run creation and resumption
//! - The sequential per-account fetch → resolve → write → checkpoint loop
//! - Budget and prior-data filters
//! - Graceful shutdown between accounts

mod coordinator;
mod shutdown;

pub use coordinator::{run_crawl, Coordinator, HaltReason, RunReport};
pub use shutdown::{listen_for_ctrl_c, shutdown_channel, ShutdownSignal, ShutdownTrigger};
