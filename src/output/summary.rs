//! Machine-readable run summary
//!
//! Printed to stdout as JSON when a run halts on a fatal condition.

use crate::crawler::{HaltReason, RunReport};
use serde::Serialize;

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub halt_reason: HaltReason,
    pub accounts_processed: u64,
    pub accounts_skipped: u64,
    pub accounts_deferred: u64,
    pub edges_written: u64,
    pub items_skipped: u64,
    pub pending_accounts: usize,
    pub requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&RunReport> for RunSummary {
    fn from(report: &RunReport) -> Self {
        let counters = &report.counters;
        Self {
            run_id: report.run_id,
            halt_reason: report.halt_reason,
            accounts_processed: counters.accounts_processed,
            accounts_skipped: counters.accounts_skipped,
            accounts_deferred: counters.accounts_deferred,
            edges_written: counters.edges_inserted + counters.edges_updated,
            items_skipped: counters.items_skipped,
            pending_accounts: report.pending,
            requests: report.requests.requests,
            message: report
                .halt_reason
                .is_fatal()
                .then(|| "credentials must be refreshed".to_string()),
        }
    }
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
