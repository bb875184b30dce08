//! Checkpoint store
//!
//! A checkpoint is written only after an account's ingestion transaction has
//! committed. It carries the last completed account, the run counters and the
//! pending frontier, all in one SQLite transaction. The account is then
//! appended to the visited log, which later runs use to skip accounts that
//! are already done.

mod visited;

pub use visited::{FileVisitedLog, MemoryVisitedLog, VisitedLog};

use crate::frontier::FrontierEntry;
use crate::model::AccountId;
use crate::storage::{Storage, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use tracing::{debug, warn};

/// Run counters persisted with every checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    /// Accounts attempted to completion; this is what the budget counts
    pub accounts_processed: u64,
    pub accounts_skipped: u64,
    pub accounts_filtered: u64,
    pub accounts_deferred: u64,
    /// Listings cut short by the page limit
    pub listings_truncated: u64,
    pub entries_written: u64,
    pub edges_inserted: u64,
    pub edges_updated: u64,
    pub items_skipped: u64,
}

/// Durable marker of the last committed account
#[derive(Debug, Clone, PartialEq)]
pub struct RunCheckpoint {
    pub run_id: i64,
    /// None until the run commits its first account
    pub last_processed_account: Option<String>,
    pub counters: Counters,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new(run_id: i64, last_committed: Option<&AccountId>, counters: Counters) -> Self {
        Self {
            run_id,
            last_processed_account: last_committed.map(|a| a.as_str().to_string()),
            counters,
            updated_at: Utc::now(),
        }
    }

    pub fn account(&self) -> Option<AccountId> {
        self.last_processed_account.as_deref().map(AccountId::new)
    }
}

/// Writes checkpoints and keeps the visited log in step with them
pub struct CheckpointStore {
    log: Box<dyn VisitedLog>,
}

impl CheckpointStore {
    pub fn new(log: Box<dyn VisitedLog>) -> Self {
        Self { log }
    }

    /// Records a committed account
    ///
    /// The storage transaction comes first. A failed log append is only
    /// logged: restore treats the checkpointed account as visited anyway.
    ///
    /// # Arguments
    ///
    /// * `storage` - Store holding the checkpoint keys
    /// * `checkpoint` - Account and counters to record
    /// * `frontier` - Pending queue snapshot to mirror
    pub fn record_progress(
        &mut self,
        storage: &mut dyn Storage,
        checkpoint: &RunCheckpoint,
        frontier: &[FrontierEntry],
    ) -> StorageResult<()> {
        storage.save_checkpoint(checkpoint, frontier)?;

        if let Some(account) = checkpoint.account() {
            if let Err(e) = self.log.append(&account) {
                warn!(account = %account, error = %e, "Failed to append to visited log");
            }
        }

        debug!(
            account = ?checkpoint.last_processed_account,
            processed = checkpoint.counters.accounts_processed,
            pending = frontier.len(),
            "Checkpoint recorded"
        );
        Ok(())
    }

    /// Records an account that was attempted but skipped
    ///
    /// Counters and the frontier are saved. `checkpoint` carries the last
    /// committed account, not the skipped one, and nothing is appended to the
    /// visited log so a later run retries the skipped account.
    pub fn record_attempt(
        &mut self,
        storage: &mut dyn Storage,
        checkpoint: &RunCheckpoint,
        frontier: &[FrontierEntry],
    ) -> StorageResult<()> {
        storage.save_checkpoint(checkpoint, frontier)
    }

    /// Loads the last checkpoint, if any
    pub fn load_last_checkpoint(
        &self,
        storage: &dyn Storage,
    ) -> StorageResult<Option<RunCheckpoint>> {
        storage.load_checkpoint()
    }

    /// Loads the lowercased keys of every account already visited
    pub fn load_visited(&self) -> io::Result<HashSet<String>> {
        self.log.load()
    }

    /// Marks an account visited without a checkpoint (filtered accounts)
    pub fn mark_visited(&mut self, account: &AccountId) -> io::Result<()> {
        self.log.append(account)
    }

    /// Forgets every visited account
    pub fn clear_visited(&mut self) -> io::Result<()> {
        self.log.clear()
    }
}
