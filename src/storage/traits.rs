//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::checkpoint::RunCheckpoint;
use crate::frontier::FrontierEntry;
use crate::ingest::{IngestionBatch, MergePolicy, UpsertKind, WriteOutcome};
use crate::model::{AccountId, CanonicalId, EditionId, InteractionKind};
use crate::storage::{
    AccountRecord, CatalogQuality, CatalogRecord, EdgeRecord, RunRecord, RunStatus, SkipRecord,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt value in column {column}: {value}")]
    Corrupt { column: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// `write_interactions` is the only way account and edge rows are created
/// or changed. Catalog rows are also refreshed by `merge_catalog_record`,
/// under the same merge policy.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Sets a final status and the finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Ingestion =====

    /// Applies one account's batch in a single transaction
    ///
    /// Either every account, catalog and edge upsert in the batch commits or
    /// none does. Rows are merged with the pure policy in `ingest::merge`, so
    /// writing the same batch twice leaves the store unchanged.
    fn write_interactions(
        &mut self,
        batch: &IngestionBatch,
        policy: MergePolicy,
    ) -> StorageResult<WriteOutcome>;

    /// Gets an account by its case-insensitive id
    fn get_account(&self, account: &AccountId) -> StorageResult<Option<AccountRecord>>;

    /// Gets a catalog entry by canonical id
    fn get_catalog_entry(&self, canonical: CanonicalId) -> StorageResult<Option<CatalogRecord>>;

    /// Gets up to `limit` catalog entries that still carry no real title
    fn find_untitled_entries(&self, limit: usize) -> StorageResult<Vec<CatalogRecord>>;

    /// Merges refreshed metadata into one catalog entry in its own transaction
    fn merge_catalog_record(
        &mut self,
        record: &CatalogRecord,
        policy: MergePolicy,
    ) -> StorageResult<UpsertKind>;

    /// Gets every edge of an account, ordered by canonical id and kind
    fn get_edges_for_account(&self, account: &AccountId) -> StorageResult<Vec<EdgeRecord>>;

    /// Counts an account's edges last observed before `cutoff`
    ///
    /// The crawler passes the start of the current run, so edges committed
    /// earlier in the same run are not counted.
    fn count_edges_observed_before(
        &self,
        account: &AccountId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64>;

    // ===== Identity Mappings =====

    /// Gets the stored canonical id of an edition
    fn get_mapping(&self, edition: EditionId) -> StorageResult<Option<CanonicalId>>;

    /// Stores a mapping unless one exists, and returns the stored value
    ///
    /// The returned id is the first mapping ever recorded for the edition,
    /// which may differ from `canonical`.
    fn insert_mapping_if_absent(
        &mut self,
        edition: EditionId,
        canonical: CanonicalId,
    ) -> StorageResult<CanonicalId>;

    // ===== Checkpoint & Frontier =====

    /// Writes the checkpoint keys and the frontier queue in one transaction
    fn save_checkpoint(
        &mut self,
        checkpoint: &RunCheckpoint,
        frontier: &[FrontierEntry],
    ) -> StorageResult<()>;

    /// Loads the last checkpoint, if any
    fn load_checkpoint(&self) -> StorageResult<Option<RunCheckpoint>>;

    /// Replaces the persisted frontier queue
    fn save_frontier(&mut self, frontier: &[FrontierEntry]) -> StorageResult<()>;

    /// Loads the persisted frontier queue in order
    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>>;

    /// Clears checkpoint keys and the frontier queue
    fn clear_progress(&mut self) -> StorageResult<()>;

    // ===== Skipped Records =====

    /// Records the raw identifier of a skipped account or item
    fn record_skip(
        &mut self,
        run_id: i64,
        account: &AccountId,
        item_ref: Option<&str>,
        reason: &str,
    ) -> StorageResult<()>;

    /// Gets the skip records of a run
    fn get_skipped(&self, run_id: i64) -> StorageResult<Vec<SkipRecord>>;

    // ===== Statistics =====

    fn count_accounts(&self) -> StorageResult<u64>;

    fn count_catalog_entries(&self) -> StorageResult<u64>;

    fn count_edges(&self) -> StorageResult<u64>;

    /// Gets edge counts per interaction kind
    fn count_edges_by_kind(&self) -> StorageResult<HashMap<InteractionKind, u64>>;

    fn count_mappings(&self) -> StorageResult<u64>;

    /// Counts editions that map to themselves
    fn count_self_mapped(&self) -> StorageResult<u64>;

    fn count_skipped(&self) -> StorageResult<u64>;

    /// Counts catalog entries failing each data-quality check
    fn catalog_quality(&self) -> StorageResult<CatalogQuality>;
}
