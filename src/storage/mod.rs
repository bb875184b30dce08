//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Transactional per-account upserts of accounts, catalog entries and edges
//! - The first-resolution-wins edition → canonical mapping table
//! - Checkpoint keys and the durable frontier queue
//! - Run tracking and resumption support

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::model::{AccountId, CanonicalId, EditionId, InteractionKind, SourceKind};
use crate::GrooveError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(GrooveError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, GrooveError> {
    SqliteStorage::new(path)
}

/// Represents an account row
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub location: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// Represents a consolidated catalog entry, keyed by canonical id
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub canonical_id: CanonicalId,
    /// Representative edition used for descriptive fields
    pub source_edition_id: Option<EditionId>,
    pub title: String,
    pub artist: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub country: Option<String>,
    pub released: Option<String>,
    pub year: Option<i32>,
    pub image: Option<String>,
    pub format_summary: Option<String>,
    pub label_summary: Option<String>,
    pub have_count: Option<i64>,
    pub want_count: Option<i64>,
    pub rating_avg: Option<f64>,
    pub rating_count: Option<i64>,
    /// Source of the most recent authoritative metadata write
    pub metadata_source: SourceKind,
}

/// Represents an interaction edge between an account and a catalog entry
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub account: AccountId,
    pub canonical_id: CanonicalId,
    pub kind: InteractionKind,
    /// None = unobserved, 0 = observed without rating, 1-5 = explicit
    pub rating: Option<u8>,
    pub weight: f64,
    pub source: SourceKind,
    pub added_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
    pub review: Option<String>,
}

/// Catalog entries failing each data-quality check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogQuality {
    /// Placeholder or blank titles, the backlog of `--repair-titles`
    pub unknown_titles: u64,
    pub missing_artist: u64,
    pub missing_year: u64,
    /// Years before 1900 or after the current year
    pub implausible_year: u64,
    /// Title or artist holding U+FFFD
    pub garbled_text: u64,
    pub missing_source_edition: u64,
    /// Entries whose representative edition is their own canonical id
    pub direct_editions: u64,
    /// Representative editions claimed by more than one entry
    pub shared_source_edition: u64,
    /// Groups of entries with the same title and artist
    pub duplicate_content: u64,
}

impl CatalogQuality {
    /// Number of failing checks, informational counts excluded
    pub fn issues(&self) -> usize {
        [
            self.unknown_titles,
            self.missing_artist,
            self.implausible_year,
            self.garbled_text,
            self.missing_source_edition,
            self.shared_source_edition,
            self.duplicate_content,
        ]
        .iter()
        .filter(|n| **n > 0)
        .count()
    }
}

/// Represents a skipped account or item kept for later recovery
#[derive(Debug, Clone)]
pub struct SkipRecord {
    pub run_id: i64,
    pub account_id: String,
    pub item_ref: Option<String>,
    pub reason: String,
    pub recorded_at: String,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

impl RunRecord {
    /// Parsed start timestamp
    pub fn started(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.started_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    /// Stopped on expired credentials
    Halted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Halted => "halted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "halted" => Some(Self::Halted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A run that did not finish on its own is picked up again
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Halted,
            RunStatus::Failed,
        ] {
            let parsed = RunStatus::from_db_string(status.to_db_string());
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_only_completed_runs_are_final() {
        assert!(RunStatus::Running.is_resumable());
        assert!(RunStatus::Interrupted.is_resumable());
        assert!(RunStatus::Halted.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
    }
}
