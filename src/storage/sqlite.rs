//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::checkpoint::{Counters, RunCheckpoint};
use crate::frontier::FrontierEntry;
use crate::ingest::{merge, IngestionBatch, MergePolicy, UpsertKind, WriteOutcome};
use crate::model::{AccountId, CanonicalId, EditionId, InteractionKind, SourceKind};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    AccountRecord, CatalogQuality, CatalogRecord, EdgeRecord, RunRecord, RunStatus, SkipRecord,
};
use crate::GrooveError;
use chrono::{DateTime, Datelike, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const KEY_LAST_ACCOUNT: &str = "last_processed_account";
const KEY_COUNTERS: &str = "counters";
const KEY_UPDATED_AT: &str = "updated_at";
const KEY_RUN_ID: &str = "run_id";

const CATALOG_COLUMNS: &str = "canonical_id, source_edition_id, title, artist, genre, style,
     country, released, year, image, format_summary, label_summary, have_count, want_count,
     rating_avg, rating_count, metadata_source";

/// Release years below this are treated as data errors
const EARLIEST_RELEASE_YEAR: i32 = 1900;

const EDGE_COLUMNS: &str = "a.display_name, e.canonical_id, e.kind, e.rating, e.weight, e.source,
     e.added_at, e.observed_at, e.review_text";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(GrooveError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, GrooveError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, GrooveError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Ingestion =====

    fn write_interactions(
        &mut self,
        batch: &IngestionBatch,
        policy: MergePolicy,
    ) -> StorageResult<WriteOutcome> {
        let tx = self.conn.transaction()?;
        let mut outcome = WriteOutcome::default();

        outcome.record_account(upsert_account(&tx, &batch.account)?);
        for entry in &batch.entries {
            outcome.record_entry(upsert_catalog_entry(&tx, entry, policy)?);
        }
        for edge in &batch.edges {
            outcome.record_edge(upsert_edge(&tx, edge)?);
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn get_account(&self, account: &AccountId) -> StorageResult<Option<AccountRecord>> {
        Ok(load_account(&self.conn, account)?)
    }

    fn get_catalog_entry(&self, canonical: CanonicalId) -> StorageResult<Option<CatalogRecord>> {
        Ok(load_catalog_entry(&self.conn, canonical)?)
    }

    fn find_untitled_entries(&self, limit: usize) -> StorageResult<Vec<CatalogRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATALOG_COLUMNS} FROM catalog_entries
             WHERE title = ?1 OR TRIM(title) = ''
             ORDER BY canonical_id LIMIT ?2"
        ))?;
        let entries = stmt
            .query_map(
                params![merge::UNKNOWN_TITLE, i64::try_from(limit).unwrap_or(i64::MAX)],
                catalog_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn merge_catalog_record(
        &mut self,
        record: &CatalogRecord,
        policy: MergePolicy,
    ) -> StorageResult<UpsertKind> {
        let tx = self.conn.transaction()?;
        let kind = upsert_catalog_entry(&tx, record, policy)?;
        tx.commit()?;
        Ok(kind)
    }

    fn get_edges_for_account(&self, account: &AccountId) -> StorageResult<Vec<EdgeRecord>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM interaction_edges e
             JOIN accounts a ON a.id = e.account_id
             WHERE e.account_id = ?1 ORDER BY e.canonical_id, e.kind"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params![account.key()], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn count_edges_observed_before(
        &self,
        account: &AccountId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut stmt = self
            .conn
            .prepare("SELECT observed_at FROM interaction_edges WHERE account_id = ?1")?;
        let observed = stmt
            .query_map(params![account.key()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(observed
            .iter()
            .filter_map(|raw| parse_timestamp(raw))
            .filter(|at| *at < cutoff)
            .count() as u64)
    }

    // ===== Identity Mappings =====

    fn get_mapping(&self, edition: EditionId) -> StorageResult<Option<CanonicalId>> {
        let canonical = self
            .conn
            .query_row(
                "SELECT canonical_id FROM identity_mappings WHERE edition_id = ?1",
                params![edition],
                |row| row.get(0),
            )
            .optional()?;
        Ok(canonical)
    }

    fn insert_mapping_if_absent(
        &mut self,
        edition: EditionId,
        canonical: CanonicalId,
    ) -> StorageResult<CanonicalId> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO identity_mappings (edition_id, canonical_id, resolved_at)
             VALUES (?1, ?2, ?3)",
            params![edition, canonical, now],
        )?;
        let stored = self.conn.query_row(
            "SELECT canonical_id FROM identity_mappings WHERE edition_id = ?1",
            params![edition],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    // ===== Checkpoint & Frontier =====

    fn save_checkpoint(
        &mut self,
        checkpoint: &RunCheckpoint,
        frontier: &[FrontierEntry],
    ) -> StorageResult<()> {
        let counters = serde_json::to_string(&checkpoint.counters)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO run_checkpoint (key, value) VALUES (?1, ?2)")?;
            match &checkpoint.last_processed_account {
                Some(account) => {
                    stmt.execute(params![KEY_LAST_ACCOUNT, account])?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM run_checkpoint WHERE key = ?1",
                        params![KEY_LAST_ACCOUNT],
                    )?;
                }
            }
            stmt.execute(params![KEY_COUNTERS, counters])?;
            stmt.execute(params![KEY_UPDATED_AT, checkpoint.updated_at.to_rfc3339()])?;
            stmt.execute(params![KEY_RUN_ID, checkpoint.run_id.to_string()])?;
        }
        replace_frontier(&tx, frontier)?;
        tx.commit()?;
        Ok(())
    }

    fn load_checkpoint(&self) -> StorageResult<Option<RunCheckpoint>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM run_checkpoint")?;
        let values: HashMap<String, String> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        if values.is_empty() {
            return Ok(None);
        }

        let counters: Counters = match values.get(KEY_COUNTERS) {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            None => Counters::default(),
        };
        let run_id = match values.get(KEY_RUN_ID) {
            Some(raw) => raw.parse().map_err(|_| StorageError::Corrupt {
                column: KEY_RUN_ID.to_string(),
                value: raw.clone(),
            })?,
            None => 0,
        };
        let updated_at = values
            .get(KEY_UPDATED_AT)
            .and_then(|raw| parse_timestamp(raw))
            .unwrap_or_else(Utc::now);

        Ok(Some(RunCheckpoint {
            run_id,
            last_processed_account: values.get(KEY_LAST_ACCOUNT).cloned(),
            counters,
            updated_at,
        }))
    }

    fn save_frontier(&mut self, frontier: &[FrontierEntry]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        replace_frontier(&tx, frontier)?;
        tx.commit()?;
        Ok(())
    }

    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT display_name, depth, deferrals, from_pool
             FROM frontier_queue ORDER BY position",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(FrontierEntry {
                    account: AccountId::new(row.get::<_, String>(0)?),
                    depth: row.get(1)?,
                    deferrals: row.get(2)?,
                    from_pool: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn clear_progress(&mut self) -> StorageResult<()> {
        self.conn
            .execute_batch("DELETE FROM run_checkpoint; DELETE FROM frontier_queue;")?;
        Ok(())
    }

    // ===== Skipped Records =====

    fn record_skip(
        &mut self,
        run_id: i64,
        account: &AccountId,
        item_ref: Option<&str>,
        reason: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO skipped_records (run_id, account_id, item_ref, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, account.as_str(), item_ref, reason, now],
        )?;
        Ok(())
    }

    fn get_skipped(&self, run_id: i64) -> StorageResult<Vec<SkipRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, account_id, item_ref, reason, recorded_at
             FROM skipped_records WHERE run_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![run_id], |row| {
                Ok(SkipRecord {
                    run_id: row.get(0)?,
                    account_id: row.get(1)?,
                    item_ref: row.get(2)?,
                    reason: row.get(3)?,
                    recorded_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ===== Statistics =====

    fn count_accounts(&self) -> StorageResult<u64> {
        count(&self.conn, "SELECT COUNT(*) FROM accounts", [])
    }

    fn count_catalog_entries(&self) -> StorageResult<u64> {
        count(&self.conn, "SELECT COUNT(*) FROM catalog_entries", [])
    }

    fn count_edges(&self) -> StorageResult<u64> {
        count(&self.conn, "SELECT COUNT(*) FROM interaction_edges", [])
    }

    fn count_edges_by_kind(&self) -> StorageResult<HashMap<InteractionKind, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM interaction_edges GROUP BY kind")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, InteractionKind>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn count_mappings(&self) -> StorageResult<u64> {
        count(&self.conn, "SELECT COUNT(*) FROM identity_mappings", [])
    }

    fn count_self_mapped(&self) -> StorageResult<u64> {
        count(
            &self.conn,
            "SELECT COUNT(*) FROM identity_mappings WHERE edition_id = canonical_id",
            [],
        )
    }

    fn catalog_quality(&self) -> StorageResult<CatalogQuality> {
        let conn = &self.conn;
        let garbled = format!("%{}%", char::REPLACEMENT_CHARACTER);
        Ok(CatalogQuality {
            unknown_titles: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE title = ?1 OR TRIM(title) = ''",
                params![merge::UNKNOWN_TITLE],
            )?,
            missing_artist: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE artist IS NULL OR TRIM(artist) = ''",
                [],
            )?,
            missing_year: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE year IS NULL",
                [],
            )?,
            implausible_year: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE year < ?1 OR year > ?2",
                params![EARLIEST_RELEASE_YEAR, Utc::now().year()],
            )?,
            garbled_text: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE title LIKE ?1 OR artist LIKE ?1",
                params![garbled],
            )?,
            missing_source_edition: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE source_edition_id IS NULL",
                [],
            )?,
            direct_editions: count(
                conn,
                "SELECT COUNT(*) FROM catalog_entries WHERE source_edition_id = canonical_id",
                [],
            )?,
            shared_source_edition: count(
                conn,
                "SELECT COUNT(*) FROM (
                     SELECT source_edition_id FROM catalog_entries
                     WHERE source_edition_id IS NOT NULL
                     GROUP BY source_edition_id HAVING COUNT(*) > 1
                 )",
                [],
            )?,
            duplicate_content: count(
                conn,
                "SELECT COUNT(*) FROM (
                     SELECT 1 FROM catalog_entries
                     WHERE title != ?1 AND TRIM(title) != ''
                     GROUP BY LOWER(title), LOWER(COALESCE(artist, ''))
                     HAVING COUNT(*) > 1
                 )",
                params![merge::UNKNOWN_TITLE],
            )?,
        })
    }

    fn count_skipped(&self) -> StorageResult<u64> {
        count(&self.conn, "SELECT COUNT(*) FROM skipped_records", [])
    }
}

// ===== Upsert helpers =====

fn upsert_account(conn: &Connection, incoming: &AccountRecord) -> rusqlite::Result<UpsertKind> {
    match load_account(conn, &incoming.id)? {
        None => {
            conn.execute(
                "INSERT INTO accounts (id, display_name, location, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    incoming.id.key(),
                    incoming.id.as_str(),
                    incoming.location,
                    incoming.joined_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(UpsertKind::Inserted)
        }
        Some(existing) => {
            let merged = merge::merge_account(&existing, incoming);
            if merged == existing {
                return Ok(UpsertKind::Unchanged);
            }
            conn.execute(
                "UPDATE accounts SET location = ?1, joined_at = ?2 WHERE id = ?3",
                params![
                    merged.location,
                    merged.joined_at.map(|t| t.to_rfc3339()),
                    merged.id.key(),
                ],
            )?;
            Ok(UpsertKind::Updated)
        }
    }
}

fn upsert_catalog_entry(
    conn: &Connection,
    incoming: &CatalogRecord,
    policy: MergePolicy,
) -> rusqlite::Result<UpsertKind> {
    let (row, kind) = match load_catalog_entry(conn, incoming.canonical_id)? {
        None => (incoming.clone(), UpsertKind::Inserted),
        Some(existing) => {
            let merged = merge::merge_catalog_entry(&existing, incoming, policy);
            if merged == existing {
                return Ok(UpsertKind::Unchanged);
            }
            (merged, UpsertKind::Updated)
        }
    };

    conn.execute(
        &format!(
            "INSERT INTO catalog_entries ({CATALOG_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(canonical_id) DO UPDATE SET
                source_edition_id = excluded.source_edition_id, title = excluded.title,
                artist = excluded.artist, genre = excluded.genre, style = excluded.style,
                country = excluded.country, released = excluded.released, year = excluded.year,
                image = excluded.image, format_summary = excluded.format_summary,
                label_summary = excluded.label_summary, have_count = excluded.have_count,
                want_count = excluded.want_count, rating_avg = excluded.rating_avg,
                rating_count = excluded.rating_count, metadata_source = excluded.metadata_source"
        ),
        params![
            row.canonical_id,
            row.source_edition_id,
            row.title,
            row.artist,
            join_tags(&row.genres),
            join_tags(&row.styles),
            row.country,
            row.released,
            row.year,
            row.image,
            row.format_summary,
            row.label_summary,
            row.have_count,
            row.want_count,
            row.rating_avg,
            row.rating_count,
            row.metadata_source,
        ],
    )?;
    Ok(kind)
}

fn upsert_edge(conn: &Connection, incoming: &EdgeRecord) -> rusqlite::Result<UpsertKind> {
    let existing = conn
        .query_row(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM interaction_edges e
                 JOIN accounts a ON a.id = e.account_id
                 WHERE e.account_id = ?1 AND e.canonical_id = ?2 AND e.kind = ?3"
            ),
            params![incoming.account.key(), incoming.canonical_id, incoming.kind],
            edge_from_row,
        )
        .optional()?;

    let Some(existing) = existing else {
        conn.execute(
            "INSERT INTO interaction_edges
             (account_id, canonical_id, kind, rating, weight, source, added_at, observed_at, review_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                incoming.account.key(),
                incoming.canonical_id,
                incoming.kind,
                incoming.rating,
                incoming.weight,
                incoming.source,
                incoming.added_at.map(|t| t.to_rfc3339()),
                incoming.observed_at.to_rfc3339(),
                incoming.review,
            ],
        )?;
        return Ok(UpsertKind::Inserted);
    };

    let merged = merge::merge_edge(&existing, incoming);
    if merged == existing {
        return Ok(UpsertKind::Unchanged);
    }

    // A newer sighting with identical content only refreshes observed_at
    let content_changed = EdgeRecord {
        observed_at: existing.observed_at,
        ..merged.clone()
    } != existing;

    conn.execute(
        "UPDATE interaction_edges
         SET rating = ?1, weight = ?2, source = ?3, added_at = ?4, observed_at = ?5, review_text = ?6
         WHERE account_id = ?7 AND canonical_id = ?8 AND kind = ?9",
        params![
            merged.rating,
            merged.weight,
            merged.source,
            merged.added_at.map(|t| t.to_rfc3339()),
            merged.observed_at.to_rfc3339(),
            merged.review,
            merged.account.key(),
            merged.canonical_id,
            merged.kind,
        ],
    )?;

    Ok(if content_changed {
        UpsertKind::Updated
    } else {
        UpsertKind::Unchanged
    })
}

fn replace_frontier(conn: &Connection, frontier: &[FrontierEntry]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM frontier_queue", [])?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO frontier_queue
         (position, account_id, display_name, depth, deferrals, from_pool)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, entry) in frontier.iter().enumerate() {
        stmt.execute(params![
            position as i64,
            entry.account.key(),
            entry.account.as_str(),
            entry.depth,
            entry.deferrals,
            entry.from_pool,
        ])?;
    }
    Ok(())
}

// ===== Row mapping =====

fn load_account(conn: &Connection, account: &AccountId) -> rusqlite::Result<Option<AccountRecord>> {
    conn.query_row(
        "SELECT display_name, location, joined_at FROM accounts WHERE id = ?1",
        params![account.key()],
        |row| {
            Ok(AccountRecord {
                id: AccountId::new(row.get::<_, String>(0)?),
                location: row.get(1)?,
                joined_at: optional_timestamp(row, 2)?,
            })
        },
    )
    .optional()
}

fn load_catalog_entry(
    conn: &Connection,
    canonical: CanonicalId,
) -> rusqlite::Result<Option<CatalogRecord>> {
    conn.query_row(
        &format!("SELECT {CATALOG_COLUMNS} FROM catalog_entries WHERE canonical_id = ?1"),
        params![canonical],
        catalog_from_row,
    )
    .optional()
}

fn catalog_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogRecord> {
    Ok(CatalogRecord {
        canonical_id: row.get(0)?,
        source_edition_id: row.get(1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        genres: split_tags(row.get(4)?),
        styles: split_tags(row.get(5)?),
        country: row.get(6)?,
        released: row.get(7)?,
        year: row.get(8)?,
        image: row.get(9)?,
        format_summary: row.get(10)?,
        label_summary: row.get(11)?,
        have_count: row.get(12)?,
        want_count: row.get(13)?,
        rating_avg: row.get(14)?,
        rating_count: row.get(15)?,
        metadata_source: row.get(16)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<EdgeRecord> {
    Ok(EdgeRecord {
        account: AccountId::new(row.get::<_, String>(0)?),
        canonical_id: row.get(1)?,
        kind: row.get(2)?,
        rating: row.get(3)?,
        weight: row.get(4)?,
        source: row.get(5)?,
        added_at: optional_timestamp(row, 6)?,
        observed_at: required_timestamp(row, 7)?,
        review: row.get(8)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StorageResult<u64> {
    let count: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(count as u64)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| bad_timestamp(idx, raw)),
    }
}

fn required_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| bad_timestamp(idx, raw))
}

fn bad_timestamp(idx: usize, raw: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(StorageError::Corrupt {
            column: "timestamp".to_string(),
            value: raw,
        }),
    )
}

fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(", "))
    }
}

fn split_tags(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

// ===== Column conversions =====

impl ToSql for InteractionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_db_string()))
    }
}

impl FromSql for InteractionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Self::from_db_string(raw).ok_or_else(|| corrupt_column("kind", raw))
    }
}

impl ToSql for SourceKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_db_string()))
    }
}

impl FromSql for SourceKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Self::from_db_string(raw).ok_or_else(|| corrupt_column("source", raw))
    }
}

fn corrupt_column(column: &str, raw: &str) -> FromSqlError {
    FromSqlError::Other(Box::new(StorageError::Corrupt {
        column: column.to_string(),
        value: raw.to_string(),
    }))
}
