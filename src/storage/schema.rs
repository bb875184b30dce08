//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Groove-Ripple database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Collector accounts; id is the lowercased account name
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    location TEXT,
    joined_at TEXT
);

-- One row per canonical work
CREATE TABLE IF NOT EXISTS catalog_entries (
    canonical_id INTEGER PRIMARY KEY,
    source_edition_id INTEGER,
    title TEXT NOT NULL,
    artist TEXT,
    genre TEXT,
    style TEXT,
    country TEXT,
    released TEXT,
    year INTEGER,
    image TEXT,
    format_summary TEXT,
    label_summary TEXT,
    have_count INTEGER,
    want_count INTEGER,
    rating_avg REAL,
    rating_count INTEGER,
    metadata_source TEXT NOT NULL DEFAULT 'api'
);

-- Edition → canonical mapping; rows are never updated
CREATE TABLE IF NOT EXISTS identity_mappings (
    edition_id INTEGER PRIMARY KEY,
    canonical_id INTEGER NOT NULL,
    resolved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_identity_mappings_canonical ON identity_mappings(canonical_id);

-- Typed account ↔ catalog relationships
CREATE TABLE IF NOT EXISTS interaction_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    canonical_id INTEGER NOT NULL REFERENCES catalog_entries(canonical_id),
    kind TEXT NOT NULL,
    rating INTEGER,
    weight REAL NOT NULL DEFAULT 1.0,
    source TEXT NOT NULL,
    added_at TEXT,
    observed_at TEXT NOT NULL,
    review_text TEXT,
    UNIQUE(account_id, canonical_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_edges_account ON interaction_edges(account_id);
CREATE INDEX IF NOT EXISTS idx_edges_canonical ON interaction_edges(canonical_id);

-- Last completed account and counters
CREATE TABLE IF NOT EXISTS run_checkpoint (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Durable mirror of the BFS queue
CREATE TABLE IF NOT EXISTS frontier_queue (
    position INTEGER PRIMARY KEY,
    account_id TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    depth INTEGER NOT NULL,
    deferrals INTEGER NOT NULL DEFAULT 0,
    from_pool INTEGER NOT NULL DEFAULT 0
);

-- Skipped accounts and items, kept for later recovery
CREATE TABLE IF NOT EXISTS skipped_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    account_id TEXT NOT NULL,
    item_ref TEXT,
    reason TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_skipped_run ON skipped_records(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
