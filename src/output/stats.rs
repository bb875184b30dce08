//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::model::InteractionKind;
use crate::storage::{CatalogQuality, RunRecord, Storage};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatistics {
    /// Number of accounts with a stored profile
    pub accounts: u64,

    /// Number of consolidated catalog entries
    pub catalog_entries: u64,

    /// Number of interaction edges
    pub edges: u64,

    /// Edge counts keyed by interaction kind
    pub edges_by_kind: BTreeMap<String, u64>,

    /// Number of edition → canonical mappings
    pub mappings: u64,

    /// Mappings whose edition has no known grouping
    pub self_mapped: u64,

    /// Skipped accounts and items across all runs
    pub skipped: u64,

    /// Catalog data-quality checks
    pub quality: CatalogQuality,

    /// Most recent run, if any
    #[serde(skip)]
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(GrooveError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics> {
    let by_kind = storage.count_edges_by_kind()?;
    let edges_by_kind = InteractionKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), by_kind.get(kind).copied().unwrap_or(0)))
        .collect();

    Ok(CrawlStatistics {
        accounts: storage.count_accounts()?,
        catalog_entries: storage.count_catalog_entries()?,
        edges: storage.count_edges()?,
        edges_by_kind,
        mappings: storage.count_mappings()?,
        self_mapped: storage.count_self_mapped()?,
        skipped: storage.count_skipped()?,
        quality: storage.catalog_quality()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest run:");
        println!("  Id: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!();
    }

    println!("Overview:");
    println!("  Accounts: {}", stats.accounts);
    println!("  Catalog entries: {}", stats.catalog_entries);
    println!("  Interaction edges: {}", stats.edges);
    println!("  Skipped records: {}", stats.skipped);
    println!();

    println!("Edges by Kind:");
    for (kind, count) in &stats.edges_by_kind {
        let percentage = if stats.edges > 0 {
            (*count as f64 / stats.edges as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", kind, count, percentage);
    }
    println!();

    println!(
        "Identity mappings: {} ({} self-mapped)",
        stats.mappings, stats.self_mapped
    );
    println!();

    print_quality(&stats.quality, stats.catalog_entries);
}

fn print_quality(quality: &CatalogQuality, entries: u64) {
    println!("Catalog Quality:");
    println!("  Unknown titles: {}", quality.unknown_titles);
    println!("  Missing artist: {}", quality.missing_artist);
    println!("  Missing year: {}", quality.missing_year);
    println!("  Implausible year: {}", quality.implausible_year);
    println!("  Garbled text: {}", quality.garbled_text);
    println!(
        "  Source edition: {} missing, {} shared, {} of {} direct",
        quality.missing_source_edition,
        quality.shared_source_edition,
        quality.direct_editions,
        entries
    );
    println!("  Duplicate title/artist groups: {}", quality.duplicate_content);

    match quality.issues() {
        0 => println!("\nNo catalog issues found"),
        n => println!(
            "\n{} check(s) reported issues; --repair-titles backfills unknown titles",
            n
        ),
    }
}
