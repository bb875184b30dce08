//! Title backfill for catalog entries stored under the placeholder title
//!
//! An entry is written as "Unknown Title" when neither the listing nor the
//! edition lookup named it. `repair_titles` looks each such entry up again
//! through its representative edition and merges what comes back under the
//! usual catalog merge policy, so a real title only ever replaces the
//! placeholder.

use crate::ingest::{catalog_record, MergePolicy, UpsertKind, UNKNOWN_TITLE};
use crate::model::EditionId;
use crate::storage::Storage;
use crate::transport::InteractionSource;
use crate::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Default number of entries examined by one repair pass
pub const DEFAULT_REPAIR_LIMIT: usize = 100;

/// Outcome of one repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub examined: u64,
    pub repaired: u64,
    /// The lookup answered but still had no title
    pub unresolved: u64,
    /// The lookup failed; the entry is retried by the next pass
    pub failed: u64,
}

/// Looks up untitled catalog entries again and merges the results
///
/// # Arguments
///
/// * `storage` - Catalog to repair
/// * `source` - Source used for edition lookups
/// * `policy` - Catalog merge policy
/// * `limit` - Maximum number of entries examined
///
/// # Returns
///
/// * `Ok(RepairReport)` - Counts for the pass
/// * `Err(GrooveError)` - Storage failed or the session expired
pub async fn repair_titles(
    storage: &mut dyn Storage,
    source: &mut dyn InteractionSource,
    policy: MergePolicy,
    limit: usize,
) -> Result<RepairReport> {
    let entries = storage.find_untitled_entries(limit)?;
    info!(entries = entries.len(), limit, "Repairing placeholder titles");

    let mut report = RepairReport::default();
    for entry in entries {
        report.examined += 1;
        let edition = entry
            .source_edition_id
            .unwrap_or(EditionId(entry.canonical_id.0));

        let lookup = match source.lookup_edition(edition).await {
            Ok(lookup) => lookup,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(
                    canonical = %entry.canonical_id,
                    edition = %edition,
                    error = %e,
                    "Lookup failed"
                );
                report.failed += 1;
                continue;
            }
        };

        let titled = lookup
            .metadata
            .title
            .as_deref()
            .map(str::trim)
            .is_some_and(|title| !title.is_empty() && title != UNKNOWN_TITLE);
        if !titled {
            debug!(canonical = %entry.canonical_id, edition = %edition, "Lookup has no title");
            report.unresolved += 1;
            continue;
        }

        let record = catalog_record(entry.canonical_id, edition, &lookup.metadata, lookup.source);
        match storage.merge_catalog_record(&record, policy)? {
            UpsertKind::Inserted | UpsertKind::Updated => report.repaired += 1,
            UpsertKind::Unchanged => report.unresolved += 1,
        }
    }

    info!(
        examined = report.examined,
        repaired = report.repaired,
        unresolved = report.unresolved,
        failed = report.failed,
        "Title repair finished"
    );
    Ok(report)
}
