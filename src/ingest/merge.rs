//! Merge policy for repeated observations
//!
//! Every upsert in `write_interactions` reads the stored row, merges it
//! with the incoming one through these functions, and writes the result only
//! if it differs. Keeping the policy pure makes conflicting observations
//! resolve the same way regardless of which writer got there first.

use crate::ingest::MergePolicy;
use crate::model::{EditionMetadata, SourceKind};
use crate::storage::{AccountRecord, CatalogRecord, EdgeRecord};

/// Title stored when no source reported one
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Merges an account: only previously unknown optional fields are filled
pub fn merge_account(existing: &AccountRecord, incoming: &AccountRecord) -> AccountRecord {
    AccountRecord {
        id: existing.id.clone(),
        location: existing.location.clone().or_else(|| incoming.location.clone()),
        joined_at: existing.joined_at.or(incoming.joined_at),
    }
}

/// Merges a catalog entry
///
/// Non-null incoming fields replace stored ones, unless the stored metadata
/// came from the preferred source and the incoming one did not; then the
/// incoming row only fills gaps. A real title always replaces the
/// placeholder and is never replaced by an empty one. Genre and style sets
/// are unioned, and the representative edition is the first one recorded.
pub fn merge_catalog_entry(
    existing: &CatalogRecord,
    incoming: &CatalogRecord,
    policy: MergePolicy,
) -> CatalogRecord {
    let authoritative = incoming.metadata_source == policy.preferred_source
        || existing.metadata_source != policy.preferred_source;

    let pick = |stored: &Option<String>, fresh: &Option<String>| -> Option<String> {
        if authoritative {
            fresh.clone().or_else(|| stored.clone())
        } else {
            stored.clone().or_else(|| fresh.clone())
        }
    };
    let pick_copy = |stored: Option<i64>, fresh: Option<i64>| {
        if authoritative {
            fresh.or(stored)
        } else {
            stored.or(fresh)
        }
    };

    let title = match (is_real_title(&existing.title), is_real_title(&incoming.title)) {
        (_, false) => existing.title.clone(),
        (false, true) => incoming.title.clone(),
        (true, true) if authoritative => incoming.title.clone(),
        (true, true) => existing.title.clone(),
    };

    CatalogRecord {
        canonical_id: existing.canonical_id,
        source_edition_id: existing.source_edition_id.or(incoming.source_edition_id),
        title,
        artist: pick(&existing.artist, &incoming.artist),
        genres: union_tags(&existing.genres, &incoming.genres),
        styles: union_tags(&existing.styles, &incoming.styles),
        country: pick(&existing.country, &incoming.country),
        released: pick(&existing.released, &incoming.released),
        year: if authoritative {
            incoming.year.or(existing.year)
        } else {
            existing.year.or(incoming.year)
        },
        image: pick(&existing.image, &incoming.image),
        format_summary: pick(&existing.format_summary, &incoming.format_summary),
        label_summary: pick(&existing.label_summary, &incoming.label_summary),
        have_count: pick_copy(existing.have_count, incoming.have_count),
        want_count: pick_copy(existing.want_count, incoming.want_count),
        rating_avg: if authoritative {
            incoming.rating_avg.or(existing.rating_avg)
        } else {
            existing.rating_avg.or(incoming.rating_avg)
        },
        rating_count: pick_copy(existing.rating_count, incoming.rating_count),
        metadata_source: if authoritative {
            incoming.metadata_source
        } else {
            existing.metadata_source
        },
    }
}

/// Merges an interaction edge
///
/// An explicit rating (1-5) supersedes "observed without rating" (0) and
/// unobserved (None); between two explicit ratings the newer observation
/// wins. Other fields follow the newer observation but never lose a known
/// value to an absent one. Equal inputs produce an equal edge.
pub fn merge_edge(existing: &EdgeRecord, incoming: &EdgeRecord) -> EdgeRecord {
    let incoming_is_newer = incoming.observed_at >= existing.observed_at;

    let rating = match (existing.rating, incoming.rating) {
        (current, None) => current,
        (None, Some(fresh)) => Some(fresh),
        (Some(current), Some(0)) => Some(current),
        (Some(0), Some(fresh)) => Some(fresh),
        (Some(current), Some(fresh)) => {
            if incoming_is_newer {
                Some(fresh)
            } else {
                Some(current)
            }
        }
    };

    let (newer, older) = if incoming_is_newer {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    EdgeRecord {
        account: existing.account.clone(),
        canonical_id: existing.canonical_id,
        kind: existing.kind,
        rating,
        weight: newer.weight,
        source: newer.source,
        added_at: newer.added_at.or(older.added_at),
        observed_at: newer.observed_at,
        review: newer.review.clone().or_else(|| older.review.clone()),
    }
}

/// Combines metadata reported by two sources for the same edition
///
/// Fields from the preferred source win; the other source fills gaps. The
/// returned source kind is the one whose fields took precedence.
pub fn combine_metadata(
    first: (EditionMetadata, SourceKind),
    second: (EditionMetadata, SourceKind),
    policy: MergePolicy,
) -> (EditionMetadata, SourceKind) {
    let (mut primary, secondary) = if second.1 == policy.preferred_source && first.1 != second.1 {
        (second, first)
    } else {
        (first, second)
    };
    if primary.0.is_empty() && !secondary.0.is_empty() {
        return secondary;
    }
    primary.0.fill_from(&secondary.0);
    primary
}

/// Case-insensitive, sorted union of two tag lists
pub fn union_tags(left: &[String], right: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(left.len() + right.len());
    for tag in left.iter().chain(right.iter()) {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(trimmed)) {
            tags.push(trimmed.to_string());
        }
    }
    tags.sort_by_key(|t| t.to_lowercase());
    tags
}

fn is_real_title(title: &str) -> bool {
    let trimmed = title.trim();
    !trimmed.is_empty() && trimmed != UNKNOWN_TITLE
}
