//! Ingestion batches for the writer
//!
//! The orchestrator turns one account's fetched and resolved interactions
//! into an `IngestionBatch`. `Storage::write_interactions` then applies the
//! whole batch in one transaction using the merge policy in [`merge`].

pub mod merge;

pub use merge::{combine_metadata, merge_account, merge_catalog_entry, merge_edge, UNKNOWN_TITLE};

use crate::config::FieldPrecedence;
use crate::model::{
    AccountProfile, CanonicalId, EditionId, EditionMetadata, Interaction, SourceKind,
};
use crate::storage::{AccountRecord, CatalogRecord, EdgeRecord};
use chrono::{DateTime, Utc};

/// Which source's catalog metadata wins on conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub preferred_source: SourceKind,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            preferred_source: SourceKind::Api,
        }
    }
}

impl From<FieldPrecedence> for MergePolicy {
    fn from(precedence: FieldPrecedence) -> Self {
        Self {
            preferred_source: precedence.preferred_source(),
        }
    }
}

/// What an upsert did to one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
    Unchanged,
}

/// Row counts returned by `write_interactions`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub accounts_inserted: u64,
    pub accounts_updated: u64,
    pub entries_inserted: u64,
    pub entries_updated: u64,
    pub edges_inserted: u64,
    pub edges_updated: u64,
    pub edges_unchanged: u64,
}

impl WriteOutcome {
    pub fn record_account(&mut self, kind: UpsertKind) {
        match kind {
            UpsertKind::Inserted => self.accounts_inserted += 1,
            UpsertKind::Updated => self.accounts_updated += 1,
            UpsertKind::Unchanged => {}
        }
    }

    pub fn record_entry(&mut self, kind: UpsertKind) {
        match kind {
            UpsertKind::Inserted => self.entries_inserted += 1,
            UpsertKind::Updated => self.entries_updated += 1,
            UpsertKind::Unchanged => {}
        }
    }

    pub fn record_edge(&mut self, kind: UpsertKind) {
        match kind {
            UpsertKind::Inserted => self.edges_inserted += 1,
            UpsertKind::Updated => self.edges_updated += 1,
            UpsertKind::Unchanged => self.edges_unchanged += 1,
        }
    }

    pub fn inserted(&self) -> u64 {
        self.accounts_inserted + self.entries_inserted + self.edges_inserted
    }

    pub fn updated(&self) -> u64 {
        self.accounts_updated + self.entries_updated + self.edges_updated
    }

    /// True when the write left every row as it was
    pub fn is_noop(&self) -> bool {
        self.inserted() == 0 && self.updated() == 0
    }
}

/// Everything written for one account
#[derive(Debug, Clone)]
pub struct IngestionBatch {
    pub account: AccountRecord,
    pub entries: Vec<CatalogRecord>,
    pub edges: Vec<EdgeRecord>,
    /// When the crawler read this account's documents
    pub observed_at: DateTime<Utc>,
}

impl IngestionBatch {
    pub fn new(profile: &AccountProfile, observed_at: DateTime<Utc>) -> Self {
        Self {
            account: AccountRecord {
                id: profile.account.clone(),
                location: non_empty(profile.location.clone()),
                joined_at: profile.joined_at,
            },
            entries: Vec::new(),
            edges: Vec::new(),
            observed_at,
        }
    }

    /// Adds one resolved interaction with its catalog entry
    ///
    /// Duplicate entries and edges inside the batch are folded with the same
    /// merge policy the store applies, so the batch never holds two rows for
    /// one key.
    pub fn add_interaction(
        &mut self,
        interaction: &Interaction,
        canonical: CanonicalId,
        metadata: &EditionMetadata,
        metadata_source: SourceKind,
        edge_source: SourceKind,
        policy: MergePolicy,
    ) {
        let observation = interaction.observation();
        self.add_entry(
            catalog_record(canonical, observation.edition, metadata, metadata_source),
            policy,
        );
        self.add_edge(EdgeRecord {
            account: self.account.id.clone(),
            canonical_id: canonical,
            kind: interaction.kind(),
            rating: interaction.edge_rating(),
            weight: 1.0,
            source: edge_source,
            added_at: observation.added_at,
            observed_at: self.observed_at,
            review: non_empty(observation.review.clone()),
        });
    }

    pub fn add_entry(&mut self, entry: CatalogRecord, policy: MergePolicy) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.canonical_id == entry.canonical_id)
        {
            Some(existing) => *existing = merge_catalog_entry(existing, &entry, policy),
            None => self.entries.push(entry),
        }
    }

    pub fn add_edge(&mut self, edge: EdgeRecord) {
        match self.edges.iter_mut().find(|e| {
            e.canonical_id == edge.canonical_id && e.kind == edge.kind && e.account == edge.account
        }) {
            Some(existing) => *existing = merge_edge(existing, &edge),
            None => self.edges.push(edge),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Builds a catalog row from edition metadata
pub fn catalog_record(
    canonical: CanonicalId,
    edition: EditionId,
    metadata: &EditionMetadata,
    source: SourceKind,
) -> CatalogRecord {
    CatalogRecord {
        canonical_id: canonical,
        source_edition_id: Some(edition),
        title: non_empty(metadata.title.clone()).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        artist: non_empty(metadata.artist.clone()),
        genres: merge::union_tags(&metadata.genres, &[]),
        styles: merge::union_tags(&metadata.styles, &[]),
        country: non_empty(metadata.country.clone()),
        released: non_empty(metadata.released.clone()),
        year: metadata.year.filter(|y| *y > 0),
        image: non_empty(metadata.image.clone()),
        format_summary: non_empty(metadata.format_summary.clone()),
        label_summary: non_empty(metadata.label_summary.clone()),
        have_count: metadata.have_count,
        want_count: metadata.want_count,
        rating_avg: metadata.rating_avg,
        rating_count: metadata.rating_count,
        metadata_source: source,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
