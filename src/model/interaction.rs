use crate::model::{AccountId, CanonicalId, EditionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of relationship between an account and a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Collection,
    Wantlist,
    Contribution,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 3] = [Self::Collection, Self::Wantlist, Self::Contribution];

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Wantlist => "wantlist",
            Self::Contribution => "contribution",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "collection" => Some(Self::Collection),
            "wantlist" => Some(Self::Wantlist),
            "contribution" => Some(Self::Contribution),
            _ => None,
        }
    }

    /// Whether an observation without a rating still counts as "seen, unrated"
    pub fn carries_rating(&self) -> bool {
        matches!(self, Self::Collection | Self::Wantlist)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Endpoint family a record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Token-authenticated JSON API
    Api,
    /// Cookie-gated HTML pages
    Feed,
}

impl SourceKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Feed => "feed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "api" => Some(Self::Api),
            "feed" => Some(Self::Feed),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Descriptive fields reported for an edition
///
/// Every field is optional: the API and the feed each fill a different
/// subset, and a missing field never erases a known one downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditionMetadata {
    pub title: Option<String>,
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
}

impl EditionMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fills every unknown field of `self` from `other`
    pub fn fill_from(&mut self, other: &EditionMetadata) {
        fill(&mut self.title, &other.title);
        fill(&mut self.artist, &other.artist);
        fill(&mut self.country, &other.country);
        fill(&mut self.released, &other.released);
        fill(&mut self.year, &other.year);
        fill(&mut self.image, &other.image);
        fill(&mut self.format_summary, &other.format_summary);
        fill(&mut self.label_summary, &other.label_summary);
        fill(&mut self.have_count, &other.have_count);
        fill(&mut self.want_count, &other.want_count);
        fill(&mut self.rating_avg, &other.rating_avg);
        fill(&mut self.rating_count, &other.rating_count);
        if self.genres.is_empty() {
            self.genres = other.genres.clone();
        }
        if self.styles.is_empty() {
            self.styles = other.styles.clone();
        }
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(other);
    }
}

/// One item reference as reported by a source
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub edition: EditionId,
    /// Canonical id the source already knows, if any
    pub canonical_hint: Option<CanonicalId>,
    /// Explicit 1-5 rating; `None` when the source gave no rating
    pub rating: Option<u8>,
    pub added_at: Option<DateTime<Utc>>,
    pub review: Option<String>,
    pub metadata: EditionMetadata,
}

impl Observation {
    pub fn new(edition: EditionId) -> Self {
        Self {
            edition,
            canonical_hint: None,
            rating: None,
            added_at: None,
            review: None,
            metadata: EditionMetadata::default(),
        }
    }
}

/// A normalized interaction record, tagged by category
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Collection(Observation),
    Wantlist(Observation),
    Contribution(Observation),
}

impl Interaction {
    pub fn new(kind: InteractionKind, observation: Observation) -> Self {
        match kind {
            InteractionKind::Collection => Self::Collection(observation),
            InteractionKind::Wantlist => Self::Wantlist(observation),
            InteractionKind::Contribution => Self::Contribution(observation),
        }
    }

    pub fn kind(&self) -> InteractionKind {
        match self {
            Self::Collection(_) => InteractionKind::Collection,
            Self::Wantlist(_) => InteractionKind::Wantlist,
            Self::Contribution(_) => InteractionKind::Contribution,
        }
    }

    pub fn observation(&self) -> &Observation {
        match self {
            Self::Collection(o) | Self::Wantlist(o) | Self::Contribution(o) => o,
        }
    }

    /// Rating to persist on the edge
    ///
    /// Collection and wantlist entries without a rating are stored as 0
    /// ("observed, unrated"); contributions never carry one.
    pub fn edge_rating(&self) -> Option<u8> {
        let observation = self.observation();
        if self.kind().carries_rating() {
            Some(observation.rating.unwrap_or(0))
        } else {
            observation.rating
        }
    }
}

/// Converts a raw source rating into an explicit 1-5 value
///
/// Some pages encode ratings as percentages (400 for four stars). Zero and
/// anything outside the scale yield `None`.
pub fn normalize_rating(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    let scaled = if raw > 5.0 { raw / 100.0 } else { raw };
    let rounded = scaled.round();
    if (1.0..=5.0).contains(&rounded) {
        Some(rounded as u8)
    } else {
        None
    }
}

/// Profile fields for an account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountProfile {
    pub account: AccountId,
    pub location: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl AccountProfile {
    pub fn bare(account: AccountId) -> Self {
        Self {
            account,
            location: None,
            joined_at: None,
        }
    }
}
