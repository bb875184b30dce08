//! Rate-limited transport
//!
//! This module handles all remote access, including:
//! - Pacing with jitter, widened when the remaining quota runs low
//! - Bounded retries with exponential backoff and `Retry-After` support
//! - Cookie session material for the document feed
//! - Parsing API and feed documents into typed interactions at the boundary
//! - The `InteractionSource` seam used by the orchestrator

pub mod api;
mod client;
pub mod feed;
pub mod pacing;
pub mod session;
mod source;

pub use client::{build_http_client, RateLimitedClient, RawDocument, Request, RequestStats, QUOTA_HEADER};
pub use session::{parse_cookie_file, Cookie, CookieFile, SessionMaterial};
pub use source::{EditionLookup, InteractionSource, RemoteSource};

use crate::model::{Interaction, SourceKind};
use thiserror::Error;

/// Errors that can occur while fetching or parsing remote documents
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transient failure for {url} after {attempts} attempts: {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Rate limit not lifted for {url} after {attempts} attempts")]
    RateLimitExceeded { url: String, attempts: u32 },

    #[error("Session expired for {url}: credentials must be refreshed")]
    SessionExpired { url: String },

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed document from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Failed to build request: {0}")]
    Build(String),
}

impl TransportError {
    /// Only expired credentials stop the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    pub(crate) fn malformed(url: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// An item that could not be parsed, kept with its raw identifier
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedItem {
    pub raw_id: String,
    pub reason: String,
}

/// One page of interactions
#[derive(Debug, Clone, Default)]
pub struct InteractionPage {
    pub items: Vec<Interaction>,
    pub malformed: Vec<MalformedItem>,
    /// 1-based page number
    pub page: u32,
    /// Total pages reported by the source
    pub pages: u32,
}

impl InteractionPage {
    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }
}

/// Every interaction of one kind for one account
#[derive(Debug, Clone)]
pub struct InteractionSet {
    pub items: Vec<Interaction>,
    pub malformed: Vec<MalformedItem>,
    /// Channel the listing was read from
    pub source: SourceKind,
    pub pages_fetched: u32,
    /// True when the page limit cut the listing short
    pub truncated: bool,
}

impl InteractionSet {
    pub fn new(source: SourceKind) -> Self {
        Self {
            items: Vec::new(),
            malformed: Vec::new(),
            source,
            pages_fetched: 0,
            truncated: false,
        }
    }

    pub fn extend(&mut self, page: InteractionPage) {
        self.items.extend(page.items);
        self.malformed.extend(page.malformed);
        self.pages_fetched += 1;
    }
}
