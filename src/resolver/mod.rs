//! Edition → canonical identity resolution
//!
//! The first mapping ever stored for an edition is permanent. Resolution
//! order:
//! 1. In-process cache
//! 2. Stored mapping
//! 3. Canonical id carried by the listing itself
//! 4. Remote lookup, self-mapping when there is no grouping or the lookup fails
//!
//! Every result is persisted before it is returned.

use crate::model::{CanonicalId, EditionId};
use crate::storage::Storage;
use crate::transport::{EditionLookup, InteractionSource, TransportError};
use crate::{GrooveError, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// How a resolution was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    Cached,
    Stored,
    Hinted,
    LookedUp,
    SelfMapped,
}

/// Canonical id plus any metadata fetched on the way
#[derive(Debug, Clone)]
pub struct Resolution {
    pub canonical: CanonicalId,
    pub path: ResolutionPath,
    /// Present when a remote lookup succeeded
    pub lookup: Option<EditionLookup>,
}

/// Counters logged at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolverStats {
    pub cache_hits: u64,
    pub stored_hits: u64,
    pub hinted: u64,
    pub looked_up: u64,
    pub self_mapped: u64,
}

/// Resolves editions to canonical ids, first-resolution-wins
#[derive(Debug, Default)]
pub struct CanonicalResolver {
    cache: HashMap<EditionId, CanonicalId>,
    stats: ResolverStats,
}

impl CanonicalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Resolves one edition
    ///
    /// # Arguments
    ///
    /// * `storage` - Store holding the mapping table
    /// * `source` - Used for the remote lookup
    /// * `edition` - Edition to resolve
    /// * `hint` - Canonical id reported alongside the edition, if any
    ///
    /// # Returns
    ///
    /// * `Ok(Resolution)` - The stored canonical id
    /// * `Err(GrooveError::Transport)` - Session expired during the lookup
    /// * `Err(GrooveError::Storage)` - The mapping could not be persisted
    pub async fn resolve(
        &mut self,
        storage: &mut dyn Storage,
        source: &mut dyn InteractionSource,
        edition: EditionId,
        hint: Option<CanonicalId>,
    ) -> Result<Resolution> {
        if let Some(canonical) = self.cache.get(&edition) {
            self.stats.cache_hits += 1;
            return Ok(Resolution {
                canonical: *canonical,
                path: ResolutionPath::Cached,
                lookup: None,
            });
        }

        if let Some(canonical) = storage.get_mapping(edition)? {
            self.stats.stored_hits += 1;
            self.cache.insert(edition, canonical);
            return Ok(Resolution {
                canonical,
                path: ResolutionPath::Stored,
                lookup: None,
            });
        }

        let (candidate, path, lookup) = match hint {
            Some(canonical) => (canonical, ResolutionPath::Hinted, None),
            None => match source.lookup_edition(edition).await {
                Ok(lookup) => match lookup.canonical {
                    Some(canonical) => (canonical, ResolutionPath::LookedUp, Some(lookup)),
                    None => (
                        CanonicalId::self_mapped(edition),
                        ResolutionPath::SelfMapped,
                        Some(lookup),
                    ),
                },
                Err(e @ TransportError::SessionExpired { .. }) => {
                    return Err(GrooveError::Transport(e));
                }
                Err(e) => {
                    warn!(edition = %edition, error = %e, "Lookup failed, self-mapping edition");
                    (CanonicalId::self_mapped(edition), ResolutionPath::SelfMapped, None)
                }
            },
        };

        let canonical = storage.insert_mapping_if_absent(edition, candidate)?;
        if canonical != candidate {
            debug!(
                edition = %edition,
                stored = %canonical,
                candidate = %candidate,
                "Edition already mapped, keeping stored canonical id"
            );
        }
        match path {
            ResolutionPath::Hinted => self.stats.hinted += 1,
            ResolutionPath::LookedUp => self.stats.looked_up += 1,
            ResolutionPath::SelfMapped => self.stats.self_mapped += 1,
            ResolutionPath::Cached | ResolutionPath::Stored => {}
        }
        self.cache.insert(edition, canonical);

        Ok(Resolution {
            canonical,
            path,
            lookup,
        })
    }
}
