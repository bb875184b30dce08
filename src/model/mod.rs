//! Domain model shared by every pipeline stage
//!
//! - Identifier newtypes for accounts, editions and canonical works
//! - The tagged `Interaction` variant produced at the transport boundary
//! - Edition metadata carried alongside each observation

mod ids;
mod interaction;

pub use ids::{AccountId, CanonicalId, EditionId};
pub use interaction::{
    normalize_rating, AccountProfile, EditionMetadata, Interaction, InteractionKind, Observation,
    SourceKind,
};
