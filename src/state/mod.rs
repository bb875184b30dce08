//! State module for tracking crawl progress
//!
//! - `AccountState`: where an account is in the frontier lifecycle

mod account_state;

pub use account_state::AccountState;
