/// Account lifecycle within the frontier
///
/// Accounts move strictly forward: `Unseen → Queued → InProgress → Done`.
/// The only backward step is a deferral, which returns an in-progress
/// account to `Queued` after its rate-limit retries ran out.
use std::fmt;

/// Represents where an account is in the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountState {
    /// Never referenced by a seed or a related-account list
    Unseen,

    /// Waiting in the frontier queue
    Queued,

    /// Popped by the orchestrator and being fetched or written
    InProgress,

    /// Committed, filtered or skipped; never requeued in this run
    Done,
}

impl AccountState {
    /// Returns true if no further work will be scheduled for the account
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the account is known to the frontier
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unseen)
    }

    /// Returns true if moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: AccountState) -> bool {
        matches!(
            (self, next),
            (Self::Unseen, Self::Queued)
                | (Self::Queued, Self::InProgress)
                | (Self::InProgress, Self::Done)
                | (Self::InProgress, Self::Queued)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unseen" => Some(Self::Unseen),
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
