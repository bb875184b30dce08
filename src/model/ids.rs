use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::hash::{Hash, Hasher};

/// External identity of a collector account
///
/// Account names are compared case-insensitively: "DJ_Bob" and "dj_bob"
/// refer to the same account. The original spelling is kept for display
/// and for building request URLs.
#[derive(Debug, Clone)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// The spelling as first seen
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased dedup key, used as the primary key in storage
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for AccountId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AccountId {}

impl Hash for AccountId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Source identifier of one concrete release (pressing, reissue, format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditionId(pub u64);

/// Identifier of the work that groups several editions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalId(pub u64);

impl CanonicalId {
    /// Canonical id used when an edition has no known grouping
    pub fn self_mapped(edition: EditionId) -> Self {
        Self(edition.0)
    }
}

impl fmt::Display for EditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// SQLite stores integers as i64; source ids never approach that range.
macro_rules! sql_integer_id {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0 as i64))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(|v| $ty(v as u64))
            }
        }
    };
}

sql_integer_id!(EditionId);
sql_integer_id!(CanonicalId);
