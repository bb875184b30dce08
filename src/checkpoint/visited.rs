//! Durable log of visited accounts

use crate::model::AccountId;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only record of accounts that are done
///
/// Keys are lowercased account names, so lookups are case-insensitive.
pub trait VisitedLog: Send {
    fn load(&self) -> io::Result<HashSet<String>>;

    fn append(&mut self, account: &AccountId) -> io::Result<()>;

    fn clear(&mut self) -> io::Result<()>;
}

/// One account key per line in a plain text file
pub struct FileVisitedLog {
    path: PathBuf,
}

impl FileVisitedLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VisitedLog for FileVisitedLog {
    fn load(&self) -> io::Result<HashSet<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(|line| line.trim().to_lowercase())
                .filter(|line| !line.is_empty())
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(e) => Err(e),
        }
    }

    fn append(&mut self, account: &AccountId) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", account.key())?;
        file.sync_data()
    }

    fn clear(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// In-memory log for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryVisitedLog {
    keys: HashSet<String>,
}

impl MemoryVisitedLog {
    pub fn with_accounts<'a>(accounts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            keys: accounts.into_iter().map(|a| a.to_lowercase()).collect(),
        }
    }
}

impl VisitedLog for MemoryVisitedLog {
    fn load(&self) -> io::Result<HashSet<String>> {
        Ok(self.keys.clone())
    }

    fn append(&mut self, account: &AccountId) -> io::Result<()> {
        self.keys.insert(account.key());
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.keys.clear();
        Ok(())
    }
}
