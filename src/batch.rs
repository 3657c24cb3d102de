//! Batch admission: reading the keys of one run.

use crate::error::{Error, Result};
use crate::types::{Key, Ticket};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The ordered keys of one run, read once at start and immutable afterwards
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    keys: Vec<Key>,
    source: Option<PathBuf>,
}

impl Batch {
    /// Read a line-oriented batch source.
    ///
    /// Each line is trimmed and blank lines are skipped. A missing file is
    /// [`Error::BatchSourceMissing`], a file without keys is [`Error::EmptyBatch`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BatchSourceMissing(path.to_path_buf()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let keys: Vec<Key> = raw.lines().filter_map(Key::new).collect();
        if keys.is_empty() {
            return Err(Error::EmptyBatch(path.to_path_buf()));
        }

        tracing::debug!(path = %path.display(), keys = keys.len(), "Loaded batch");
        Ok(Self {
            keys,
            source: Some(path.to_path_buf()),
        })
    }

    /// Build an in-memory batch; blank entries are dropped
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().filter_map(Key::new).collect(),
            source: None,
        }
    }

    /// Keep only the first occurrence of each key
    pub fn dedup(self) -> Self {
        let mut seen = HashSet::new();
        let before = self.keys.len();
        let keys: Vec<Key> = self
            .keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        if keys.len() < before {
            tracing::info!(removed = before - keys.len(), "Skipping duplicate keys");
        }
        Self {
            keys,
            source: self.source,
        }
    }

    /// Keys in batch order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// One ticket per key, numbered by batch position
    pub fn tickets(&self) -> Vec<Ticket> {
        self.keys
            .iter()
            .enumerate()
            .map(|(seq, key)| Ticket {
                seq,
                key: key.clone(),
            })
            .collect()
    }

    /// Where the batch was read from, if it came from a file
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the batch has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
