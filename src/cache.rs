//! Persisted nickname to (score, grade) map.
//!
//! The file is a JSON object keyed by nickname. Entries written by older tooling as
//! `[score, "grade label"]` pairs are read as well.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::readability::{GradeLevel, Readability, round2};

pub type CacheMap = BTreeMap<String, Readability>;

/// Whether a new message from a user drops their cached score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// A cached score is reused until the process is told otherwise.
    #[default]
    Reuse,
    InvalidateOnMessage,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCache {
    path: Option<PathBuf>,
    entries: CacheMap,
}

impl ScoreCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the cache file at `path`, creating its directory. Only a directory that
    /// cannot be created is an error; an unreadable file yields an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| Error::Storage {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut cache = Self {
            path: Some(path),
            entries: CacheMap::new(),
        };
        cache.load();
        Ok(cache)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replaces the in-memory entries with the file contents.
    pub fn load(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        self.entries = match read_cache_file(path) {
            Ok(entries) => {
                debug!(path = %path.display(), entries = entries.len(), "loaded score cache");
                entries
            }
            Err(Error::Io(err)) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no score cache yet");
                CacheMap::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable score cache");
                CacheMap::new()
            }
        };
    }

    /// Overwrites the backing file with the full cache.
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => write_cache_file(path, &self.entries),
            None => Ok(()),
        }
    }

    pub fn get(&self, nick: &str) -> Option<Readability> {
        self.entries.get(nick).copied()
    }

    /// Stores a score rounded to two decimals.
    pub fn put(&mut self, nick: &str, score: f64, grade: GradeLevel) {
        self.entries.insert(
            nick.to_string(),
            Readability {
                score: round2(score),
                grade,
            },
        );
    }

    pub fn invalidate(&mut self, nick: &str) -> bool {
        self.entries.remove(nick).is_some()
    }

    pub fn entries(&self) -> &CacheMap {
        &self.entries
    }

    pub fn snapshot(&self) -> CacheMap {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn read_cache_file(path: &Path) -> Result<CacheMap> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes the map next to `path` and renames it into place.
pub fn write_cache_file(path: &Path, entries: &CacheMap) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(entries)?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readability::GradeTable;

    #[test]
    fn put_rounds_to_two_decimals() {
        let mut cache = ScoreCache::in_memory();
        cache.put("alice", 7.12345, GradeTable::Decimal.grade(7.12));
        let entry = cache.get("alice").unwrap();
        assert_eq!(entry.score, 7.12);
        assert_eq!(entry.grade.label(), "9th - 10th Grade");
        assert!(cache.invalidate("alice"));
        assert!(!cache.invalidate("alice"));
        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scores_cache.json");
        let mut cache = ScoreCache::open(&path).unwrap();
        assert!(cache.is_empty());
        cache.put("alice", 6.5, GradeTable::Decimal.grade(6.5));
        cache.put("bob", 12.0, GradeTable::Whole.grade(12.0));
        cache.save().unwrap();

        let reopened = ScoreCache::open(&path).unwrap();
        assert_eq!(reopened.entries(), cache.entries());
        assert_eq!(reopened.get("bob").unwrap().grade.table(), GradeTable::Whole);
    }

    #[test]
    fn load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores_cache.json");
        let mut cache = ScoreCache::open(&path).unwrap();
        cache.put("alice", 3.0, GradeTable::Decimal.grade(3.0));
        cache.save().unwrap();
        cache.load();
        let first = cache.snapshot();
        cache.load();
        assert_eq!(first, cache.snapshot());
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn corrupt_file_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores_cache.json");
        fs::write(&path, b"{not json").unwrap();
        let cache = ScoreCache::open(&path).unwrap();
        assert!(cache.is_empty());

        fs::write(&path, br#"{"alice": {"score": 1.0, "grade": "Graduate"}}"#).unwrap();
        let cache = ScoreCache::open(&path).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn reads_pair_encoded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores_cache.json");
        fs::write(&path, br#"{"carol": [8.25, "6th to 8th grade"]}"#).unwrap();
        let cache = ScoreCache::open(&path).unwrap();
        let carol = cache.get("carol").unwrap();
        assert_eq!(carol.score, 8.25);
        assert_eq!(carol.grade.table(), GradeTable::Whole);
    }

    #[test]
    fn unusable_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();
        let err = ScoreCache::open(blocker.join("scores_cache.json")).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
