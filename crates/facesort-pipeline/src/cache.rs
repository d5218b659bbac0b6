//! Per-date recognition cache.
//!
//! One JSON document per canonical date maps a file's relative path to the
//! outcome computed for it at a given `(size, mtime)`. The whole document is
//! tied to a params fingerprint; when recognition settings or the reference
//! set change, every entry is dropped before any lookup happens.

use crate::state::{self, StateDir};
use facesort_core::RecognitionOutcome;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

pub const CACHE_VERSION: u32 = 1;

/// Identity of one input file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub date: String,
    pub relative_path: String,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub size: u64,
    pub mtime: i64,
    pub result: RecognitionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateCache {
    pub version: u32,
    pub date: String,
    pub params_fingerprint: String,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl DateCache {
    pub fn empty(date: &str, params_fingerprint: &str) -> Self {
        Self {
            version: CACHE_VERSION,
            date: date.to_string(),
            params_fingerprint: params_fingerprint.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Reset wholesale if the stored fingerprint differs from `fingerprint`.
    pub fn normalize(mut self, fingerprint: &str) -> Self {
        if self.params_fingerprint != fingerprint {
            if !self.entries.is_empty() {
                tracing::info!(
                    date = %self.date,
                    dropped = self.entries.len(),
                    "recognition settings changed; discarding cached outcomes"
                );
            }
            self.entries.clear();
            self.params_fingerprint = fingerprint.to_string();
        }
        self
    }

    /// Cached outcome for `key`, if size and mtime still match.
    pub fn lookup(&self, key: &CacheKey) -> Option<&RecognitionOutcome> {
        self.entries
            .get(&key.relative_path)
            .filter(|e| e.size == key.size && e.mtime == key.mtime)
            .map(|e| &e.result)
    }

    pub fn store(&mut self, key: &CacheKey, outcome: RecognitionOutcome) {
        debug_assert_eq!(key.date, self.date);
        self.entries.insert(
            key.relative_path.clone(),
            CacheEntry {
                size: key.size,
                mtime: key.mtime,
                result: outcome,
            },
        );
    }

    /// Drop entries for files that no longer exist. Returns how many were dropped.
    pub fn prune(&mut self, live_paths: &BTreeSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| live_paths.contains(path));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// On-disk home of the per-date caches.
#[derive(Debug, Clone)]
pub struct RecognitionCache {
    state: StateDir,
}

impl RecognitionCache {
    pub fn new(state: StateDir) -> Self {
        Self { state }
    }

    /// Load the cache for `date`. Missing, corrupt, foreign-version or
    /// mislabelled documents yield an empty cache.
    pub fn load(&self, date: &str) -> DateCache {
        let path = self.state.cache_path(date);
        match state::read_json_lenient::<DateCache>(&path) {
            Some(cache) if cache.version == CACHE_VERSION && cache.date == date => cache,
            Some(cache) => {
                tracing::warn!(
                    date,
                    version = cache.version,
                    stored_date = %cache.date,
                    "ignoring incompatible cache file"
                );
                DateCache::empty(date, "")
            }
            None => DateCache::empty(date, ""),
        }
    }

    /// Write via temp file + rename.
    pub fn save_atomic(&self, cache: &DateCache) -> io::Result<()> {
        state::write_json_atomic(&self.state.cache_path(&cache.date), cache)
    }

    /// Delete the cache file for a date that no longer exists in the input.
    pub fn remove(&self, date: &str) -> io::Result<bool> {
        match fs::remove_file(self.state.cache_path(date)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Deterministic hash over everything that affects a recognition outcome.
///
/// Keys are serialized in sorted order so the result does not depend on
/// field declaration order.
pub fn params_fingerprint(
    backend_id: &str,
    tolerance: f32,
    min_face_size: u32,
    reference_fingerprint: &str,
) -> String {
    let mut params: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    params.insert("backend", backend_id.into());
    params.insert("min_face_size", min_face_size.into());
    params.insert("reference_fingerprint", reference_fingerprint.into());
    params.insert("tolerance", tolerance.into());

    let canonical = serde_json::to_vec(&params).unwrap_or_default();
    format!("{:x}", Sha256::digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, size: u64, mtime: i64) -> CacheKey {
        CacheKey {
            date: "2025-12-21".into(),
            relative_path: path.into(),
            size,
            mtime,
        }
    }

    #[test]
    fn test_lookup_requires_same_size_and_mtime() {
        let mut cache = DateCache::empty("2025-12-21", "fp");
        cache.store(&key("a.jpg", 10, 100), RecognitionOutcome::no_face());

        assert_eq!(cache.lookup(&key("a.jpg", 10, 100)), Some(&RecognitionOutcome::no_face()));
        assert!(cache.lookup(&key("a.jpg", 10, 101)).is_none());
        assert!(cache.lookup(&key("a.jpg", 11, 100)).is_none());
        assert!(cache.lookup(&key("b.jpg", 10, 100)).is_none());
    }

    #[test]
    fn test_normalize_resets_on_fingerprint_mismatch() {
        let mut cache = DateCache::empty("2025-12-21", "old");
        cache.store(&key("a.jpg", 1, 1), RecognitionOutcome::no_face());

        let same = cache.clone().normalize("old");
        assert_eq!(same.len(), 1);

        let reset = cache.normalize("new");
        assert!(reset.is_empty());
        assert_eq!(reset.params_fingerprint, "new");
    }

    #[test]
    fn test_prune_drops_dead_entries() {
        let mut cache = DateCache::empty("2025-12-21", "fp");
        cache.store(&key("a.jpg", 1, 1), RecognitionOutcome::no_face());
        cache.store(&key("b.jpg", 1, 1), RecognitionOutcome::no_face());
        let live: BTreeSet<String> = ["b.jpg".to_string()].into_iter().collect();
        assert_eq!(cache.prune(&live), 1);
        assert!(cache.entries.contains_key("b.jpg"));
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecognitionCache::new(StateDir::new(dir.path()));

        let mut cache = DateCache::empty("2025-12-21", "fp");
        cache.store(
            &key("a.jpg", 1, 1),
            RecognitionOutcome::no_match(1, vec![vec![0.25, 0.5].into()]),
        );
        store.save_atomic(&cache).unwrap();

        let loaded = store.load("2025-12-21");
        assert_eq!(loaded, cache);
        assert!(store.remove("2025-12-21").unwrap());
        assert!(!store.remove("2025-12-21").unwrap());
        assert!(store.load("2025-12-21").is_empty());
    }

    #[test]
    fn test_corrupt_or_mislabelled_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        let store = RecognitionCache::new(state.clone());

        fs::create_dir_all(state.cache_dir()).unwrap();
        fs::write(state.cache_path("2025-12-21"), b"[1, 2").unwrap();
        assert!(store.load("2025-12-21").is_empty());

        let mut other = DateCache::empty("2025-12-22", "fp");
        other.store(
            &CacheKey { date: "2025-12-22".into(), relative_path: "a.jpg".into(), size: 1, mtime: 1 },
            RecognitionOutcome::no_face(),
        );
        state::write_json_atomic(&state.cache_path("2025-12-21"), &other).unwrap();
        assert!(store.load("2025-12-21").is_empty());
    }

    #[test]
    fn test_params_fingerprint_sensitivity() {
        let base = params_fingerprint("cmd", 0.6, 20, "refs");
        assert_eq!(base, params_fingerprint("cmd", 0.6, 20, "refs"));
        assert_ne!(base, params_fingerprint("cmd", 0.5, 20, "refs"));
        assert_ne!(base, params_fingerprint("cmd", 0.6, 40, "refs"));
        assert_ne!(base, params_fingerprint("cmd", 0.6, 20, "refs2"));
        assert_ne!(base, params_fingerprint("other", 0.6, 20, "refs"));
    }
}
