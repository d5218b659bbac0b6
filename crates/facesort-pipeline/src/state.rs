//! Hidden state area inside the output root.
//!
//! Layout:
//!   <output>/.facesort/snapshot.json
//!   <output>/.facesort/cache/<YYYY-MM-DD>.json

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".facesort";
const SNAPSHOT_FILE: &str = "snapshot.json";
const CACHE_DIR: &str = "cache";

/// Paths of the persisted state for one output root.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(output_root: &Path) -> Self {
        Self {
            root: output_root.join(STATE_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn cache_path(&self, date: &str) -> PathBuf {
        self.cache_dir().join(format!("{date}.json"))
    }
}

/// Serialize to `<path>.tmp`, fsync, then rename over `path`.
///
/// A crash mid-write leaves either the old document or the new one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    drop(f);

    #[cfg(windows)]
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::rename(&tmp, path)
}

/// Read a JSON document, treating a missing or unparsable file as absent.
///
/// Corruption is logged and never fails the run.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state file unreadable; treating as absent");
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state file corrupt; treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("a", 1);
        write_json_atomic(&path, &doc).unwrap();
        doc.insert("b", 2);
        write_json_atomic(&path, &doc).unwrap();

        let back: BTreeMap<String, i32> = read_json_lenient(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_lenient_read_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        assert!(read_json_lenient::<BTreeMap<String, i32>>(&path).is_none());

        fs::write(&path, b"{ truncated").unwrap();
        assert!(read_json_lenient::<BTreeMap<String, i32>>(&path).is_none());
    }

    #[test]
    fn test_layout() {
        let state = StateDir::new(Path::new("/out"));
        assert_eq!(state.snapshot_path(), Path::new("/out/.facesort/snapshot.json"));
        assert_eq!(state.cache_path("2025-12-21"), Path::new("/out/.facesort/cache/2025-12-21.json"));
    }
}
