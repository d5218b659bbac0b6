//! Keeps every computed output path inside the output root.
//!
//! Untrusted names (person names, cluster labels, source file names) are
//! only ever joined one plain segment at a time, and anything about to be
//! written or deleted is re-checked after symlink resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathSafetyError {
    #[error("empty path segment")]
    EmptySegment,
    #[error("path segment {0:?} is not a plain name")]
    InvalidSegment(String),
    #[error("{path} escapes output root {root}")]
    Escape { path: String, root: String },
    #[error("io while resolving {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Output root with traversal-proof path construction.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// The root must already exist; it is stored in canonical form.
    pub fn new(root: &Path) -> Result<Self, PathSafetyError> {
        let root = fs::canonicalize(root).map_err(|source| PathSafetyError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join untrusted segments under the root.
    ///
    /// Each segment must be a single normal path component. The result is
    /// also checked against symlinks already present on disk.
    pub fn join(&self, segments: &[&str]) -> Result<PathBuf, PathSafetyError> {
        let mut path = self.root.clone();
        for segment in segments {
            validate_segment(segment)?;
            path.push(segment);
        }
        self.verify_resolved(&path)
    }

    /// Resolve symlinks along `path` and confirm it is still under the root.
    ///
    /// Components that do not exist yet are appended to the canonical form of
    /// the deepest existing ancestor. Returns the resolved path.
    pub fn verify_resolved(&self, path: &Path) -> Result<PathBuf, PathSafetyError> {
        let mut existing = path.to_path_buf();
        let mut missing: Vec<std::ffi::OsString> = Vec::new();

        // symlink_metadata so a dangling link counts as existing and then
        // fails to canonicalize below.
        while fs::symlink_metadata(&existing).is_err() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    missing.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Err(self.escape(path)),
            }
        }

        let mut resolved = fs::canonicalize(&existing).map_err(|source| PathSafetyError::Io {
            path: existing.display().to_string(),
            source,
        })?;
        for name in missing.iter().rev() {
            resolved.push(name);
        }

        if !resolved.starts_with(&self.root) {
            return Err(self.escape(path));
        }
        Ok(resolved)
    }

    fn escape(&self, path: &Path) -> PathSafetyError {
        PathSafetyError::Escape {
            path: path.display().to_string(),
            root: self.root.display().to_string(),
        }
    }
}

/// A segment must be exactly one normal component with no separators.
pub fn validate_segment(segment: &str) -> Result<(), PathSafetyError> {
    if segment.is_empty() {
        return Err(PathSafetyError::EmptySegment);
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(PathSafetyError::InvalidSegment(segment.to_string()));
    }
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PathSafetyError::InvalidSegment(segment.to_string())),
    }
}
