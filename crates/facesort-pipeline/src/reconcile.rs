//! Output tree reconciliation.
//!
//! Before a date is re-filed (or after it disappeared from the input), its
//! subtree is removed from every top-level category: person folders, the
//! unmatched bucket and the cluster folders inside it. Filing copies each
//! source into place without ever overwriting, and a failed filing
//! operation removes everything it had already copied.

use crate::error::PipelineError;
use crate::path_guard::{self, PathGuard};
use crate::state::STATE_DIR_NAME;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on `name_<n>.ext` attempts before giving up.
const MAX_COLLISION_SUFFIX: usize = 10_000;

/// One copy to perform: `source` into `<dir_segments...>/<file_name>`.
#[derive(Debug, Clone)]
pub struct Placement {
    pub source: PathBuf,
    /// Untrusted segments below the output root, e.g. `[person, date]`.
    pub dir_segments: Vec<String>,
    pub file_name: String,
}

pub struct OutputReconciler {
    guard: PathGuard,
    unmatched_bucket: String,
}

impl OutputReconciler {
    pub fn new(guard: PathGuard, unmatched_bucket: &str) -> Self {
        Self {
            guard,
            unmatched_bucket: unmatched_bucket.to_string(),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Remove every output artifact for `dates`. Returns the number of
    /// date subtrees removed.
    pub fn remove_dates(&self, dates: &BTreeSet<String>) -> Result<usize, PipelineError> {
        if dates.is_empty() {
            return Ok(0);
        }

        let mut containers = Vec::new();
        for category in self.categories()? {
            let is_bucket = category.file_name().is_some_and(|n| n == self.unmatched_bucket.as_str());
            containers.push(category.clone());
            if is_bucket {
                // Cluster folders are only trusted after the bucket itself resolves inside the root.
                let bucket = self.guard.verify_resolved(&category)?;
                containers.extend(list_dir(&bucket)?);
            }
        }

        let mut removed = 0;
        for container in &containers {
            for date in dates {
                if self.remove_entry(&container.join(date))? {
                    removed += 1;
                }
            }
        }

        // Folders whose last date just went away, children before parents.
        for container in containers.iter().rev() {
            if fs::symlink_metadata(container).is_ok_and(|m| m.is_dir()) && is_empty_dir(container) {
                self.guard.verify_resolved(container)?;
                let _ = fs::remove_dir(container);
            }
        }

        tracing::info!(dates = dates.len(), removed, "stale output removed");
        Ok(removed)
    }

    /// Copy every placement as a single operation. On failure, files copied
    /// so far are deleted before the error is returned.
    pub fn file_all(&self, placements: &[Placement]) -> Result<Vec<PathBuf>, PipelineError> {
        let mut tx = FilingTransaction::new(&self.guard);
        for placement in placements {
            let segments: Vec<&str> = placement.dir_segments.iter().map(String::as_str).collect();
            if let Err(e) = tx.copy(&placement.source, &segments, &placement.file_name) {
                let rolled_back = tx.rollback();
                tracing::error!(error = %e, rolled_back, "filing failed; copied files rolled back");
                return Err(e);
            }
        }
        Ok(tx.commit())
    }

    /// Top-level entries of the output root, excluding the state area.
    fn categories(&self) -> Result<Vec<PathBuf>, PipelineError> {
        Ok(list_dir(self.guard.root())?
            .into_iter()
            .filter(|p| p.file_name().is_some_and(|n| n != STATE_DIR_NAME))
            .collect())
    }

    /// Delete `path` if present, after confirming it resolves inside the root.
    fn remove_entry(&self, path: &Path) -> Result<bool, PipelineError> {
        let Ok(meta) = fs::symlink_metadata(path) else {
            return Ok(false);
        };

        if meta.file_type().is_symlink() {
            // Remove the link itself; its parent must be inside the root.
            if let Some(parent) = path.parent() {
                self.guard.verify_resolved(parent)?;
            }
            fs::remove_file(path)?;
        } else {
            let resolved = self.guard.verify_resolved(path)?;
            if meta.is_dir() {
                fs::remove_dir_all(&resolved)?;
            } else {
                fs::remove_file(&resolved)?;
            }
        }
        tracing::debug!(path = %path.display(), "removed");
        Ok(true)
    }
}

/// Copies performed so far in one filing operation.
///
/// Dropped without `commit`, it deletes what it copied.
pub struct FilingTransaction<'a> {
    guard: &'a PathGuard,
    copied: Vec<PathBuf>,
    committed: bool,
}

impl<'a> FilingTransaction<'a> {
    pub fn new(guard: &'a PathGuard) -> Self {
        Self {
            guard,
            copied: Vec::new(),
            committed: false,
        }
    }

    /// Copy `source` to `<root>/<dir_segments>/<file_name>`, appending a
    /// numeric suffix instead of overwriting an existing file.
    pub fn copy(&mut self, source: &Path, dir_segments: &[&str], file_name: &str) -> Result<PathBuf, PipelineError> {
        path_guard::validate_segment(file_name)?;
        let dir = self.guard.join(dir_segments)?;
        fs::create_dir_all(&dir).map_err(|error| PipelineError::Filing {
            source_path: source.display().to_string(),
            destination: dir.display().to_string(),
            error,
        })?;
        let dir = self.guard.verify_resolved(&dir)?;

        let filing_error = |destination: &Path, error: io::Error| PipelineError::Filing {
            source_path: source.display().to_string(),
            destination: destination.display().to_string(),
            error,
        };

        let mut reader = fs::File::open(source).map_err(|e| filing_error(&dir, e))?;

        let (destination, mut writer) = (0..MAX_COLLISION_SUFFIX)
            .map(|n| dir.join(suffixed_name(file_name, n)))
            .find_map(|candidate| {
                match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                    Ok(f) => Some(Ok((candidate, f))),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => None,
                    Err(e) => Some(Err(filing_error(&candidate, e))),
                }
            })
            .unwrap_or_else(|| {
                Err(filing_error(
                    &dir.join(file_name),
                    io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
                ))
            })?;

        // Tracked before any bytes are written so a partial copy is rolled back too.
        self.copied.push(destination.clone());
        io::copy(&mut reader, &mut writer).map_err(|e| filing_error(&destination, e))?;
        Ok(destination)
    }

    pub fn copied(&self) -> &[PathBuf] {
        &self.copied
    }

    /// Delete every file copied so far. Returns how many were removed.
    pub fn rollback(&mut self) -> usize {
        let mut removed = 0;
        for path in self.copied.drain(..).rev() {
            match self.guard.verify_resolved(&path) {
                Ok(resolved) => match fs::remove_file(&resolved) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "rollback could not remove file"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "rollback skipped unsafe path"),
            }
        }
        removed
    }

    pub fn commit(mut self) -> Vec<PathBuf> {
        self.committed = true;
        std::mem::take(&mut self.copied)
    }
}

impl Drop for FilingTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.copied.is_empty() {
            self.rollback();
        }
    }
}

/// `photo.jpg`, `photo_1.jpg`, `photo_2.jpg`, ...
fn suffixed_name(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    }
}

/// Subdirectories (or links to them) of `dir`, sorted.
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() || file_type.is_symlink() {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(false)
}
