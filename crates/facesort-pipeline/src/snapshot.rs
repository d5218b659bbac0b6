//! Snapshot of the date-partitioned input tree.
//!
//! A snapshot records `(relative_path, size, mtime)` for every supported,
//! non-empty image, grouped by canonical date. It is rebuilt from disk on
//! every run and compared structurally against the previous one.

use crate::dates;
use crate::error::PipelineError;
use crate::state::{self, StateDir};
use chrono::{DateTime, NaiveDate, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

pub const SNAPSHOT_VERSION: u32 = 1;

/// OS-generated entries that are never photos.
const IGNORED_NAMES: &[&str] = &["thumbs.db", "desktop.ini", "__macosx", "$recycle.bin"];

const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::Gif,
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative to the date folder, `/`-separated. Files from a non-canonical
    /// spelling of the date folder are prefixed with that folder's token; a
    /// path already taken in the bucket gets a `~<n>` suffix on its folder.
    pub path: String,
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateBucket {
    /// Physical folder names (relative to the input root) that map to this date.
    pub source_dirs: BTreeSet<String>,
    /// Sorted by path.
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    /// Recognition parameters the persisted output was produced with.
    #[serde(default)]
    pub params_fingerprint: String,
    pub dates: BTreeMap<String, DateBucket>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            params_fingerprint: String::new(),
            dates: BTreeMap::new(),
        }
    }

    pub fn with_params_fingerprint(mut self, fingerprint: &str) -> Self {
        self.params_fingerprint = fingerprint.to_string();
        self
    }

    pub fn file_count(&self) -> usize {
        self.dates.values().map(|b| b.files.len()).sum()
    }
}

/// A snapshot plus where each entry lives on disk.
#[derive(Debug, Clone)]
pub struct InputScan {
    pub snapshot: Snapshot,
    /// date -> relative path -> absolute source file.
    pub locations: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

impl InputScan {
    pub fn source_of(&self, date: &str, relative_path: &str) -> Option<&Path> {
        self.locations
            .get(date)
            .and_then(|files| files.get(relative_path))
            .map(PathBuf::as_path)
    }
}

/// Build the snapshot for `input_root`.
pub fn build(input_root: &Path) -> Result<Snapshot, PipelineError> {
    scan_input(input_root).map(|scan| scan.snapshot)
}

/// Walk the input tree and collect every date folder's images.
///
/// Only an unreadable input root is an error; unreadable subtrees are
/// skipped with a warning.
pub fn scan_input(input_root: &Path) -> Result<InputScan, PipelineError> {
    let mut builder = ScanBuilder::default();

    for (name, path) in sorted_subdirs(input_root).map_err(|source| PipelineError::InputRoot {
        path: input_root.display().to_string(),
        source,
    })? {
        if let Some(date) = dates::parse_date_folder(&name) {
            builder.add_date_dir(date, &name, &path);
        } else if let Some(year) = dates::parse_year_folder(&name) {
            builder.add_year_dir(year, &name, &path);
        } else if let Some((year, month)) = dates::parse_year_month_folder(&name) {
            builder.add_month_dir(year, month, &name, &path);
        } else {
            tracing::debug!(folder = %name, "skipping folder without a recognisable date");
        }
    }

    let scan = builder.finish();
    tracing::info!(
        root = %input_root.display(),
        dates = scan.snapshot.dates.len(),
        files = scan.snapshot.file_count(),
        "input snapshot built"
    );
    Ok(scan)
}

#[derive(Default)]
struct ScanBuilder {
    buckets: BTreeMap<String, DateBucket>,
    locations: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

impl ScanBuilder {
    fn add_year_dir(&mut self, year: i32, name: &str, path: &Path) {
        for (child, child_path) in subdirs_or_warn(path) {
            let token = format!("{name}/{child}");
            if let Some(date) = dates::parse_date_folder(&child) {
                self.add_date_dir(date, &token, &child_path);
            } else if let Some(month) = dates::parse_month_folder(&child) {
                self.add_month_dir(year, month, &token, &child_path);
            }
        }
    }

    fn add_month_dir(&mut self, year: i32, month: u32, name: &str, path: &Path) {
        for (child, child_path) in subdirs_or_warn(path) {
            let date = dates::parse_day_folder(&child)
                .and_then(|day| NaiveDate::from_ymd_opt(year, month, day));
            if let Some(date) = date {
                self.add_date_dir(date, &format!("{name}/{child}"), &child_path);
            }
        }
    }

    fn add_date_dir(&mut self, date: NaiveDate, source_dir: &str, path: &Path) {
        let key = dates::canonical_key(date);
        // Files from the canonical spelling keep plain relative paths; any
        // other spelling is namespaced so same-day folders cannot collide.
        let prefix = (source_dir != key).then(|| source_dir.replace('/', "_"));

        let bucket = self.buckets.entry(key.clone()).or_default();
        bucket.source_dirs.insert(source_dir.to_string());
        let locations = self.locations.entry(key.clone()).or_default();

        let walker = WalkDir::new(path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(date = %key, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping file without metadata");
                    continue;
                }
            };
            if metadata.len() == 0 {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(path) else {
                continue;
            };
            let mut relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if let Some(prefix) = &prefix {
                relative = format!("{prefix}/{relative}");
            }

            if locations.contains_key(&relative) {
                let renamed = disambiguate(&relative, |candidate| locations.contains_key(candidate));
                tracing::debug!(date = %key, path = %relative, %renamed, "relative path already taken");
                relative = renamed;
            }

            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            bucket.files.push(FileEntry {
                path: relative.clone(),
                size: metadata.len(),
                mtime,
            });
            locations.insert(relative, entry.path().to_path_buf());
        }
    }

    fn finish(mut self) -> InputScan {
        for bucket in self.buckets.values_mut() {
            bucket.files.sort();
        }
        InputScan {
            snapshot: Snapshot {
                version: SNAPSHOT_VERSION,
                generated_at: Utc::now(),
                params_fingerprint: String::new(),
                dates: self.buckets,
            },
            locations: self.locations,
        }
    }
}

/// `dir/file` -> `dir~1/file`, `dir~2/file`, ...: the first one not `taken`.
fn disambiguate(relative: &str, taken: impl Fn(&str) -> bool) -> String {
    let (dir, file) = relative.rsplit_once('/').unwrap_or(("", relative));
    (1u32..)
        .map(|n| format!("{dir}~{n}/{file}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| relative.to_string())
}

/// Hidden files, AppleDouble `._*` files and OS sidecars.
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || IGNORED_NAMES.contains(&name.to_lowercase().as_str())
}

pub fn is_supported_image(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| SUPPORTED_FORMATS.contains(&format))
        .unwrap_or(false)
}

/// Non-hidden subdirectories, sorted by name.
fn sorted_subdirs(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored_name(&name) {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push((name, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn subdirs_or_warn(dir: &Path) -> Vec<(String, PathBuf)> {
    sorted_subdirs(dir).unwrap_or_else(|e| {
        tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable folder");
        Vec::new()
    })
}

/// Load the previous snapshot; missing, corrupt or foreign-version files count as absent.
pub fn load(state: &StateDir) -> Option<Snapshot> {
    let snapshot: Snapshot = state::read_json_lenient(&state.snapshot_path())?;
    if snapshot.version != SNAPSHOT_VERSION {
        tracing::warn!(version = snapshot.version, "ignoring snapshot with unknown version");
        return None;
    }
    Some(snapshot)
}

pub fn save(state: &StateDir, snapshot: &Snapshot) -> std::io::Result<()> {
    state::write_json_atomic(&state.snapshot_path(), snapshot)
}
