//! Incremental planning: which dates changed, which disappeared.

use crate::snapshot::Snapshot;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct IncrementalPlan {
    /// Dates that are new or whose bucket differs structurally.
    pub changed_dates: BTreeSet<String>,
    /// Dates present in the previous snapshot but absent now.
    pub deleted_dates: BTreeSet<String>,
    pub snapshot: Snapshot,
}

impl IncrementalPlan {
    pub fn is_noop(&self) -> bool {
        self.changed_dates.is_empty() && self.deleted_dates.is_empty()
    }

    /// Changed and deleted dates together: everything whose output must be rebuilt.
    pub fn affected_dates(&self) -> BTreeSet<String> {
        self.changed_dates.union(&self.deleted_dates).cloned().collect()
    }

    /// Number of files under changed dates.
    pub fn changed_file_count(&self) -> usize {
        self.changed_dates
            .iter()
            .filter_map(|d| self.snapshot.dates.get(d))
            .map(|b| b.files.len())
            .sum()
    }
}

/// Diff `previous` against `current`. Pure and total.
///
/// A date is unchanged only if its whole bucket (source folders and every
/// file's path, size and mtime) is identical and both snapshots carry the
/// same recognition parameters. A parameter change marks every date changed.
pub fn diff(previous: Option<&Snapshot>, current: Snapshot) -> IncrementalPlan {
    let Some(previous) = previous else {
        return IncrementalPlan {
            changed_dates: current.dates.keys().cloned().collect(),
            deleted_dates: BTreeSet::new(),
            snapshot: current,
        };
    };

    let params_changed = previous.params_fingerprint != current.params_fingerprint;
    let changed_dates = current
        .dates
        .iter()
        .filter(|(date, bucket)| params_changed || previous.dates.get(*date) != Some(*bucket))
        .map(|(date, _)| date.clone())
        .collect();

    let deleted_dates = previous
        .dates
        .keys()
        .filter(|date| !current.dates.contains_key(*date))
        .cloned()
        .collect();

    IncrementalPlan {
        changed_dates,
        deleted_dates,
        snapshot: current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DateBucket, FileEntry};

    fn snapshot(dates: &[(&str, Vec<(&str, u64, i64)>)]) -> Snapshot {
        let mut snap = Snapshot::empty();
        for (date, files) in dates {
            let bucket = DateBucket {
                source_dirs: [date.to_string()].into_iter().collect(),
                files: files
                    .iter()
                    .map(|(p, size, mtime)| FileEntry { path: p.to_string(), size: *size, mtime: *mtime })
                    .collect(),
            };
            snap.dates.insert(date.to_string(), bucket);
        }
        snap
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_run_everything_changed() {
        let current = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 1)]), ("2025-12-22", vec![])]);
        let plan = diff(None, current);
        assert_eq!(plan.changed_dates, set(&["2025-12-21", "2025-12-22"]));
        assert!(plan.deleted_dates.is_empty());
    }

    #[test]
    fn test_one_added_file_changes_one_date() {
        let prev = snapshot(&[
            ("2025-12-21", vec![("a.jpg", 1, 1)]),
            ("2025-12-22", vec![("b.jpg", 2, 2)]),
        ]);
        let current = snapshot(&[
            ("2025-12-21", vec![("a.jpg", 1, 1)]),
            ("2025-12-22", vec![("b.jpg", 2, 2), ("c.jpg", 3, 3)]),
        ]);
        let plan = diff(Some(&prev), current);
        assert_eq!(plan.changed_dates, set(&["2025-12-22"]));
        assert!(plan.deleted_dates.is_empty());
        assert_eq!(plan.changed_file_count(), 2);
    }

    #[test]
    fn test_mtime_or_size_change_detected() {
        let prev = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 1)])]);
        let touched = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 2)])]);
        assert_eq!(diff(Some(&prev), touched).changed_dates, set(&["2025-12-21"]));
        let resized = snapshot(&[("2025-12-21", vec![("a.jpg", 9, 1)])]);
        assert_eq!(diff(Some(&prev), resized).changed_dates, set(&["2025-12-21"]));
    }

    #[test]
    fn test_deleted_date() {
        let prev = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 1)]), ("2025-12-22", vec![])]);
        let current = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 1)])]);
        let plan = diff(Some(&prev), current);
        assert!(plan.changed_dates.is_empty());
        assert_eq!(plan.deleted_dates, set(&["2025-12-22"]));
        assert_eq!(plan.affected_dates(), set(&["2025-12-22"]));
    }

    #[test]
    fn test_identical_snapshots_are_noop_despite_timestamp() {
        let prev = snapshot(&[("2025-12-21", vec![("a.jpg", 1, 1)])]);
        let mut current = prev.clone();
        current.generated_at = current.generated_at + chrono::Duration::seconds(60);
        assert!(diff(Some(&prev), current).is_noop());
    }

    #[test]
    fn test_params_change_marks_every_date() {
        let files = || {
            snapshot(&[
                ("2025-12-21", vec![("a.jpg", 1, 1)]),
                ("2025-12-22", vec![("b.jpg", 2, 2)]),
            ])
        };
        let prev = files().with_params_fingerprint("old");

        let same = diff(Some(&prev), files().with_params_fingerprint("old"));
        assert!(same.is_noop());

        let plan = diff(Some(&prev), files().with_params_fingerprint("new"));
        assert_eq!(plan.changed_dates, set(&["2025-12-21", "2025-12-22"]));
        assert!(plan.deleted_dates.is_empty());
    }

    #[test]
    fn test_empty_snapshots() {
        let plan = diff(Some(&Snapshot::empty()), Snapshot::empty());
        assert!(plan.is_noop());
        assert!(diff(None, Snapshot::empty()).is_noop());
    }
}
