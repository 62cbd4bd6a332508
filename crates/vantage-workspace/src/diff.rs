//! Delta computation between two file sets.

use crate::fileset::{Change, FileSet};

/// Compute the changes that turn `old` into `new`.
///
/// Every path of `new` that is absent from `old` or whose content differs
/// yields [`Change::Modified`]; every path of `old` absent from `new` yields
/// [`Change::Deleted`]. Membership in `new` decides which, so a path never
/// appears twice. Content comparison is exact; timestamps are ignored.
///
/// Runs in `O(|old| + |new|)`. The order of the result is unspecified.
pub fn diff(old: &FileSet, new: &FileSet) -> Vec<Change> {
    let mut changes = Vec::new();

    for (path, record) in new.iter() {
        match old.get(path) {
            Some(previous) if previous.same_content(record) => {}
            _ => changes.push(Change::modified(path, record)),
        }
    }

    for (path, _) in old.iter() {
        if !new.contains(path) {
            changes.push(Change::deleted(path));
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::FileRecord;
    use proptest::prelude::*;

    fn sorted(mut changes: Vec<Change>) -> Vec<Change> {
        changes.sort_by(|a, b| a.path().cmp(b.path()));
        changes
    }

    /// Apply changes to an in-memory file set.
    fn apply(base: &FileSet, changes: &[Change]) -> FileSet {
        let mut out = base.clone();
        for change in changes {
            match change.record() {
                Some(record) => {
                    out.insert(change.path(), record);
                }
                None => {
                    out.remove(change.path());
                }
            }
        }
        out
    }

    fn file_set_strategy() -> impl Strategy<Value = FileSet> {
        prop::collection::hash_map(
            prop::sample::select(vec![
                "settings.yml",
                "landscape.yml",
                "guide.yml",
                "cached_logos/1.svg",
                "cached_logos/2.svg",
                "cached_logos/sub/3.svg",
                "hosted_logos/a.png",
            ]),
            "[a-c]{0,3}",
            0..7,
        )
        .prop_map(|m| {
            m.into_iter()
                .map(|(p, c)| (p.to_string(), FileRecord::text(c)))
                .collect()
        })
    }

    #[test]
    fn test_scenario_modified_and_deleted() {
        let old = FileSet::new()
            .with_text("settings.yml", "S1")
            .with_text("landscape.yml", "L1")
            .with_text("cached_logos/1.svg", "A")
            .with_text("cached_logos/2.svg", "B");
        let new = FileSet::new()
            .with_text("settings.yml", "S2")
            .with_text("landscape.yml", "L1")
            .with_text("cached_logos/2.svg", "B");

        let changes = sorted(diff(&old, &new));

        assert_eq!(
            changes,
            vec![
                Change::deleted("cached_logos/1.svg"),
                Change::modified("settings.yml", &FileRecord::text("S2")),
            ]
        );
    }

    #[test]
    fn test_added_file_is_modified() {
        let old = FileSet::new();
        let new = FileSet::new().with_text("guide.yml", "G");
        assert_eq!(
            diff(&old, &new),
            vec![Change::modified("guide.yml", &FileRecord::text("G"))]
        );
    }

    #[test]
    fn test_encoding_change_is_a_modification() {
        let old = FileSet::new().with_text("hosted_logos/a.png", "AAEC");
        let mut new = FileSet::new();
        new.insert(
            "hosted_logos/a.png",
            FileRecord {
                content: "AAEC".to_string(),
                encoding: crate::Encoding::Base64,
                modified: None,
            },
        );
        assert_eq!(diff(&old, &new).len(), 1);
    }

    #[test]
    fn test_timestamps_do_not_count() {
        let old = FileSet::new().with_text("settings.yml", "S1");
        let mut new = FileSet::new();
        new.insert(
            "settings.yml",
            FileRecord::text("S1").with_modified(chrono::Utc::now()),
        );
        assert!(diff(&old, &new).is_empty());
    }

    proptest! {
        #[test]
        fn prop_diff_with_self_is_empty(x in file_set_strategy()) {
            prop_assert!(diff(&x, &x).is_empty());
        }

        #[test]
        fn prop_diff_is_order_invariant(x in file_set_strategy(), y in file_set_strategy()) {
            let mut x_rev: Vec<_> = x.clone().into_iter().collect();
            x_rev.reverse();
            let x_rev: FileSet = x_rev.into_iter().collect();

            prop_assert_eq!(sorted(diff(&x, &y)), sorted(diff(&x_rev, &y)));
        }

        #[test]
        fn prop_applying_diff_converges(x in file_set_strategy(), y in file_set_strategy()) {
            let changes = diff(&x, &y);
            let result = apply(&x, &changes);
            prop_assert!(diff(&result, &y).is_empty());
            prop_assert_eq!(result.len(), y.len());
        }

        #[test]
        fn prop_no_path_is_both_modified_and_deleted(x in file_set_strategy(), y in file_set_strategy()) {
            let changes = diff(&x, &y);
            let mut paths: Vec<&str> = changes.iter().map(Change::path).collect();
            let total = paths.len();
            paths.sort_unstable();
            paths.dedup();
            prop_assert_eq!(paths.len(), total);
        }
    }
}
