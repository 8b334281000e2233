//! Asset listing comparison.

use std::collections::{HashMap, HashSet};

use fragmentsync_shared::AssetRecord;

/// How two asset listings differ, by asset path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssetDiff {
    /// Paths present only in the new listing.
    pub added: Vec<String>,
    /// Paths whose modification time, size or type changed.
    pub modified: Vec<String>,
    /// Paths present only in the previous listing.
    pub removed: Vec<String>,
}

impl AssetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of paths that changed in any way.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Compare a previous listing with a new one.
///
/// A diff can be empty even when the lists are unequal, e.g. when only the
/// order of entries changed.
pub fn diff_assets(previous: &[AssetRecord], current: &[AssetRecord]) -> AssetDiff {
    let previous_by_path: HashMap<&str, &AssetRecord> =
        previous.iter().map(|a| (a.path.as_str(), a)).collect();
    let current_paths: HashSet<&str> = current.iter().map(|a| a.path.as_str()).collect();

    let mut diff = AssetDiff::default();

    for asset in current {
        match previous_by_path.get(asset.path.as_str()) {
            Some(old) if *old == asset => {}
            Some(_) => diff.modified.push(asset.path.clone()),
            None => diff.added.push(asset.path.clone()),
        }
    }

    for old in previous {
        if !current_paths.contains(old.path.as_str()) {
            diff.removed.push(old.path.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragmentsync_shared::AssetType;

    fn asset(path: &str, modified: i64) -> AssetRecord {
        AssetRecord {
            path: path.into(),
            asset_type: AssetType::Html,
            last_modified: modified,
            size: 100,
        }
    }

    #[test]
    fn diff_detects_added() {
        let diff = diff_assets(&[asset("hero.html", 1)], &[asset("hero.html", 1), asset("faq.html", 2)]);
        assert_eq!(diff.added, vec!["faq.html"]);
        assert!(diff.modified.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn diff_detects_modified_and_removed() {
        let diff = diff_assets(
            &[asset("hero.html", 1), asset("old.css", 1)],
            &[asset("hero.html", 5)],
        );
        assert_eq!(diff.modified, vec!["hero.html"]);
        assert_eq!(diff.removed, vec!["old.css"]);
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn diff_identical_is_empty() {
        let list = [asset("a.html", 1), asset("b.js", 2)];
        assert!(diff_assets(&list, &list).is_empty());
    }

    #[test]
    fn diff_ignores_order() {
        let diff = diff_assets(
            &[asset("a.html", 1), asset("b.js", 2)],
            &[asset("b.js", 2), asset("a.html", 1)],
        );
        assert!(diff.is_empty());
    }
}
