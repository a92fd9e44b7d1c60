//! Enumeration of the existing revisions of a workspace file.
//!
//! [`HistoryIndex`] asks a [`RevisionEnumerator`] for every file matching a
//! [`RevisionPattern`], drops anything whose stamp does not decode, and sorts
//! the rest by capture time. The ordering does not rely on the enumerator:
//! entries are re-sorted by their parsed stamp.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, trace};

use crate::codec::{HistoryLayout, RevisionPattern, RevisionStamp};

/// One revision file of a workspace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    /// Absolute path of the revision file.
    pub path: PathBuf,
    /// Capture instant decoded from the file name.
    #[serde(serialize_with = "serialize_stamp")]
    pub stamp: RevisionStamp,
}

fn serialize_stamp<S: serde::Serializer>(
    stamp: &RevisionStamp,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&stamp.naive().format("%Y-%m-%dT%H:%M:%S"))
}

/// How many revisions to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// Every revision.
    #[default]
    Unlimited,
    /// Only the most recent `n` revisions.
    Latest(usize),
}

impl Limit {
    /// Maps a `maxDisplay`-style setting to a limit, treating 0 as no cap.
    #[must_use]
    pub fn from_max(max: usize) -> Self {
        if max == 0 {
            Self::Unlimited
        } else {
            Self::Latest(max)
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Latest(n) => write!(f, "{n}"),
        }
    }
}

/// Source of candidate revision files for a pattern.
///
/// Implementations may return paths in any order and may include files that do
/// not decode; [`HistoryIndex`] filters and sorts.
pub trait RevisionEnumerator: Send + Sync {
    /// Returns the files matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern directory exists but cannot be read.
    fn enumerate(&self, pattern: &RevisionPattern) -> io::Result<Vec<PathBuf>>;
}

/// Enumerates revisions by listing the pattern directory on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEnumerator;

impl RevisionEnumerator for FsEnumerator {
    fn enumerate(&self, pattern: &RevisionPattern) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&pattern.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if pattern.match_file_name(name).is_some() {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Lists the revisions of workspace files in chronological order.
pub struct HistoryIndex {
    layout: HistoryLayout,
    enumerator: Box<dyn RevisionEnumerator>,
}

impl fmt::Debug for HistoryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryIndex")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl HistoryIndex {
    /// Creates an index over `layout` using `enumerator` to find candidates.
    pub fn new(layout: HistoryLayout, enumerator: Box<dyn RevisionEnumerator>) -> Self {
        Self { layout, enumerator }
    }

    /// Returns the layout this index resolves paths with.
    #[must_use]
    pub fn layout(&self) -> &HistoryLayout {
        &self.layout
    }

    /// Lists the revisions of a workspace-relative file, oldest first.
    ///
    /// With [`Limit::Latest`] only the newest entries are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the enumerator fails. A file name that cannot be
    /// encoded yields an empty list.
    pub fn list_revisions(&self, relative: &Path, limit: Limit) -> io::Result<Vec<Revision>> {
        match self.layout.pattern(relative) {
            Ok(pattern) => self.list_matching(&pattern, limit),
            Err(e) => {
                debug!(path = %relative.display(), error = %e, "No revision pattern for file");
                Ok(Vec::new())
            }
        }
    }

    /// Lists the revisions matching an already-built pattern, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the enumerator fails.
    pub fn list_matching(&self, pattern: &RevisionPattern, limit: Limit) -> io::Result<Vec<Revision>> {
        let candidates = self.enumerator.enumerate(pattern)?;

        let mut revisions: Vec<Revision> = candidates
            .into_iter()
            .filter_map(|path| {
                let stamp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| pattern.match_file_name(n));
                match stamp {
                    Some(stamp) => Some(Revision { path, stamp }),
                    None => {
                        trace!(path = %path.display(), "Skipping malformed history entry");
                        None
                    }
                }
            })
            .collect();

        revisions.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.path.cmp(&b.path)));

        if let Limit::Latest(n) = limit {
            let skip = revisions.len().saturating_sub(n);
            revisions.drain(..skip);
        }

        trace!(
            pattern = %pattern.glob().display(),
            count = revisions.len(),
            limit = %limit,
            "Listed revisions"
        );

        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Suffix;
    use chrono::NaiveDate;

    fn stamp(h: u32, m: u32, s: u32) -> RevisionStamp {
        RevisionStamp::new(
            NaiveDate::from_ymd_opt(2023, 6, 1)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
        )
    }

    /// Returns a fixed set of paths regardless of pattern, in the given order.
    struct StaticEnumerator(Vec<PathBuf>);

    impl RevisionEnumerator for StaticEnumerator {
        fn enumerate(&self, _pattern: &RevisionPattern) -> io::Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    fn layout() -> HistoryLayout {
        HistoryLayout::new("/proj", "/proj/.history")
    }

    #[test]
    fn sorts_by_stamp_even_if_enumerator_does_not() {
        let layout = layout();
        let rel = Path::new("src/a.ts");
        let t1 = layout.encode(rel, Suffix::At(stamp(9, 0, 0))).unwrap();
        let t2 = layout.encode(rel, Suffix::At(stamp(10, 0, 0))).unwrap();
        let t3 = layout.encode(rel, Suffix::At(stamp(11, 0, 0))).unwrap();

        let index = HistoryIndex::new(
            layout,
            Box::new(StaticEnumerator(vec![t3.clone(), t1.clone(), t2.clone()])),
        );

        let paths: Vec<_> = index
            .list_revisions(rel, Limit::Unlimited)
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec![t1, t2, t3]);
    }

    #[test]
    fn limit_keeps_most_recent() {
        let layout = layout();
        let rel = Path::new("src/a.ts");
        let t1 = layout.encode(rel, Suffix::At(stamp(9, 0, 0))).unwrap();
        let t2 = layout.encode(rel, Suffix::At(stamp(10, 0, 0))).unwrap();
        let t3 = layout.encode(rel, Suffix::At(stamp(11, 0, 0))).unwrap();

        let index = HistoryIndex::new(
            layout,
            Box::new(StaticEnumerator(vec![t1, t2.clone(), t3.clone()])),
        );

        let paths: Vec<_> = index
            .list_revisions(rel, Limit::Latest(2))
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec![t2, t3]);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let layout = layout();
        let rel = Path::new("src/a.ts");
        let good = layout.encode(rel, Suffix::At(stamp(9, 0, 0))).unwrap();
        let bad = PathBuf::from("/proj/.history/src/a_123.ts");

        let index = HistoryIndex::new(layout, Box::new(StaticEnumerator(vec![bad, good.clone()])));

        let revisions = index.list_revisions(rel, Limit::Unlimited).unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].path, good);
    }

    #[test]
    fn fs_enumerator_lists_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HistoryLayout::new(dir.path().join("ws"), dir.path().join("hist"));
        let rel = Path::new("src/a.ts");
        let pattern = layout.pattern(rel).unwrap();
        fs::create_dir_all(&pattern.dir).unwrap();

        for name in [
            "a_20230601101530.ts",
            "a_20230601091530.ts",
            "a_2023060110153.ts",
            "b_20230601101530.ts",
            "a_20230601101530.js",
        ] {
            fs::write(pattern.dir.join(name), b"x").unwrap();
        }
        fs::create_dir(pattern.dir.join("a_20230601111530.ts")).unwrap();

        let index = HistoryIndex::new(layout, Box::new(FsEnumerator));
        let names: Vec<_> = index
            .list_revisions(rel, Limit::Unlimited)
            .unwrap()
            .into_iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a_20230601091530.ts", "a_20230601101530.ts"]);
    }

    #[test]
    fn fs_enumerator_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HistoryLayout::new(dir.path().join("ws"), dir.path().join("hist"));
        let index = HistoryIndex::new(layout, Box::new(FsEnumerator));

        let revisions = index
            .list_revisions(Path::new("never/saved.rs"), Limit::Unlimited)
            .unwrap();
        assert!(revisions.is_empty());
    }

    #[test]
    fn limit_from_max_treats_zero_as_unlimited() {
        assert_eq!(Limit::from_max(0), Limit::Unlimited);
        assert_eq!(Limit::from_max(10), Limit::Latest(10));
    }

    #[test]
    fn revision_serializes_stamp_as_iso_local_time() {
        let revision = Revision {
            path: PathBuf::from("/proj/.history/a_20230601101530.ts"),
            stamp: stamp(10, 15, 30),
        };
        let json = serde_json::to_value(&revision).unwrap();
        assert_eq!(json["stamp"], "2023-06-01T10:15:30");
    }
}
