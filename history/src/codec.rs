//! Revision naming and history-path mapping.
//!
//! Every saved revision of a workspace file is mirrored into the history tree
//! under a date-suffixed name:
//!
//! ```text
//! <historyRoot>/<relativeDir>/<baseName>_<YYYYMMDDHHMMSS><ext>
//! ```
//!
//! [`HistoryLayout`] maps a workspace-relative path plus a [`RevisionStamp`] to
//! that physical path ([`HistoryLayout::encode`]) and back
//! ([`HistoryLayout::decode`]). The mapping is a bijection between
//! `(relativePath, stamp)` pairs and history paths.
//!
//! # Revision Stamp Format
//!
//! The stamp is the local wall-clock capture time at second granularity, as
//! exactly 14 zero-padded digits prefixed by `_`:
//!
//! - `a_20230601101530.ts` is `src/a.ts` captured at 2023-06-01 10:15:30
//! - `a_2023060110153.ts` (13 digits) is malformed
//! - `a_20231301101530.ts` (month 13) is malformed
//!
//! Fixed width keeps lexical order equal to chronological order. Two saves in
//! the same second map to the same name; the later write overwrites the earlier.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use chrono::NaiveDate;
//! use local_history::codec::{HistoryLayout, RevisionStamp, Suffix};
//!
//! let layout = HistoryLayout::new("/proj", "/proj/.history");
//! let at = NaiveDate::from_ymd_opt(2023, 6, 1)
//!     .and_then(|d| d.and_hms_opt(10, 15, 30))
//!     .unwrap();
//!
//! let path = layout
//!     .encode(Path::new("src/a.ts"), Suffix::At(RevisionStamp::new(at)))
//!     .unwrap();
//! assert_eq!(path, Path::new("/proj/.history/src/a_20230601101530.ts"));
//!
//! let decoded = layout.decode(&path, None).unwrap();
//! assert_eq!(decoded.stamp, Some(RevisionStamp::new(at)));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

/// Number of digits in a revision stamp.
pub const STAMP_DIGITS: usize = 14;

/// Separator between the base name and the revision stamp.
const STAMP_SEPARATOR: char = '_';

/// One single-digit glob class per stamp digit.
const STAMP_WILDCARD: &str = "[0-9]";

/// Errors that can occur when decoding a history path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The path has no final component to parse.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// The file name is not valid UTF-8.
    #[error("file name is not valid UTF-8: {0}")]
    NonUtf8(PathBuf),

    /// A file inside the history tree without the `_YYYYMMDDHHMMSS` suffix.
    #[error("history file name has no 14-digit revision stamp: {0}")]
    MissingStamp(String),

    /// The 14 digits do not form a valid calendar date and time.
    #[error("revision stamp is not a valid date and time: {0}")]
    InvalidStamp(String),

    /// The path cannot be relativized against the root of its space.
    #[error("path {path} is outside {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// The capture instant of a revision.
///
/// Local wall-clock time truncated to whole seconds. No timezone is recorded,
/// matching what the file name can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionStamp(NaiveDateTime);

impl RevisionStamp {
    /// Creates a stamp from a local date and time, dropping sub-second precision.
    #[must_use]
    pub fn new(at: NaiveDateTime) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    /// Creates a stamp from a local-zone timestamp.
    #[must_use]
    pub fn from_local(at: DateTime<Local>) -> Self {
        Self::new(at.naive_local())
    }

    /// Creates a stamp from a filesystem time (e.g. a file's mtime).
    #[must_use]
    pub fn from_system_time(at: SystemTime) -> Self {
        Self::from_local(DateTime::<Local>::from(at))
    }

    /// Returns the local date and time of this stamp.
    #[must_use]
    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Parses exactly 14 ASCII digits `YYYYMMDDHHMMSS`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingStamp`] if `digits` is not 14 ASCII digits,
    /// or [`CodecError::InvalidStamp`] if they do not form a real instant.
    pub fn parse(digits: &str) -> Result<Self> {
        if digits.len() != STAMP_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::MissingStamp(digits.to_string()));
        }

        // All ASCII digits, so every slice is on a char boundary and parses.
        let field = |range: std::ops::Range<usize>| -> u32 {
            digits[range].parse().unwrap_or_default()
        };

        let year = field(0..4) as i32;
        NaiveDate::from_ymd_opt(year, field(4..6), field(6..8))
            .and_then(|date| date.and_hms_opt(field(8..10), field(10..12), field(12..14)))
            .map(Self)
            .ok_or_else(|| CodecError::InvalidStamp(digits.to_string()))
    }
}

impl fmt::Display for RevisionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d%H%M%S"))
    }
}

/// The suffix appended to a base name when encoding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    /// No suffix: the plain workspace path.
    Plain,
    /// 14 single-digit wildcards: a search pattern over all revisions.
    Pattern,
    /// A concrete revision captured at the given instant.
    At(RevisionStamp),
}

/// Which tree a path lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSpace {
    /// The workspace being edited.
    Workspace,
    /// The shadow history tree.
    History,
}

/// The parsed pieces of a workspace or history path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPath {
    /// The tree the input path was found in.
    pub space: PathSpace,
    /// Base name without stamp and extension.
    pub name: String,
    /// Extension including the leading dot, or empty.
    pub ext: String,
    /// Capture instant, present for history paths only.
    pub stamp: Option<RevisionStamp>,
    /// The input path, or its counterpart in the requested target space.
    pub resolved: PathBuf,
}

/// Search pattern matching every revision of one workspace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionPattern {
    /// Directory inside the history tree holding the revisions.
    pub dir: PathBuf,
    /// Base name without extension.
    pub name: String,
    /// Extension including the leading dot, or empty.
    pub ext: String,
}

impl RevisionPattern {
    /// Returns the stamp if `file_name` is a revision of this file.
    #[must_use]
    pub fn match_file_name(&self, file_name: &str) -> Option<RevisionStamp> {
        let rest = file_name.strip_prefix(self.name.as_str())?;
        let rest = rest.strip_suffix(self.ext.as_str())?;
        let digits = rest.strip_prefix(STAMP_SEPARATOR)?;
        RevisionStamp::parse(digits).ok()
    }

    /// Returns the path of the revision captured at `stamp`.
    #[must_use]
    pub fn revision_path(&self, stamp: RevisionStamp) -> PathBuf {
        join_name(&self.dir, &self.name, &self.ext, Suffix::At(stamp))
    }

    /// Renders the pattern as a glob path, e.g. `dir/a_[0-9]...[0-9].ts`.
    #[must_use]
    pub fn glob(&self) -> PathBuf {
        join_name(&self.dir, &self.name, &self.ext, Suffix::Pattern)
    }
}

/// The two roots between which paths are mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLayout {
    workspace_root: PathBuf,
    history_root: PathBuf,
}

impl HistoryLayout {
    /// Creates a layout for a workspace and its history root.
    pub fn new(workspace_root: impl Into<PathBuf>, history_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            history_root: history_root.into(),
        }
    }

    /// Returns the workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Returns the history root.
    #[must_use]
    pub fn history_root(&self) -> &Path {
        &self.history_root
    }

    /// Returns true if `path` lives inside the history tree.
    #[must_use]
    pub fn is_history_path(&self, path: &Path) -> bool {
        path.starts_with(&self.history_root)
    }

    /// Returns the workspace-relative path of a workspace file.
    ///
    /// Returns `None` for files outside the workspace, the root itself, and
    /// anything inside the history tree (history is never mirrored into itself).
    #[must_use]
    pub fn relative_path(&self, file: &Path) -> Option<PathBuf> {
        if self.is_history_path(file) {
            return None;
        }
        let relative = file.strip_prefix(&self.workspace_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(relative.to_path_buf())
    }

    /// Encodes a workspace-relative file path.
    ///
    /// [`Suffix::Plain`] yields the workspace path, [`Suffix::Pattern`] the glob
    /// matching all revisions and [`Suffix::At`] one concrete revision path.
    ///
    /// # Errors
    ///
    /// Returns an error if `relative` has no UTF-8 file name.
    pub fn encode(&self, relative: &Path, suffix: Suffix) -> Result<PathBuf> {
        if suffix == Suffix::Plain {
            return Ok(self.workspace_root.join(relative));
        }

        let (dir, name, ext) = split_file_name(relative)?;
        let dir = self.history_root.join(dir);
        Ok(join_name(&dir, &name, &ext, suffix))
    }

    /// Builds the revision search pattern for a workspace-relative file path.
    ///
    /// # Errors
    ///
    /// Returns an error if `relative` has no UTF-8 file name.
    pub fn pattern(&self, relative: &Path) -> Result<RevisionPattern> {
        let (dir, name, ext) = split_file_name(relative)?;
        Ok(RevisionPattern {
            dir: self.history_root.join(dir),
            name,
            ext,
        })
    }

    /// Decodes a workspace or history path.
    ///
    /// Whether `path` is a history path is detected structurally from the
    /// history root. For history paths the stamp is stripped and parsed.
    ///
    /// With `target` set, `resolved` is rewritten into that space: a history
    /// target yields the revision glob for the file, a workspace target the
    /// plain workspace path. With `target` unset `resolved` is `path` itself.
    ///
    /// # Errors
    ///
    /// Returns an error if a history path lacks a valid 14-digit stamp, or if
    /// the directory cannot be relativized against its root. Callers treat
    /// this as "no history" for the file.
    pub fn decode(&self, path: &Path, target: Option<PathSpace>) -> Result<DecodedPath> {
        let (dir, name, ext) = split_file_name(path)?;

        let space = if self.is_history_path(path) {
            PathSpace::History
        } else {
            PathSpace::Workspace
        };

        let (name, stamp) = match space {
            PathSpace::History => {
                let (base, stamp) = strip_stamp(&name)?;
                (base.to_string(), Some(stamp))
            }
            PathSpace::Workspace => (name, None),
        };

        let resolved = match target {
            None => path.to_path_buf(),
            Some(target) => {
                let dir = if target == space {
                    dir
                } else {
                    self.rebase_dir(&dir, space, target)?
                };
                let suffix = match target {
                    PathSpace::History => Suffix::Pattern,
                    PathSpace::Workspace => Suffix::Plain,
                };
                join_name(&dir, &name, &ext, suffix)
            }
        };

        Ok(DecodedPath {
            space,
            name,
            ext,
            stamp,
            resolved,
        })
    }

    /// Builds the revision search pattern for any workspace or history path.
    ///
    /// # Errors
    ///
    /// Same as [`HistoryLayout::decode`].
    pub fn pattern_of(&self, path: &Path) -> Result<RevisionPattern> {
        let decoded = self.decode(path, Some(PathSpace::History))?;
        let dir = decoded
            .resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(RevisionPattern {
            dir,
            name: decoded.name,
            ext: decoded.ext,
        })
    }

    /// Moves a directory from one space to the other by relativizing it
    /// against the source root and rejoining it against the target root.
    fn rebase_dir(&self, dir: &Path, from: PathSpace, to: PathSpace) -> Result<PathBuf> {
        let (source_root, target_root) = match (from, to) {
            (PathSpace::Workspace, PathSpace::History) => (&self.workspace_root, &self.history_root),
            (PathSpace::History, PathSpace::Workspace) => (&self.history_root, &self.workspace_root),
            _ => return Ok(dir.to_path_buf()),
        };

        let relative = dir
            .strip_prefix(source_root)
            .map_err(|_| CodecError::OutsideRoot {
                path: dir.to_path_buf(),
                root: source_root.clone(),
            })?;

        Ok(target_root.join(relative))
    }
}

/// Splits a path into its directory, base name and extension (with dot).
///
/// Follows [`Path::file_stem`] semantics: `a.tar.gz` is `a.tar` + `.gz` and
/// `.gitignore` has no extension.
fn split_file_name(path: &Path) -> Result<(PathBuf, String, String)> {
    if path.file_name().is_none() {
        return Err(CodecError::NoFileName(path.to_path_buf()));
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CodecError::NonUtf8(path.to_path_buf()))?
        .to_string();

    let ext = match path.extension() {
        Some(ext) => {
            let ext = ext
                .to_str()
                .ok_or_else(|| CodecError::NonUtf8(path.to_path_buf()))?;
            format!(".{ext}")
        }
        None => String::new(),
    };

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((dir, name, ext))
}

/// Splits `name_YYYYMMDDHHMMSS` into `name` and its stamp.
///
/// The `_` must sit immediately before the last 14 characters; a longer or
/// shorter digit run is not a revision marker.
fn strip_stamp(name: &str) -> Result<(&str, RevisionStamp)> {
    let missing = || CodecError::MissingStamp(name.to_string());

    let split = name.len().checked_sub(STAMP_DIGITS + 1).ok_or_else(missing)?;
    if !name.is_char_boundary(split) {
        return Err(missing());
    }

    let (base, marker) = name.split_at(split);
    let digits = marker.strip_prefix(STAMP_SEPARATOR).ok_or_else(missing)?;
    let stamp = RevisionStamp::parse(digits)?;

    Ok((base, stamp))
}

fn join_name(dir: &Path, name: &str, ext: &str, suffix: Suffix) -> PathBuf {
    let file_name = match suffix {
        Suffix::Plain => format!("{name}{ext}"),
        Suffix::Pattern => format!(
            "{name}{STAMP_SEPARATOR}{}{ext}",
            STAMP_WILDCARD.repeat(STAMP_DIGITS)
        ),
        Suffix::At(stamp) => format!("{name}{STAMP_SEPARATOR}{stamp}{ext}"),
    };
    dir.join(file_name)
}
