//! Workspace file search and exclude patterns.
//!
//! The exclude setting is a workspace-relative glob such as the default
//! `{.history,.vscode,**/node_modules,typings,out}`. It is compiled into a
//! gitignore matcher:
//!
//! - top-level `{a,b,c}` alternatives become separate entries
//! - entries not starting with `**/` or `/` are anchored at the workspace root
//! - an excluded directory excludes everything beneath it
//!
//! Version-control metadata ([`HOST_EXCLUDE`]) is always excluded on top of
//! the configured pattern; clearing the setting does not bring it back.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use local_history::workspace::ExcludeSet;
//!
//! let exclude = ExcludeSet::new("/proj", "{.history,**/node_modules,out}").unwrap();
//! assert!(exclude.is_excluded(Path::new("node_modules/x.js")));
//! assert!(exclude.is_excluded(Path::new("pkg/node_modules/y/z.js")));
//! assert!(exclude.is_excluded(Path::new("out/main.js")));
//! assert!(!exclude.is_excluded(Path::new("src/out/main.js")));
//! assert!(exclude.is_excluded(Path::new(".git/index")));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::trace;

/// Paths no workspace history ever includes, whatever the exclude setting.
pub const HOST_EXCLUDE: &str = "{**/.git,**/.svn,**/.hg,**/CVS,**/.DS_Store}";

/// Compiled exclude patterns, relative to a workspace root.
#[derive(Clone)]
pub struct ExcludeSet {
    pattern: String,
    matcher: Gitignore,
}

impl fmt::Debug for ExcludeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeSet")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl ExcludeSet {
    /// Compiles `pattern`, plus [`HOST_EXCLUDE`], for the workspace at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if any alternative is not a valid glob.
    pub fn new(root: impl AsRef<Path>, pattern: &str) -> Result<Self, ignore::Error> {
        let mut builder = GitignoreBuilder::new(root.as_ref());
        for entry in split_alternatives(HOST_EXCLUDE)
            .into_iter()
            .chain(split_alternatives(pattern))
        {
            builder.add_line(None, &anchor(entry))?;
        }

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: builder.build()?,
        })
    }

    /// Returns the configured pattern, without [`HOST_EXCLUDE`].
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if a workspace-relative file path is excluded.
    #[must_use]
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if relative.has_root() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, false)
            .is_ignore()
    }

    /// Returns true if a workspace-relative directory is excluded.
    #[must_use]
    pub fn is_dir_excluded(&self, relative: &Path) -> bool {
        if relative.has_root() || relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, true)
            .is_ignore()
    }
}

/// Splits a `{a,b,c}` group into its alternatives, honoring nested braces.
fn split_alternatives(pattern: &str) -> Vec<&str> {
    let pattern = pattern.trim();
    let inner = match pattern.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        Some(inner) if is_single_group(inner) => inner,
        _ => return vec![pattern].into_iter().filter(|p| !p.is_empty()).collect(),
    };

    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(inner[start..].trim());

    entries.into_iter().filter(|e| !e.is_empty()).collect()
}

/// True if the braces inside `inner` never close the outer group early,
/// so `{a},{b}` is not mistaken for one group.
fn is_single_group(inner: &str) -> bool {
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Anchors a relative glob at the workspace root, like a VS Code relative pattern.
fn anchor(entry: &str) -> String {
    if entry.starts_with("**/") || entry.starts_with('/') {
        entry.to_string()
    } else {
        format!("/{entry}")
    }
}

/// Confirms that a saved file is visible to the workspace search.
pub trait WorkspaceSearch: Send + Sync {
    /// Returns the absolute path of `relative` if it exists in the workspace
    /// and is not excluded.
    fn locate(&self, relative: &Path) -> Option<PathBuf>;
}

/// Workspace search over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsWorkspaceSearch {
    root: PathBuf,
    exclude: ExcludeSet,
}

impl FsWorkspaceSearch {
    /// Creates a search rooted at `root` honoring `exclude`.
    pub fn new(root: impl Into<PathBuf>, exclude: ExcludeSet) -> Self {
        Self {
            root: root.into(),
            exclude,
        }
    }

    /// Returns the exclude patterns in use.
    #[must_use]
    pub fn exclude(&self) -> &ExcludeSet {
        &self.exclude
    }
}

impl WorkspaceSearch for FsWorkspaceSearch {
    fn locate(&self, relative: &Path) -> Option<PathBuf> {
        if self.exclude.is_excluded(relative) {
            trace!(path = %relative.display(), pattern = %self.exclude.pattern(), "Excluded by pattern");
            return None;
        }

        let absolute = self.root.join(relative);
        absolute.is_file().then_some(absolute)
    }
}
