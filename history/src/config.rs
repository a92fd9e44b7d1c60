//! Configuration for Local History.
//!
//! Settings are layered: built-in defaults, then an optional
//! `.local-history.json` in the workspace root, then environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LOCAL_HISTORY_PATH` | (empty) | Directory holding `.history/<workspace>`; empty keeps history in the workspace |
//! | `LOCAL_HISTORY_DAYS_LIMIT` | 30 | Days a revision is kept; 0 disables purging |
//! | `LOCAL_HISTORY_MAX_DISPLAY` | 10 | Revisions listed by default; 0 lists all |
//! | `LOCAL_HISTORY_EXCLUDE` | `{.history,.vscode,**/node_modules,typings,out}` | Workspace-relative glob of files never recorded |
//! | `LOCAL_HISTORY_ENABLED` | true | Turns recording on or off |
//! | `LOCAL_HISTORY_SNAPSHOT_MAX_BYTES` | 1048576 | Largest file snapshotted by the watch daemon at startup |
//! | `LOCAL_HISTORY_SNAPSHOT_MAX_TOTAL_BYTES` | 67108864 | Bytes the startup snapshot may hold in memory across all files |
//! | `LOCAL_HISTORY_DEBOUNCE_MS` | 250 | Quiet period before a burst of file events counts as one save |
//!
//! # Settings File
//!
//! ```json
//! { "path": "~/backups", "daysLimit": 7, "maxDisplay": 20, "enabled": true }
//! ```
//!
//! # Example
//!
//! ```no_run
//! use local_history::config::Config;
//!
//! let config = Config::load("/path/to/workspace").expect("Failed to load configuration");
//! println!("History root: {}", config.history_root().display());
//! ```

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Name of the optional settings file in the workspace root.
pub const SETTINGS_FILE: &str = ".local-history.json";

/// Name of the directory holding revisions.
pub const HISTORY_DIR: &str = ".history";

/// Default exclude glob.
pub const DEFAULT_EXCLUDE: &str = "{.history,.vscode,**/node_modules,typings,out}";

/// Default retention window in days.
const DEFAULT_DAYS_LIMIT: u32 = 30;

/// Default number of revisions listed.
const DEFAULT_MAX_DISPLAY: usize = 10;

/// Default startup snapshot size cap.
const DEFAULT_SNAPSHOT_MAX_BYTES: u64 = 1024 * 1024;

/// Default memory budget for the whole startup snapshot.
const DEFAULT_SNAPSHOT_MAX_TOTAL_BYTES: u64 = 64 * 1024 * 1024;

/// Default debounce window for file events.
const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The settings file exists but cannot be read.
    #[error("failed to read {path}: {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The settings file is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The workspace root has no final component to name its history folder.
    #[error("workspace root has no base name: {0}")]
    NoWorkspaceName(PathBuf),

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Contents of `.local-history.json`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SettingsFile {
    path: Option<String>,
    days_limit: Option<u32>,
    max_display: Option<usize>,
    exclude: Option<String>,
    enabled: Option<bool>,
    snapshot_max_bytes: Option<u64>,
    snapshot_max_total_bytes: Option<u64>,
    debounce_ms: Option<u64>,
}

/// Configuration for one workspace.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute workspace root.
    pub workspace_root: PathBuf,

    /// Directory holding `.history/<workspace>`, or `None` to keep history
    /// inside the workspace.
    pub history_path: Option<PathBuf>,

    /// Days a revision is kept. 0 disables purging.
    pub days_limit: u32,

    /// Revisions listed by default. 0 lists all.
    pub max_display: usize,

    /// Workspace-relative glob of files never recorded.
    pub exclude: String,

    /// Whether save hooks record anything.
    pub enabled: bool,

    /// Largest file the watch daemon snapshots at startup.
    pub snapshot_max_bytes: u64,

    /// Bytes the startup snapshot may hold across all files. Files past the
    /// budget get no original until their first save is recorded.
    pub snapshot_max_total_bytes: u64,

    /// Quiet period before a burst of file events counts as one save.
    pub debounce: Duration,
}

impl Config {
    /// Returns the built-in defaults for a workspace.
    pub fn defaults(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            history_path: None,
            days_limit: DEFAULT_DAYS_LIMIT,
            max_display: DEFAULT_MAX_DISPLAY,
            exclude: DEFAULT_EXCLUDE.to_string(),
            enabled: true,
            snapshot_max_bytes: DEFAULT_SNAPSHOT_MAX_BYTES,
            snapshot_max_total_bytes: DEFAULT_SNAPSHOT_MAX_TOTAL_BYTES,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    /// Loads configuration for the workspace at `workspace_root`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - the settings file exists but cannot be read or parsed
    /// - an environment variable holds an invalid value
    /// - a `~` path is used and the home directory cannot be determined
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(absolute(workspace_root.as_ref()));

        let settings_path = config.workspace_root.join(SETTINGS_FILE);
        if let Some(settings) = read_settings(&settings_path)? {
            debug!(path = %settings_path.display(), "Loaded settings file");
            config.apply_settings(settings)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Returns the root directory revisions are stored under.
    ///
    /// `<workspace>/.history` without a history path, otherwise
    /// `<history_path>/.history/<workspace base name>`.
    #[must_use]
    pub fn history_root(&self) -> PathBuf {
        match &self.history_path {
            None => self.workspace_root.join(HISTORY_DIR),
            Some(base) => {
                let name = self
                    .workspace_root
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_default();
                base.join(HISTORY_DIR).join(name)
            }
        }
    }

    /// Checks settings that can only be judged once all layers are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoWorkspaceName`] if history is stored outside
    /// the workspace and the root has no base name (e.g. `/`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_path.is_some() && self.workspace_root.file_name().is_none() {
            return Err(ConfigError::NoWorkspaceName(self.workspace_root.clone()));
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: SettingsFile) -> Result<(), ConfigError> {
        if let Some(path) = settings.path {
            self.history_path = history_path(&path)?;
        }
        if let Some(days) = settings.days_limit {
            self.days_limit = days;
        }
        if let Some(max) = settings.max_display {
            self.max_display = max;
        }
        if let Some(exclude) = settings.exclude {
            self.exclude = exclude;
        }
        if let Some(enabled) = settings.enabled {
            self.enabled = enabled;
        }
        if let Some(bytes) = settings.snapshot_max_bytes {
            self.snapshot_max_bytes = bytes;
        }
        if let Some(bytes) = settings.snapshot_max_total_bytes {
            self.snapshot_max_total_bytes = bytes;
        }
        if let Some(ms) = settings.debounce_ms {
            self.debounce = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("LOCAL_HISTORY_PATH") {
            self.history_path = history_path(&path)?;
        }
        if let Some(days) = parse_env::<u32>("LOCAL_HISTORY_DAYS_LIMIT", "non-negative integer")? {
            self.days_limit = days;
        }
        if let Some(max) = parse_env::<usize>("LOCAL_HISTORY_MAX_DISPLAY", "non-negative integer")? {
            self.max_display = max;
        }
        if let Ok(exclude) = env::var("LOCAL_HISTORY_EXCLUDE") {
            self.exclude = exclude;
        }
        if let Ok(val) = env::var("LOCAL_HISTORY_ENABLED") {
            self.enabled = parse_bool("LOCAL_HISTORY_ENABLED", &val)?;
        }
        if let Some(bytes) =
            parse_env::<u64>("LOCAL_HISTORY_SNAPSHOT_MAX_BYTES", "non-negative integer")?
        {
            self.snapshot_max_bytes = bytes;
        }
        if let Some(bytes) =
            parse_env::<u64>("LOCAL_HISTORY_SNAPSHOT_MAX_TOTAL_BYTES", "non-negative integer")?
        {
            self.snapshot_max_total_bytes = bytes;
        }
        if let Some(ms) = parse_env::<u64>("LOCAL_HISTORY_DEBOUNCE_MS", "non-negative integer")? {
            self.debounce = Duration::from_millis(ms);
        }
        Ok(())
    }
}

/// Reads the settings file, returning `None` if it does not exist.
fn read_settings(path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::ReadSettings {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::ParseSettings {
            path: path.to_path_buf(),
            source,
        })
}

/// Interprets a `path` setting: empty means in-workspace, `~` means home.
fn history_path(raw: &str) -> Result<Option<PathBuf>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(expand_home(raw)?))
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(raw: &str) -> Result<PathBuf, ConfigError> {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return Ok(PathBuf::from(raw)),
    };

    let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        Ok(base_dirs.home_dir().to_path_buf())
    } else {
        Ok(base_dirs.home_dir().join(rest))
    }
}

/// Parses an optional numeric environment variable.
fn parse_env<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected {expected}, got '{val}'"),
            }),
        Err(_) => Ok(None),
    }
}

/// Parses a boolean environment value.
fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{val}'"),
        }),
    }
}

/// Makes a workspace root absolute without requiring it to exist.
fn absolute(root: &Path) -> PathBuf {
    if let Ok(canonical) = root.canonicalize() {
        return canonical;
    }
    if root.is_absolute() {
        return root.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(root))
        .unwrap_or_else(|_| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to run tests with isolated environment variables.
    /// Clears all LOCAL_HISTORY_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("LOCAL_HISTORY_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("LOCAL_HISTORY_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_defaults_without_settings() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            let config = Config::load(dir.path()).expect("should load defaults");

            assert_eq!(config.workspace_root, dir.path().canonicalize().unwrap());
            assert!(config.history_path.is_none());
            assert_eq!(config.days_limit, DEFAULT_DAYS_LIMIT);
            assert_eq!(config.max_display, DEFAULT_MAX_DISPLAY);
            assert_eq!(config.exclude, DEFAULT_EXCLUDE);
            assert!(config.enabled);
            assert_eq!(config.snapshot_max_bytes, DEFAULT_SNAPSHOT_MAX_BYTES);
            assert_eq!(config.snapshot_max_total_bytes, DEFAULT_SNAPSHOT_MAX_TOTAL_BYTES);
            assert_eq!(config.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
            assert_eq!(config.history_root(), config.workspace_root.join(".history"));
        });
    }

    #[test]
    #[serial]
    fn test_settings_file() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            fs::write(
                dir.path().join(SETTINGS_FILE),
                r#"{ "path": "/backups", "daysLimit": 7, "maxDisplay": 0, "exclude": "**/target", "enabled": false }"#,
            )
            .unwrap();

            let config = Config::load(dir.path()).expect("should load settings");

            assert_eq!(config.history_path, Some(PathBuf::from("/backups")));
            assert_eq!(config.days_limit, 7);
            assert_eq!(config.max_display, 0);
            assert_eq!(config.exclude, "**/target");
            assert!(!config.enabled);
        });
    }

    #[test]
    #[serial]
    fn test_env_overrides_settings_file() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join(SETTINGS_FILE), r#"{ "daysLimit": 7 }"#).unwrap();
            env::set_var("LOCAL_HISTORY_DAYS_LIMIT", "0");
            env::set_var("LOCAL_HISTORY_ENABLED", "off");
            env::set_var("LOCAL_HISTORY_DEBOUNCE_MS", "50");

            let config = Config::load(dir.path()).expect("should load");

            assert_eq!(config.days_limit, 0);
            assert!(!config.enabled);
            assert_eq!(config.debounce, Duration::from_millis(50));
        });
    }

    #[test]
    #[serial]
    fn test_snapshot_total_budget_from_file_and_env() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            fs::write(
                dir.path().join(SETTINGS_FILE),
                r#"{ "snapshotMaxBytes": 512, "snapshotMaxTotalBytes": 4096 }"#,
            )
            .unwrap();

            let config = Config::load(dir.path()).expect("should load");
            assert_eq!(config.snapshot_max_bytes, 512);
            assert_eq!(config.snapshot_max_total_bytes, 4096);

            env::set_var("LOCAL_HISTORY_SNAPSHOT_MAX_TOTAL_BYTES", "0");
            let config = Config::load(dir.path()).expect("should load");
            assert_eq!(config.snapshot_max_total_bytes, 0);
        });
    }

    #[test]
    #[serial]
    fn test_invalid_days_limit() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            env::set_var("LOCAL_HISTORY_DAYS_LIMIT", "-3");

            let err = Config::load(dir.path()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LOCAL_HISTORY_DAYS_LIMIT")
            );
        });
    }

    #[test]
    #[serial]
    fn test_invalid_enabled() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            env::set_var("LOCAL_HISTORY_ENABLED", "maybe");

            let err = Config::load(dir.path()).unwrap_err();
            assert!(err.to_string().contains("LOCAL_HISTORY_ENABLED"));
        });
    }

    #[test]
    #[serial]
    fn test_malformed_settings_file() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join(SETTINGS_FILE), r#"{ "daysLimit": "soon" }"#).unwrap();

            let err = Config::load(dir.path()).unwrap_err();
            assert!(matches!(err, ConfigError::ParseSettings { .. }));
        });
    }

    #[test]
    #[serial]
    fn test_empty_path_keeps_history_in_workspace() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            env::set_var("LOCAL_HISTORY_PATH", "  ");

            let config = Config::load(dir.path()).unwrap();
            assert!(config.history_path.is_none());
        });
    }

    #[test]
    #[serial]
    fn test_tilde_expands_to_home() {
        with_clean_env(|| {
            let dir = tempfile::tempdir().unwrap();
            env::set_var("LOCAL_HISTORY_PATH", "~/backups");

            let config = Config::load(dir.path()).unwrap();
            let home = BaseDirs::new().unwrap().home_dir().to_path_buf();
            assert_eq!(config.history_path, Some(home.join("backups")));
        });
    }

    #[test]
    fn test_history_root_outside_workspace() {
        let mut config = Config::defaults("/work/my-app");
        config.history_path = Some(PathBuf::from("/backups"));

        assert_eq!(
            config.history_root(),
            PathBuf::from("/backups/.history/my-app")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nameless_root_with_history_path() {
        let mut config = Config::defaults("/");
        config.history_path = Some(PathBuf::from("/backups"));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoWorkspaceName(_))
        ));
    }

    #[test]
    fn test_non_tilde_path_unchanged() {
        assert_eq!(expand_home("/abs").unwrap(), PathBuf::from("/abs"));
        assert_eq!(expand_home("~user/x").unwrap(), PathBuf::from("~user/x"));
    }
}
