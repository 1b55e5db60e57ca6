//! Configuration system: TOML file + env var overrides + CLI overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::duration::parse_duration;
use crate::core::errors::{KeepnError, Result};

/// Full keepn configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub retention: RetentionConfig,
    pub paths: PathsConfig,
}

/// Which change-notification mechanism feeds the event loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Snapshot-diff polling at `watch.interval`.
    #[default]
    Poll,
    /// OS notifications (inotify, FSEvents, ReadDirectoryChangesW).
    Native,
}

impl WatchBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Native => "native",
        }
    }
}

impl std::str::FromStr for WatchBackend {
    type Err = KeepnError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "native" | "notify" => Ok(Self::Native),
            other => Err(KeepnError::InvalidConfig {
                details: format!("watch.backend must be \"poll\" or \"native\", got {other:?}"),
            }),
        }
    }
}

/// What to watch and how often.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Paths to watch. Empty means the current working directory.
    pub paths: Vec<PathBuf>,
    /// Poll interval, e.g. `1s` or `500ms`.
    pub interval: String,
    /// Regex applied to entry names, both for event filtering and pruning.
    pub file_pattern: String,
    pub backend: WatchBackend,
}

/// How many files survive and how failures are treated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Number of most-recently-modified matching files to keep.
    pub num_files: usize,
    /// Stop the daemon on the first listing or deletion failure.
    pub strict: bool,
    /// Run one pass over every watched directory before watching begins.
    pub prune_on_start: bool,
}

/// Filesystem paths used by keepn itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            interval: "1s".to_string(),
            file_pattern: ".*".to_string(),
            backend: WatchBackend::Poll,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            num_files: 3,
            strict: false,
            prune_on_start: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[KPN-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("keepn").join("config.toml");
        let data = home_dir.join(".local").join("share").join("keepn");
        Self {
            config_file: cfg,
            activity_log: data.join("activity.jsonl"),
        }
    }
}

/// Values supplied on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub paths: Vec<PathBuf>,
    pub interval: Option<String>,
    pub file_pattern: Option<String>,
    pub num_files: Option<usize>,
    pub backend: Option<WatchBackend>,
    pub strict: bool,
    pub prune_on_start: bool,
    pub activity_log: Option<PathBuf>,
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &ConfigOverrides::default())
    }

    /// Load, apply env overrides, then CLI overrides, then normalize and validate.
    pub fn load_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| KeepnError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(KeepnError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.apply_overrides(overrides);
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Compiled `watch.file_pattern`.
    pub fn compiled_pattern(&self) -> Result<Regex> {
        compile_pattern(&self.watch.file_pattern)
    }

    /// Parsed `watch.interval`.
    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.watch.interval)
    }

    /// Paths to watch, falling back to the current working directory.
    pub fn watch_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.watch.paths.is_empty() {
            return Ok(self.watch.paths.clone());
        }
        let cwd = env::current_dir().map_err(|source| KeepnError::io(".", source))?;
        Ok(vec![cwd])
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("KEEPN_WATCH_PATHS") {
            self.watch.paths = env::split_paths(&raw).collect();
        }
        if let Some(raw) = lookup("KEEPN_WATCH_INTERVAL") {
            self.watch.interval = raw;
        }
        if let Some(raw) = lookup("KEEPN_WATCH_FILE_PATTERN") {
            self.watch.file_pattern = raw;
        }
        if let Some(raw) = lookup("KEEPN_WATCH_BACKEND") {
            self.watch.backend = raw.parse()?;
        }
        if let Some(raw) = lookup("KEEPN_RETENTION_NUM_FILES") {
            self.retention.num_files = parse_env_usize("KEEPN_RETENTION_NUM_FILES", &raw)?;
        }
        if let Some(raw) = lookup("KEEPN_RETENTION_STRICT") {
            self.retention.strict = parse_env_bool("KEEPN_RETENTION_STRICT", &raw)?;
        }
        if let Some(raw) = lookup("KEEPN_RETENTION_PRUNE_ON_START") {
            self.retention.prune_on_start =
                parse_env_bool("KEEPN_RETENTION_PRUNE_ON_START", &raw)?;
        }
        if let Some(raw) = lookup("KEEPN_PATHS_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if !overrides.paths.is_empty() {
            self.watch.paths.clone_from(&overrides.paths);
        }
        if let Some(interval) = &overrides.interval {
            self.watch.interval.clone_from(interval);
        }
        if let Some(pattern) = &overrides.file_pattern {
            self.watch.file_pattern.clone_from(pattern);
        }
        if let Some(num_files) = overrides.num_files {
            self.retention.num_files = num_files;
        }
        if let Some(backend) = overrides.backend {
            self.watch.backend = backend;
        }
        // Flags can only switch these on; the file or env may already have.
        self.retention.strict |= overrides.strict;
        self.retention.prune_on_start |= overrides.prune_on_start;
        if let Some(log) = &overrides.activity_log {
            self.paths.activity_log.clone_from(log);
        }
    }

    /// Strip trailing slashes so event paths and watched roots compare equal.
    fn normalize_paths(&mut self) {
        for path in &mut self.watch.paths {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        self.compiled_pattern()?;

        let interval = self.poll_interval()?;
        if interval.is_zero() {
            return Err(KeepnError::InvalidConfig {
                details: format!(
                    "watch.interval must be greater than zero, got {:?}",
                    self.watch.interval
                ),
            });
        }

        if self.paths.activity_log.as_os_str().is_empty() {
            return Err(KeepnError::InvalidConfig {
                details: "paths.activity_log must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Compile a name pattern, mapping failures to `InvalidPattern`.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|error| KeepnError::InvalidPattern {
        pattern: pattern.to_string(),
        details: error.to_string(),
    })
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| KeepnError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| KeepnError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
