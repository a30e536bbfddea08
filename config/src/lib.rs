//! Configuration for lintbridge: where pylint lives, how delivery retries,
//! and which reconciler to spawn.
//!
//! Loaded from TOML. Lookup order: an explicit `--config` path, then
//! `<workspace>/.lintbridge.toml`, then the user config directory. Every key
//! is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lintbridge_lsp::DeliveryConfig;
use serde::Deserialize;

/// Workspace-local config file name.
pub const WORKSPACE_CONFIG: &str = ".lintbridge.toml";

// serde default value functions
const fn default_true() -> bool {
    true
}

fn default_pylint_path() -> String {
    "pylint".to_string()
}

fn default_python_path() -> String {
    "python3".to_string()
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_backoff_base_ms() -> u64 {
    100
}

const fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_reconciler_args() -> Vec<String> {
    vec!["serve".to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pylint: PylintSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PylintSettings {
    /// Executable used when `use_python_module` is false.
    #[serde(default = "default_pylint_path")]
    pub pylint_path: String,
    /// Run `<python_path> -m pylint` instead of `pylint_path`.
    #[serde(default = "default_true")]
    pub use_python_module: bool,
    #[serde(default = "default_python_path")]
    pub python_path: String,
    #[serde(default = "default_true")]
    pub enable_all: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Replacement for the primary line grammar. Same capture groups.
    pub primary_pattern: Option<String>,
    /// Replacement for the alternate line grammar. Same capture groups.
    pub alternate_pattern: Option<String>,
}

impl Default for PylintSettings {
    fn default() -> Self {
        Self {
            pylint_path: default_pylint_path(),
            use_python_module: true,
            python_path: default_python_path(),
            enable_all: true,
            recursive: true,
            extra_args: Vec::new(),
            primary_pattern: None,
            alternate_pattern: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl DeliverySettings {
    #[must_use]
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerSettings {
    /// Consumer executable. `None` runs this binary again.
    pub command: Option<String>,
    #[serde(default = "default_reconciler_args")]
    pub args: Vec<String>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: default_reconciler_args(),
        }
    }
}

/// A fully assembled tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl PylintSettings {
    /// Build the pylint command line for `target` (default: the whole workspace).
    ///
    /// Absolute targets inside the workspace are passed relative to it, so
    /// reported paths stay workspace-relative.
    #[must_use]
    pub fn spawn_spec(&self, target: Option<&Path>, workspace: &Path) -> SpawnSpec {
        let target = match target {
            Some(t) if t.is_absolute() => t.strip_prefix(workspace).unwrap_or(t),
            Some(t) => t,
            None => Path::new("."),
        };
        let target = if target.as_os_str().is_empty() {
            ".".to_string()
        } else {
            target.display().to_string()
        };

        let (program, mut args) = if self.use_python_module {
            (
                self.python_path.clone(),
                vec!["-m".to_string(), "pylint".to_string()],
            )
        } else {
            (self.pylint_path.clone(), Vec::new())
        };
        args.push(target);
        if self.recursive {
            args.push("--recursive=y".to_string());
        }
        if self.enable_all {
            args.push("--enable=all".to_string());
        }
        args.extend(self.extra_args.iter().cloned());

        SpawnSpec {
            program,
            args,
            cwd: workspace.to_path_buf(),
        }
    }
}

impl Settings {
    /// Load one file. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Resolve settings for `workspace`. An explicit path must exist.
    pub fn load(workspace: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path)?.ok_or_else(|| ConfigError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        for candidate in config_candidates(workspace) {
            if let Some(settings) = Self::load_from(&candidate)? {
                tracing::debug!(path = %candidate.display(), "Loaded config");
                return Ok(settings);
            }
        }
        Ok(Self::default())
    }
}

/// User-level config file.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lintbridge").join("config.toml"))
}

fn config_candidates(workspace: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![workspace.join(WORKSPACE_CONFIG)];
    candidates.extend(config_path());
    candidates
}
