//! Configuration for the ledger.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RUNLEDGER_HOME, RUNLEDGER_DATABASE)
//! 2. Config file (.runledger/config.yaml)
//! 3. Defaults (~/.runledger)
//!
//! Config file discovery:
//! - Searches the starting directory and its parents for .runledger/config.yaml
//! - Paths in the config file are relative to the .runledger/ directory
//!
//! Configuration is resolved explicitly and passed to `Ledger::open`; nothing
//! is cached globally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::broadcast::DEFAULT_CAPACITY;
use crate::core::ArtifactPolicy;
use crate::dispatch::WebhookTrigger;

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".runledger";

/// Database file name under the home directory
pub const DATABASE_FILE: &str = "ledger.db";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub artifacts: Option<ArtifactPolicy>,
    #[serde(default)]
    pub triggers: Vec<WebhookTrigger>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Ledger state directory
    pub home: Option<String>,
    /// Database file (defaults to `<home>/ledger.db`)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerSection {
    pub busy_timeout_ms: Option<u64>,
    pub broadcast_capacity: Option<usize>,
}

/// Environment overrides, captured once so resolution stays testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var_os("RUNLEDGER_HOME").map(PathBuf::from),
            database: std::env::var_os("RUNLEDGER_DATABASE").map(PathBuf::from),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Ledger state directory
    pub home: PathBuf,
    pub database_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub busy_timeout: Duration,
    /// Per-channel broadcast buffer
    pub broadcast_capacity: usize,
    pub artifact_policy: ArtifactPolicy,
    pub triggers: Vec<WebhookTrigger>,
}

impl LedgerConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database_path: home.join(DATABASE_FILE),
            home,
            config_file: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            broadcast_capacity: DEFAULT_CAPACITY,
            artifact_policy: ArtifactPolicy::default(),
            triggers: Vec::new(),
        }
    }

    /// Load configuration from the current directory, env and defaults
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);

        let file = match find_config_file(&cwd) {
            Some(path) => {
                let config = load_config_file(&path)?;
                Some((path, config))
            }
            None => None,
        };

        Ok(Self::resolve(file, &EnvOverrides::from_env(), default_home))
    }

    /// Combine a parsed config file, env overrides and the default home
    pub fn resolve(
        file: Option<(PathBuf, ConfigFile)>,
        env: &EnvOverrides,
        default_home: PathBuf,
    ) -> Self {
        let Some((config_path, config)) = file else {
            let home = env.home.clone().unwrap_or(default_home);
            let mut resolved = Self::with_home(home);
            if let Some(database) = &env.database {
                resolved.database_path = database.clone();
            }
            return resolved;
        };

        let config_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let home = match (&env.home, &config.paths.home) {
            (Some(home), _) => home.clone(),
            (None, Some(home)) => resolve_path(&config_dir, home),
            (None, None) => default_home,
        };

        let database_path = match (&env.database, &config.paths.database) {
            (Some(database), _) => database.clone(),
            (None, Some(database)) => resolve_path(&config_dir, database),
            (None, None) => home.join(DATABASE_FILE),
        };

        Self {
            home,
            database_path,
            config_file: Some(config_path),
            busy_timeout: config
                .ledger
                .busy_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BUSY_TIMEOUT),
            broadcast_capacity: config.ledger.broadcast_capacity.unwrap_or(DEFAULT_CAPACITY),
            artifact_policy: config.artifacts.unwrap_or_default(),
            triggers: config.triggers,
        }
    }

    /// Point at a specific database file
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Look up a webhook trigger by name
    pub fn trigger(&self, name: &str) -> Option<&WebhookTrigger> {
        self.triggers.iter().find(|t| t.name == name)
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_DIR).join("config.yaml"))
        .find(|path| path.is_file())
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        crate::core::safety::normalize_lexically(&base.join(path))
    }
}
