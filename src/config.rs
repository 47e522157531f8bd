//! Runner configuration
//!
//! Everything the driver needs is resolved relative to the carrier home, the
//! installation directory laid out as:
//!
//! ```text
//! <home>/
//!   bin/sqlbatch
//!   odps_config.ini
//!   extra_settings.ini
//!   libs/data-transfer-hive-udtf-1.0-SNAPSHOT-jar-with-dependencies.jar
//!   log/hive_sql/
//! ```
//!
//! Precedence, lowest first: built-in defaults, the optional JSON config
//! file, command-line flags.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunnerError;

/// Environment variable naming the carrier home.
pub const HOME_ENV: &str = "SQLBATCH_HOME";

pub const DEFAULT_ENGINE: &str = "hive";
pub const DEFAULT_PARALLELISM: usize = 20;
pub const DEFAULT_RETRIES: u32 = 5;

const ODPS_CONFIG_FILE: &str = "odps_config.ini";
const EXTRA_SETTINGS_FILE: &str = "extra_settings.ini";
const UDTF_JAR: &str = "libs/data-transfer-hive-udtf-1.0-SNAPSHOT-jar-with-dependencies.jar";
const LOG_ROOT: &str = "log/hive_sql";

/// Optional overrides read from a JSON file. Relative paths are resolved
/// against the carrier home.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub engine: Option<String>,
    pub parallelism: Option<usize>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub udtf_jar: Option<PathBuf>,
    pub odps_config: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub log_root: Option<PathBuf>,
}

impl ConfigFile {
    /// Load a config file from JSON
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub engine: Option<String>,
    pub parallelism: Option<usize>,
    pub retries: Option<u32>,
    pub settings: Option<PathBuf>,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub home: PathBuf,
    pub engine: String,
    pub parallelism: usize,
    pub retries: u32,
    pub retry_delay: Duration,
    pub udtf_jar: PathBuf,
    pub odps_config: PathBuf,
    pub settings: PathBuf,
    pub log_root: PathBuf,
}

/// Pick the carrier home: explicit flag, then `SQLBATCH_HOME`, then the
/// parent of the directory holding the executable.
pub fn resolve_home(flag: Option<PathBuf>, env: Option<OsString>) -> Result<PathBuf> {
    if let Some(home) = flag {
        return Ok(home);
    }
    if let Some(home) = env.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .with_context(|| format!("Cannot derive carrier home from {:?}", exe))
}

impl RunnerConfig {
    /// Defaults for a carrier installed at `home`.
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            parallelism: DEFAULT_PARALLELISM,
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::ZERO,
            udtf_jar: home.join(UDTF_JAR),
            odps_config: home.join(ODPS_CONFIG_FILE),
            settings: home.join(EXTRA_SETTINGS_FILE),
            log_root: home.join(LOG_ROOT),
            home,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }

    /// Layer a config file over the current values.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(engine) = &file.engine {
            self.engine = engine.clone();
        }
        if let Some(parallelism) = file.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(retries) = file.retries {
            self.retries = retries;
        }
        if let Some(ms) = file.retry_delay_ms {
            self.retry_delay = Duration::from_millis(ms);
        }
        if let Some(path) = &file.udtf_jar {
            self.udtf_jar = self.resolve(path);
        }
        if let Some(path) = &file.odps_config {
            self.odps_config = self.resolve(path);
        }
        if let Some(path) = &file.settings {
            self.settings = self.resolve(path);
        }
        if let Some(path) = &file.log_root {
            self.log_root = self.resolve(path);
        }
    }

    /// Layer command-line flags over the current values. A settings path
    /// given on the command line is taken as-is (relative to the caller's
    /// working directory).
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(engine) = &overrides.engine {
            self.engine = engine.clone();
        }
        if let Some(parallelism) = overrides.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(settings) = &overrides.settings {
            self.settings = settings.clone();
        }
    }

    /// Check values and that every required resource exists.
    pub fn validate(&self) -> std::result::Result<(), RunnerError> {
        if self.parallelism == 0 {
            return Err(RunnerError::config("parallelism must be at least 1"));
        }
        if self.engine.trim().is_empty() {
            return Err(RunnerError::config("engine program must not be empty"));
        }
        for path in [&self.odps_config, &self.udtf_jar, &self.settings] {
            if !path.exists() {
                return Err(RunnerError::missing(path.clone()));
            }
        }
        Ok(())
    }
}
