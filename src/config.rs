//! TOML configuration.
//!
//! Every section has defaults, so an empty or missing file is valid. The
//! file is looked up at an explicit path, then `$TESTOPS_CONFIG`, then
//! `./testops.toml`; otherwise compiled-in defaults apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::runner::SimulationTimings;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TESTOPS_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "testops.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the configuration to use.
    ///
    /// An explicit path must load; an unreadable `$TESTOPS_CONFIG` or
    /// `./testops.toml` is skipped and reported in [`Resolved::skipped`].
    /// Nothing is logged here, since this runs before logging is set up;
    /// call [`Resolved::log`] once it is.
    pub fn resolve(explicit: Option<&Path>) -> Result<Resolved> {
        resolve_from(
            explicit,
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            Path::new(DEFAULT_CONFIG_FILE),
        )
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

#[derive(Debug)]
pub struct Resolved {
    pub config: Config,
    pub source: ConfigSource,
    /// Candidate files that existed but could not be loaded.
    pub skipped: Vec<(PathBuf, String)>,
}

impl Resolved {
    /// Report how the configuration was resolved.
    pub fn log(&self) {
        for (path, error) in &self.skipped {
            warn!(path = %path.display(), %error, "config file could not be loaded, skipped");
        }
        match &self.source {
            ConfigSource::File(path) => info!(path = %path.display(), "loaded configuration"),
            ConfigSource::Defaults => debug!("no config file found, using compiled-in defaults"),
        }
    }
}

fn resolve_from(explicit: Option<&Path>, env: Option<PathBuf>, local: &Path) -> Result<Resolved> {
    if let Some(path) = explicit {
        return Ok(Resolved {
            config: Config::load(path)?,
            source: ConfigSource::File(path.to_path_buf()),
            skipped: Vec::new(),
        });
    }

    let mut skipped = Vec::new();
    let candidates = env
        .into_iter()
        .chain(local.exists().then(|| local.to_path_buf()));
    for path in candidates {
        match Config::load(&path) {
            Ok(config) => {
                return Ok(Resolved {
                    config,
                    source: ConfigSource::File(path),
                    skipped,
                })
            }
            Err(e) => skipped.push((path, format!("{:#}", e))),
        }
    }

    Ok(Resolved {
        config: Config::default(),
        source: ConfigSource::Defaults,
        skipped,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the key/value storage area.
    pub path: String,
    /// How often to look for writes made by other processes.
    pub watch_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/testops.db".to_string(),
            watch_interval_ms: 1000,
        }
    }
}

impl StorageConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub auto_refresh: bool,
    pub refresh_interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_interval_secs: 5,
        }
    }
}

impl ReportConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub api_delay_ms: u64,
    pub ui_delay_ms: u64,
    pub jmeter_delay_ms: u64,
    pub batch_stagger_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            api_delay_ms: 2000,
            ui_delay_ms: 3000,
            jmeter_delay_ms: 5000,
            batch_stagger_ms: 1000,
        }
    }
}

impl SimulationConfig {
    pub fn timings(&self) -> SimulationTimings {
        SimulationTimings {
            api_delay: Duration::from_millis(self.api_delay_ms),
            ui_delay: Duration::from_millis(self.ui_delay_ms),
            jmeter_delay: Duration::from_millis(self.jmeter_delay_ms),
            batch_stagger: Duration::from_millis(self.batch_stagger_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = match cfg.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}
