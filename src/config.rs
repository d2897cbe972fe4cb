//! Configuration system
//!
//! Provides the process-wide settings, resolved once at startup:
//! - Config file loading (optional)
//! - Environment variable overrides
//! - Runtime defaults
//! - Validation
//!
//! The resolved [`Config`] is passed explicitly to the components that need
//! it; rendering stays a function of (jobs, config).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Columns shown when no `--format` is given.
pub const DEFAULT_FORMAT: &str = "JobID%>,State,Elapsed%>,TimeEff,CPUEff,MemEff";

const MAX_USER_WINDOW_DAYS: i64 = 36_500;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Table rendering defaults
    pub display: DisplayConfig,

    /// Efficiency color thresholds
    pub thresholds: ThresholdsConfig,

    /// Accounting query configuration
    pub query: QueryConfig,

    /// Paths configuration
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Default column format; a `--format` starting with `+` appends to it.
    pub format: String,
    /// Force color on or off; unset follows the terminal.
    pub color: Option<bool>,
    /// Spaces between columns.
    pub column_gap: usize,
}

/// Percent limits for efficiency coloring.
///
/// "High" columns (CPUEff, GPUEff) should be as high as possible. "Mid"
/// columns (MemEff, TimeEff, GPUMem) should have some headroom.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub high_low: f64,
    pub high_good: f64,
    pub mid_low: f64,
    pub mid_high: f64,
    pub mid_good: f64,
    pub cpu_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub sacct: String,
    pub scontrol: String,
    pub delimiter: String,
    /// How far back `--user` queries look without `--since`.
    pub user_window_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ERROR".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            color: None,
            column_gap: 2,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            high_low: 20.0,
            high_good: 80.0,
            mid_low: 20.0,
            mid_high: 90.0,
            mid_good: 60.0,
            cpu_tolerance: 1.05,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            sacct: "sacct".to_string(),
            scontrol: "scontrol".to_string(),
            delimiter: "^|^".to_string(),
            user_window_days: 7,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_directory: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sacct-eff")
                .join("logs"),
        }
    }
}

impl Config {
    /// Load configuration from environment, file, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("sacct-eff.toml"),
            PathBuf::from(".sacct-eff.toml"),
            dirs::config_dir()
                .map(|d| d.join("sacct-eff").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Logging overrides
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // Display overrides
        if let Ok(val) = env::var("SACCT_EFF_FORMAT") {
            self.display.format = val;
        }
        if let Ok(val) = env::var("SACCT_EFF_COLOR") {
            self.display.color = Some(val.parse().context("Invalid SACCT_EFF_COLOR")?);
        }

        // Query overrides
        if let Ok(val) = env::var("SACCT_EFF_SACCT") {
            self.query.sacct = val;
        }
        if let Ok(val) = env::var("SACCT_EFF_SCONTROL") {
            self.query.scontrol = val;
        }
        if let Ok(val) = env::var("SACCT_EFF_DELIMITER") {
            self.query.delimiter = val;
        }

        // Path overrides
        if let Ok(val) = env::var("SACCT_EFF_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.query.delimiter.is_empty() || self.query.delimiter.contains('\n') {
            anyhow::bail!(
                "Query delimiter must be non-empty and single line, got {:?}",
                self.query.delimiter
            );
        }

        if !(0..=MAX_USER_WINDOW_DAYS).contains(&self.query.user_window_days) {
            anyhow::bail!(
                "User window days must be between 0 and {}",
                MAX_USER_WINDOW_DAYS
            );
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("high_low", t.high_low),
            ("high_good", t.high_good),
            ("mid_low", t.mid_low),
            ("mid_high", t.mid_high),
            ("mid_good", t.mid_good),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("Threshold {} must be between 0 and 100, got {}", name, value);
            }
        }
        if t.high_low > t.high_good || t.mid_low > t.mid_good || t.mid_good > t.mid_high {
            anyhow::bail!("Thresholds are out of order: {:?}", t);
        }

        if t.cpu_tolerance < 1.0 {
            anyhow::bail!("CPU tolerance must be at least 1.0, got {}", t.cpu_tolerance);
        }

        if self.display.column_gap == 0 {
            warn!("Column gap of 0 will run columns together");
        }

        if self.logging.output != "console" && !self.paths.log_directory.exists() {
            fs::create_dir_all(&self.paths.log_directory)
                .context("Failed to create log directory")?;
        }

        Ok(())
    }

}
