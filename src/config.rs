//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{AcuError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Firmware link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_firmware_addr")]
    pub firmware_addr: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

/// Ground station location (WGS-84)
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default)]
    pub latitude_deg: f64,

    #[serde(default)]
    pub longitude_deg: f64,

    #[serde(default)]
    pub altitude_m: f64,
}

/// Tracking orchestrator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Train within this of target ends the move phase
    #[serde(default = "default_approach_tolerance_deg")]
    pub approach_tolerance_deg: f64,

    /// Train must stay within this for the dwell time
    #[serde(default = "default_settle_tolerance_deg")]
    pub settle_tolerance_deg: f64,

    #[serde(default = "default_settle_dwell_ms")]
    pub settle_dwell_ms: u64,

    #[serde(default = "default_settle_timeout_s")]
    pub settle_timeout_s: u64,

    /// Fixed mount tilt used by the coordinate transform
    #[serde(default)]
    pub tilt_offset_deg: f64,

    #[serde(default = "default_train_speed_deg_s")]
    pub train_speed_deg_s: f64,

    /// Speed for point-to-point slews (geostationary, sun acquisition)
    #[serde(default = "default_slew_speed_deg_s")]
    pub slew_speed_deg_s: f64,

    #[serde(default = "default_block_points")]
    pub block_points: usize,
}

/// Pass schedule generation
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_min_elevation_deg")]
    pub min_elevation_deg: f64,

    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: f64,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_telemetry_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Diagnostic log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily-rolling log file directory; stdout only when absent
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_firmware_addr() -> String { "192.168.0.10:5000".to_string() }
fn default_bind_addr() -> String { "0.0.0.0:5001".to_string() }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_connection_timeout_ms() -> u64 { 5000 }

fn default_tick_interval_ms() -> u64 { 100 }
fn default_approach_tolerance_deg() -> f64 { 1.0 }
fn default_settle_tolerance_deg() -> f64 { 0.5 }
fn default_settle_dwell_ms() -> u64 { 1000 }
fn default_settle_timeout_s() -> u64 { 300 }
fn default_train_speed_deg_s() -> f64 { 2.0 }
fn default_slew_speed_deg_s() -> f64 { 5.0 }
fn default_block_points() -> usize { 50 }

/// Longest prediction window, from config or an operator command
pub const MAX_HORIZON_HOURS: f64 = 168.0;

fn default_min_elevation_deg() -> f64 { 5.0 }
fn default_horizon_hours() -> f64 { 24.0 }

fn default_telemetry_enabled() -> bool { true }
fn default_telemetry_dir() -> String { "./logs/telemetry".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 1000 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            firmware_addr: default_firmware_addr(),
            bind_addr: default_bind_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_m: 0.0,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            approach_tolerance_deg: default_approach_tolerance_deg(),
            settle_tolerance_deg: default_settle_tolerance_deg(),
            settle_dwell_ms: default_settle_dwell_ms(),
            settle_timeout_s: default_settle_timeout_s(),
            tilt_offset_deg: 0.0,
            train_speed_deg_s: default_train_speed_deg_s(),
            slew_speed_deg_s: default_slew_speed_deg_s(),
            block_points: default_block_points(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_elevation_deg: default_min_elevation_deg(),
            horizon_hours: default_horizon_hours(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_telemetry_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> AcuError {
    AcuError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use acu_control::config::Config;
    ///
    /// let config = Config::load("config/acu.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Link
        if self.link.firmware_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(format!(
                "firmware_addr '{}' must be an ip:port address",
                self.link.firmware_addr
            )));
        }

        if self.link.bind_addr.is_empty() {
            return Err(invalid("bind_addr cannot be empty"));
        }

        if self.link.poll_interval_ms == 0 || self.link.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        if self.link.reconnect_interval_ms == 0 || self.link.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.link.connection_timeout_ms <= self.link.poll_interval_ms {
            return Err(invalid("connection_timeout_ms must exceed poll_interval_ms"));
        }

        // Site
        if !(-90.0..=90.0).contains(&self.site.latitude_deg) {
            return Err(invalid("latitude_deg must be between -90 and 90"));
        }

        if !(-180.0..=180.0).contains(&self.site.longitude_deg) {
            return Err(invalid("longitude_deg must be between -180 and 180"));
        }

        // Tracking
        let t = &self.tracking;
        if t.tick_interval_ms == 0 || t.tick_interval_ms > 1000 {
            return Err(invalid("tick_interval_ms must be between 1 and 1000"));
        }

        if t.approach_tolerance_deg <= 0.0 || t.settle_tolerance_deg <= 0.0 {
            return Err(invalid("tolerances must be positive"));
        }

        if t.settle_tolerance_deg > t.approach_tolerance_deg {
            return Err(invalid(
                "settle_tolerance_deg must not exceed approach_tolerance_deg",
            ));
        }

        if t.settle_dwell_ms > 600_000 {
            return Err(invalid("settle_dwell_ms must be at most 600000"));
        }

        if t.settle_timeout_s == 0 || t.settle_timeout_s * 1000 < t.settle_dwell_ms {
            return Err(invalid("settle_timeout_s must cover settle_dwell_ms"));
        }

        for (name, value) in [
            ("train_speed_deg_s", t.train_speed_deg_s),
            ("slew_speed_deg_s", t.slew_speed_deg_s),
        ] {
            if value <= 0.0 || value > 20.0 {
                return Err(invalid(format!("{} must be in (0, 20]", name)));
            }
        }

        if t.block_points == 0 || t.block_points > crate::icd::protocol::SAT_TRACK_BLOCK_POINTS {
            return Err(invalid(format!(
                "block_points must be between 1 and {}",
                crate::icd::protocol::SAT_TRACK_BLOCK_POINTS
            )));
        }

        // Schedule
        if !(0.0..90.0).contains(&self.schedule.min_elevation_deg) {
            return Err(invalid("min_elevation_deg must be in [0, 90)"));
        }

        let horizon = self.schedule.horizon_hours;
        if !(horizon > 0.0 && horizon <= MAX_HORIZON_HOURS) {
            return Err(invalid("horizon_hours must be in (0, 168]"));
        }

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}
