//! Configuration management module
//!
//! Layered settings: built-in defaults, then an optional `hydro.toml` (or the
//! file named by `HYDRO_CONFIG_FILE`), then `HYDRO__SECTION__KEY`
//! environment variables.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::controller::ControllerOptions;
use crate::profile::ProvisionRequest;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Where readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Built-in water-chemistry simulator
    Simulated,
    /// Readings pushed over `POST /api/sensor/ingest`
    Ingest,
}

/// Controller loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSettings {
    /// Interval in milliseconds between ticks
    pub tick_interval_ms: u64,
    /// Delay in milliseconds before a dose is re-sampled
    pub dosing_delay_ms: u64,
    pub retention_hours: i64,
    pub history_capacity: usize,
    pub source: SourceKind,
    /// Seed for the simulator; random when absent
    pub simulation_seed: Option<u64>,
    /// Fraction of each dose's predicted effect the simulator applies
    pub simulation_efficacy: f64,
    /// Probability that a simulated sample fails
    pub simulation_failure_rate: f64,
    /// Start the tick loop as soon as the server is up
    pub autostart: bool,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub controller: ControllerSettings,
    /// The one system this process controls
    pub system: ProvisionRequest,
}

impl Settings {
    /// Load settings from the config file and environment
    pub fn from_env() -> Result<Self, SettingsError> {
        let file = env::var("HYDRO_CONFIG_FILE").unwrap_or_else(|_| "hydro".into());
        let settings = Self::defaults()?
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("HYDRO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Defaults plus explicit key overrides, no file or environment
    pub fn with_overrides(overrides: &[(&str, &str)]) -> Result<Self, SettingsError> {
        let mut builder = Self::defaults()?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        Ok(builder.build()?.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("controller.tick_interval_ms", 120_000_i64)?
            .set_default("controller.dosing_delay_ms", 60_000_i64)?
            .set_default("controller.retention_hours", 168_i64)?
            .set_default("controller.history_capacity", 5040_i64)?
            .set_default("controller.source", "simulated")?
            .set_default("controller.simulation_efficacy", 1.0)?
            .set_default("controller.simulation_failure_rate", 0.0)?
            .set_default("controller.autostart", true)?
            .set_default("system.facility_id", "facility-1")?
            .set_default("system.zone_id", "zone-1")?
            .set_default("system.name", "Hydroponic system")?
            .set_default("system.system_type", "nft")?
            .set_default("system.tank_capacity_liters", 200.0)
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            tick_interval: Duration::from_millis(self.controller.tick_interval_ms),
            dosing_delay: Duration::from_millis(self.controller.dosing_delay_ms),
            retention_hours: self.controller.retention_hours,
            history_capacity: self.controller.history_capacity,
        }
    }
}
