//! Node configuration, loaded from JSON.

use crate::analog::AnalogConfig;
use crate::bus::DEFAULT_TRANSACTION_TIMEOUT_MS;
use crate::charge::{DEFAULT_CHARGE_CURRENT_A, DEFAULT_TOTAL_CHARGE};
use crate::sensors::{Decoder, SensorKind, Shtc3};
use crate::status::StatusFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CYCLE_INTERVAL_MS: u32 = 5000;
pub const DEFAULT_STALE_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub timeout_ms: u64,
    /// Informational; clock setup belongs to board bring-up.
    pub clock_hz: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            clock_hz: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub total_charge: f32,
    /// Starting charge; `None` starts full.
    pub initial_charge: Option<f32>,
    pub charge_current_a: f32,
    pub clamp_to_capacity: bool,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            total_charge: DEFAULT_TOTAL_CHARGE,
            initial_charge: None,
            charge_current_a: DEFAULT_CHARGE_CURRENT_A,
            clamp_to_capacity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub cycle_interval_ms: u32,
    /// `None` runs until cancelled.
    pub max_cycles: Option<u64>,
    pub stale_after_failures: u32,
    pub status_format: StatusFormat,
    pub bus: BusConfig,
    pub analog: AnalogConfig,
    pub battery: BatteryConfig,
    pub sensors: Vec<Decoder>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            max_cycles: None,
            stale_after_failures: DEFAULT_STALE_AFTER_FAILURES,
            status_format: StatusFormat::Text,
            bus: BusConfig::default(),
            analog: AnalogConfig::default(),
            battery: BatteryConfig::default(),
            sensors: vec![Decoder::Shtc3(Shtc3::default())],
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval_ms == 0 {
            return Err(invalid("cycle_interval_ms must be positive"));
        }
        if self.stale_after_failures == 0 {
            return Err(invalid("stale_after_failures must be at least 1"));
        }
        if self.bus.timeout_ms == 0 {
            return Err(invalid("bus.timeout_ms must be positive"));
        }
        if !(self.analog.v_ref.is_finite() && self.analog.v_ref > 0.0) {
            return Err(invalid("analog.v_ref must be a positive number"));
        }
        if self.analog.timeout_ms == 0 {
            return Err(invalid("analog.timeout_ms must be positive"));
        }

        let battery = &self.battery;
        if !(battery.total_charge.is_finite() && battery.total_charge > 0.0) {
            return Err(invalid("battery.total_charge must be a positive number"));
        }
        if !(battery.charge_current_a.is_finite() && battery.charge_current_a >= 0.0) {
            return Err(invalid("battery.charge_current_a must not be negative"));
        }
        if let Some(initial) = battery.initial_charge {
            if !initial.is_finite() || initial < 0.0 || initial > battery.total_charge {
                return Err(invalid("battery.initial_charge must lie within [0, total_charge]"));
            }
        }

        for sensor in &self.sensors {
            if let Decoder::Aht2x(aht) = sensor {
                if aht.max_busy_polls == 0 {
                    return Err(invalid("aht2x.max_busy_polls must be at least 1"));
                }
            }
        }

        let mut addresses: Vec<_> = self.sensors.iter().map(|s| (s.address(), s.kind())).collect();
        addresses.sort_by_key(|(address, _)| *address);
        for pair in addresses.windows(2) {
            if pair[0].0 == pair[1].0 && !shares_device(pair[0].1, pair[1].1) {
                return Err(ConfigError::Invalid(format!(
                    "sensors {} and {} share address {}",
                    pair[0].1, pair[1].1, pair[0].0
                )));
            }
        }

        Ok(())
    }
}

// The two fuel gauge decoders may sit on one physical gauge.
fn shares_device(a: SensorKind, b: SensorKind) -> bool {
    use SensorKind::{FuelGaugeSoc, FuelGaugeVoltage};
    matches!((a, b), (FuelGaugeSoc, FuelGaugeVoltage) | (FuelGaugeVoltage, FuelGaugeSoc))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
