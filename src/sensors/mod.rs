pub mod aht2x;
pub mod fuel_gauge;
pub mod shtc3;
pub mod tvoc;

pub use aht2x::Aht2x;
pub use fuel_gauge::{CellVoltageGauge, StateOfChargeGauge};
pub use shtc3::Shtc3;
pub use tvoc::TvocSensor;

use crate::bus::{BusAddress, BusDriver, BusError, I2cBus};
use crate::delay::Delay;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_READINGS_PER_SENSOR: usize = 2;

/// A decoded value in engineering units. Bus decoders never produce
/// `Current`; the node wraps the current-sense sample in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SensorReading {
    Temperature(f32),
    Humidity(f32),
    GasConcentration(u32),
    StateOfCharge(u16),
    CellVoltage(f32),
    Current(f32),
}

pub type Readings = Vec<SensorReading, MAX_READINGS_PER_SENSOR>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("sensor not calibrated (status {status:#04x})")]
    NotCalibrated { status: u8 },
    #[error("sensor still busy after {polls} status polls")]
    BusyTimeout { polls: u32 },
    #[error("checksum mismatch: sensor sent {received:#04x}, computed {computed:#04x}")]
    CrcMismatch { received: u8, computed: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Shtc3,
    Aht2x,
    FuelGaugeSoc,
    FuelGaugeVoltage,
    Tvoc,
}

impl core::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            SensorKind::Shtc3 => "shtc3",
            SensorKind::Aht2x => "aht2x",
            SensorKind::FuelGaugeSoc => "fuel_gauge_soc",
            SensorKind::FuelGaugeVoltage => "fuel_gauge_voltage",
            SensorKind::Tvoc => "tvoc",
        };
        f.write_str(name)
    }
}

/// One variant per sensor protocol. The set is closed and chosen by
/// configuration; the serde tag is the `kind` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decoder {
    Shtc3(Shtc3),
    Aht2x(Aht2x),
    FuelGaugeSoc(StateOfChargeGauge),
    FuelGaugeVoltage(CellVoltageGauge),
    Tvoc(TvocSensor),
}

impl Decoder {
    pub fn kind(&self) -> SensorKind {
        match self {
            Decoder::Shtc3(_) => SensorKind::Shtc3,
            Decoder::Aht2x(_) => SensorKind::Aht2x,
            Decoder::FuelGaugeSoc(_) => SensorKind::FuelGaugeSoc,
            Decoder::FuelGaugeVoltage(_) => SensorKind::FuelGaugeVoltage,
            Decoder::Tvoc(_) => SensorKind::Tvoc,
        }
    }

    pub fn address(&self) -> BusAddress {
        match self {
            Decoder::Shtc3(s) => s.address,
            Decoder::Aht2x(s) => s.address,
            Decoder::FuelGaugeSoc(s) => s.address,
            Decoder::FuelGaugeVoltage(s) => s.address,
            Decoder::Tvoc(s) => s.address,
        }
    }

    /// Runs the sensor's protocol once and returns its readings.
    pub fn acquire<D, T>(&self, bus: &mut I2cBus<D>, delay: &mut T) -> Result<Readings, SensorError>
    where
        D: BusDriver,
        T: Delay,
    {
        let mut readings = Readings::new();

        match self {
            Decoder::Shtc3(sensor) => {
                let m = sensor.measure(bus, delay)?;
                let _ = readings.push(SensorReading::Temperature(m.temperature_c));
                let _ = readings.push(SensorReading::Humidity(m.humidity_percent));
            }
            Decoder::Aht2x(sensor) => {
                let m = sensor.measure(bus, delay)?;
                let _ = readings.push(SensorReading::Temperature(m.temperature_c));
                let _ = readings.push(SensorReading::Humidity(m.humidity_percent));
            }
            Decoder::FuelGaugeSoc(gauge) => {
                let percent = gauge.read_percent(bus)?;
                let _ = readings.push(SensorReading::StateOfCharge(percent));
            }
            Decoder::FuelGaugeVoltage(gauge) => {
                let volts = gauge.read_volts(bus)?;
                let _ = readings.push(SensorReading::CellVoltage(volts));
            }
            Decoder::Tvoc(sensor) => {
                let concentration = sensor.read_concentration(bus)?;
                let _ = readings.push(SensorReading::GasConcentration(concentration));
            }
        }

        Ok(readings)
    }
}

/// Temperature and relative humidity from one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub temperature_c: f32,
    pub humidity_percent: f32,
}
