//! Fuel gauge registers: relative state of charge and cell voltage.

use super::SensorError;
use crate::bus::{BusAddress, BusDriver, I2cBus};
use serde::{Deserialize, Serialize};

pub const SOC_DEFAULT_ADDRESS: BusAddress = BusAddress::known(0x55);
pub const SOC_REGISTER: u8 = 0x0B;

pub const VCELL_DEFAULT_ADDRESS: BusAddress = BusAddress::known(0x36);
pub const VCELL_REGISTER: u8 = 0x02;
pub const VCELL_MICROVOLTS_PER_LSB: f32 = 78.125;

/// Relative state of charge, two bytes little-endian, already in percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateOfChargeGauge {
    pub address: BusAddress,
    pub register: u8,
}

impl Default for StateOfChargeGauge {
    fn default() -> Self {
        Self {
            address: SOC_DEFAULT_ADDRESS,
            register: SOC_REGISTER,
        }
    }
}

impl StateOfChargeGauge {
    /// The value is passed through unclamped; a healthy gauge reports 0..=100.
    pub fn read_percent<D: BusDriver>(&self, bus: &mut I2cBus<D>) -> Result<u16, SensorError> {
        bus.write(self.address, &[self.register])?;
        let raw = bus.read_array::<2>(self.address)?;
        Ok(u16::from_le_bytes(raw))
    }
}

/// Cell voltage, two bytes big-endian at 78.125 µV per LSB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellVoltageGauge {
    pub address: BusAddress,
    pub register: u8,
}

impl Default for CellVoltageGauge {
    fn default() -> Self {
        Self {
            address: VCELL_DEFAULT_ADDRESS,
            register: VCELL_REGISTER,
        }
    }
}

impl CellVoltageGauge {
    pub fn read_volts<D: BusDriver>(&self, bus: &mut I2cBus<D>) -> Result<f32, SensorError> {
        bus.write(self.address, &[self.register])?;
        let raw = bus.read_array::<2>(self.address)?;
        Ok(volts_from_raw(u16::from_be_bytes(raw)))
    }
}

pub fn volts_from_raw(raw: u16) -> f32 {
    f32::from(raw) * VCELL_MICROVOLTS_PER_LSB / 1_000_000.0
}
