//! AHT2x temperature/humidity sensor, calibration-checked protocol.

use super::{Measurement, SensorError};
use crate::bus::{BusAddress, BusDriver, I2cBus};
use crate::delay::Delay;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_ADDRESS: BusAddress = BusAddress::known(0x38);

pub const CMD_STATUS: [u8; 1] = [0x71];
pub const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

pub const STATUS_CALIBRATED: u8 = 0x18;
pub const STATUS_BUSY: u8 = 0x80;

pub const FRAME_LEN: usize = 6;
const RAW_MASK: u32 = 0x000F_FFFF;
const RAW_FULL_SCALE: f32 = (1u32 << 20) as f32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aht2x {
    pub address: BusAddress,
    pub power_on_settle_ms: u32,
    pub pre_trigger_ms: u32,
    pub measure_settle_ms: u32,
    pub poll_interval_ms: u32,
    pub max_busy_polls: u32,
}

impl Default for Aht2x {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            power_on_settle_ms: 100,
            pre_trigger_ms: 10,
            measure_settle_ms: 80,
            poll_interval_ms: 10,
            max_busy_polls: 10,
        }
    }
}

impl Aht2x {
    pub fn new(address: BusAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn read_status<D: BusDriver>(&self, bus: &mut I2cBus<D>) -> Result<u8, SensorError> {
        bus.write(self.address, &CMD_STATUS)?;
        let [status] = bus.read_array::<1>(self.address)?;
        Ok(status)
    }

    pub fn measure<D, T>(&self, bus: &mut I2cBus<D>, delay: &mut T) -> Result<Measurement, SensorError>
    where
        D: BusDriver,
        T: Delay,
    {
        delay.delay_ms(self.power_on_settle_ms);

        let status = self.read_status(bus)?;
        if status & STATUS_CALIBRATED != STATUS_CALIBRATED {
            return Err(SensorError::NotCalibrated { status });
        }

        delay.delay_ms(self.pre_trigger_ms);
        bus.write(self.address, &CMD_TRIGGER)?;
        delay.delay_ms(self.measure_settle_ms);

        self.wait_until_idle(bus, delay)?;

        let frame = bus.read_array::<FRAME_LEN>(self.address)?;
        Ok(decode_frame(&frame))
    }

    /// Polls the busy bit at most `max_busy_polls` times.
    fn wait_until_idle<D, T>(&self, bus: &mut I2cBus<D>, delay: &mut T) -> Result<(), SensorError>
    where
        D: BusDriver,
        T: Delay,
    {
        for poll in 1..=self.max_busy_polls {
            let status = self.read_status(bus)?;
            if status & STATUS_BUSY == 0 {
                debug!("AHT2x at {} ready after {} polls", self.address, poll);
                return Ok(());
            }
            if poll < self.max_busy_polls {
                delay.delay_ms(self.poll_interval_ms);
            }
        }

        Err(SensorError::BusyTimeout {
            polls: self.max_busy_polls,
        })
    }
}

/// Byte 0 is status; humidity and temperature are 20-bit fields packed into
/// bytes 1..6, sharing byte 3.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Measurement {
    let raw_humidity =
        ((u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4)) & RAW_MASK;
    let raw_temperature =
        (((u32::from(frame[3]) & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5])) & RAW_MASK;

    Measurement {
        temperature_c: temperature_from_raw(raw_temperature),
        humidity_percent: humidity_from_raw(raw_humidity),
    }
}

pub fn humidity_from_raw(raw: u32) -> f32 {
    (raw & RAW_MASK) as f32 / RAW_FULL_SCALE * 100.0
}

pub fn temperature_from_raw(raw: u32) -> f32 {
    (raw & RAW_MASK) as f32 / RAW_FULL_SCALE * 200.0 - 50.0
}
