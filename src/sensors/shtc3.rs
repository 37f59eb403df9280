//! SHTC3 temperature/humidity sensor, command-trigger protocol.
//!
//! The sensor is woken, asked for a measurement, read, and put back to
//! sleep. Putting it back to sleep happens on every exit path once the
//! wakeup command went out; a failure there is logged and never replaces
//! the outcome of the measurement itself.

use super::{Measurement, SensorError};
use crate::bus::{BusAddress, BusDriver, I2cBus};
use crate::delay::Delay;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_ADDRESS: BusAddress = BusAddress::known(0x70);

pub const CMD_SLEEP: [u8; 2] = [0xB0, 0x98];
pub const CMD_WAKEUP: [u8; 2] = [0x35, 0x17];
// Temperature first, clock stretching enabled.
pub const CMD_MEASURE: [u8; 2] = [0x7C, 0xA2];

pub const FRAME_LEN: usize = 6;
const RAW_FULL_SCALE: f32 = 65535.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shtc3 {
    pub address: BusAddress,
    pub sleep_before_wakeup: bool,
    pub sleep_settle_ms: u32,
    pub wakeup_settle_ms: u32,
    pub measure_settle_ms: u32,
}

impl Default for Shtc3 {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            sleep_before_wakeup: true,
            sleep_settle_ms: 1,
            wakeup_settle_ms: 1,
            measure_settle_ms: 15,
        }
    }
}

impl Shtc3 {
    pub fn new(address: BusAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn measure<D, T>(&self, bus: &mut I2cBus<D>, delay: &mut T) -> Result<Measurement, SensorError>
    where
        D: BusDriver,
        T: Delay,
    {
        if self.sleep_before_wakeup {
            bus.write(self.address, &CMD_SLEEP)?;
            delay.delay_ms(self.sleep_settle_ms);
        }

        bus.write(self.address, &CMD_WAKEUP)?;
        delay.delay_ms(self.wakeup_settle_ms);

        let awake = SleepOnDrop {
            bus,
            address: self.address,
        };

        awake.bus.write(self.address, &CMD_MEASURE)?;
        delay.delay_ms(self.measure_settle_ms);

        let frame = awake.bus.read_array::<FRAME_LEN>(self.address)?;
        Ok(decode_frame(&frame))
    }
}

/// Sends the sleep command when dropped.
struct SleepOnDrop<'a, D: BusDriver> {
    bus: &'a mut I2cBus<D>,
    address: BusAddress,
}

impl<D: BusDriver> Drop for SleepOnDrop<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.bus.write(self.address, &CMD_SLEEP) {
            warn!("SHTC3 at {} did not accept sleep command: {}", self.address, e);
        }
    }
}

/// Bytes 0..2 are temperature, 3..5 humidity, both big-endian. Bytes 2 and 5
/// are per-word checksums.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Measurement {
    let raw_temperature = u16::from_be_bytes([frame[0], frame[1]]);
    let raw_humidity = u16::from_be_bytes([frame[3], frame[4]]);

    Measurement {
        temperature_c: temperature_from_raw(raw_temperature),
        humidity_percent: humidity_from_raw(raw_humidity),
    }
}

pub fn temperature_from_raw(raw: u16) -> f32 {
    -45.0 + 175.0 * f32::from(raw) / RAW_FULL_SCALE
}

pub fn humidity_from_raw(raw: u16) -> f32 {
    100.0 * f32::from(raw) / RAW_FULL_SCALE
}
