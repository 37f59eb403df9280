//! Gas/TVOC sensor: 4 data bytes followed by a CRC-8.

use super::SensorError;
use crate::bus::{BusAddress, BusDriver, I2cBus};
use crc::{Crc, CRC_8_NRSC_5};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ADDRESS: BusAddress = BusAddress::known(0x1A);
pub const DATA_REGISTER: u8 = 0x00;
pub const FRAME_LEN: usize = 5;

// Polynomial 0x31, init 0xFF, no reflection, no final xor.
const SENSIRION_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_NRSC_5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TvocSensor {
    pub address: BusAddress,
    pub register: u8,
}

impl Default for TvocSensor {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            register: DATA_REGISTER,
        }
    }
}

impl TvocSensor {
    pub fn read_concentration<D: BusDriver>(&self, bus: &mut I2cBus<D>) -> Result<u32, SensorError> {
        bus.write(self.address, &[self.register])?;
        let frame = bus.read_array::<FRAME_LEN>(self.address)?;
        decode_frame(&frame)
    }
}

pub fn checksum(data: &[u8]) -> u8 {
    SENSIRION_CRC.checksum(data)
}

/// Validates the trailing CRC before trusting the big-endian value.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<u32, SensorError> {
    let data = [frame[0], frame[1], frame[2], frame[3]];
    let received = frame[4];
    let computed = checksum(&data);

    if received != computed {
        return Err(SensorError::CrcMismatch { received, computed });
    }

    Ok(u32::from_be_bytes(data))
}
