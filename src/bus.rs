//! Two-wire bus transaction layer.
//!
//! [`I2cBus`] frames addressed reads and writes on top of a [`BusDriver`],
//! which only knows how to raise start/stop conditions and clock single
//! bytes. Byte operations are non-blocking: a driver returns
//! `nb::Error::WouldBlock` while the peer stretches the clock, and the
//! transaction layer keeps polling until the transaction deadline passes.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Largest payload a single transaction can move.
pub const MAX_TRANSFER_LEN: usize = 32;
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 1000;

// Addresses 0 and 127 are reserved and never probed.
pub const SCAN_FIRST_ADDRESS: u8 = 1;
pub const SCAN_LAST_ADDRESS: u8 = 126;
const MAX_SCAN_RESULTS: usize = (SCAN_LAST_ADDRESS - SCAN_FIRST_ADDRESS + 1) as usize;

// Largest sensor frame is 6 bytes.
const_assert!(MAX_TRANSFER_LEN >= 6);

pub type Payload = ArrayVec<u8, MAX_TRANSFER_LEN>;
pub type ScanResult = heapless::Vec<BusAddress, MAX_SCAN_RESULTS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus transaction timed out")]
    Timeout,
    #[error("peer did not acknowledge")]
    NoAck,
    #[error("transfer of {0} bytes exceeds the transaction buffer")]
    TransferTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0:#04x} is not a 7-bit bus address")]
pub struct InvalidAddress(pub u8);

/// 7-bit peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BusAddress(u8);

impl BusAddress {
    pub const MAX: u8 = 0x7F;

    pub const fn new(raw: u8) -> Result<Self, InvalidAddress> {
        if raw > Self::MAX {
            Err(InvalidAddress(raw))
        } else {
            Ok(Self(raw))
        }
    }

    /// Address fixed at compile time. Panics (at const evaluation when used
    /// in a `const`) if `raw` does not fit in 7 bits.
    pub const fn known(raw: u8) -> Self {
        assert!(raw <= Self::MAX, "bus address must fit in 7 bits");
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// First byte on the wire: address shifted left, direction in bit 0.
    pub const fn frame_byte(self, direction: Direction) -> u8 {
        (self.0 << 1) | direction.bit()
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = InvalidAddress;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<BusAddress> for u8 {
    fn from(address: BusAddress) -> Self {
        address.0
    }
}

impl core::fmt::Display for BusAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    pub const fn bit(self) -> u8 {
        match self {
            Direction::Write => 0,
            Direction::Read => 1,
        }
    }

    pub const fn from_frame_byte(byte: u8) -> Self {
        if byte & 1 == 1 {
            Direction::Read
        } else {
            Direction::Write
        }
    }
}

/// Acknowledge bit, driven by the peer on writes and by the controller on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Nack,
}

/// Signal-level access to the bus, supplied by board bring-up.
pub trait BusDriver {
    fn start(&mut self);

    /// Clock out one byte and sample the peer's acknowledge bit.
    fn write_byte(&mut self, byte: u8) -> nb::Result<Ack, BusError>;

    /// Clock in one byte, answering with `ack`.
    fn read_byte(&mut self, ack: Ack) -> nb::Result<u8, BusError>;

    fn stop(&mut self);
}

/// A single addressed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction<'a> {
    Write { address: BusAddress, payload: &'a [u8] },
    Read { address: BusAddress, count: usize },
}

impl Transaction<'_> {
    pub fn address(&self) -> BusAddress {
        match self {
            Transaction::Write { address, .. } | Transaction::Read { address, .. } => *address,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Transaction::Write { .. } => Direction::Write,
            Transaction::Read { .. } => Direction::Read,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Transaction::Write { payload, .. } => payload.len(),
            Transaction::Read { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bus handle with a per-transaction timeout.
#[derive(Debug)]
pub struct I2cBus<D> {
    driver: D,
    timeout: Duration,
}

impl<D: BusDriver> I2cBus<D> {
    pub fn new(driver: D, timeout: Duration) -> Self {
        Self { driver, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_inner(self) -> D {
        self.driver
    }

    /// Start, address+W, payload (each byte must be ACKed), stop.
    pub fn write(&mut self, address: BusAddress, bytes: &[u8]) -> Result<(), BusError> {
        if bytes.len() > MAX_TRANSFER_LEN {
            return Err(BusError::TransferTooLong(bytes.len()));
        }

        let deadline = Instant::now() + self.timeout;
        self.driver.start();
        let result = self.write_frame(address, bytes, deadline);
        self.driver.stop();

        trace!("write {} {:02x?} -> {:?}", address, bytes, result);
        result
    }

    /// Start, address+R, `count` bytes (ACK on all but the last, which gets
    /// a NACK), stop.
    pub fn read(&mut self, address: BusAddress, count: usize) -> Result<Payload, BusError> {
        if count > MAX_TRANSFER_LEN {
            return Err(BusError::TransferTooLong(count));
        }

        let deadline = Instant::now() + self.timeout;
        self.driver.start();
        let result = self.read_frame(address, count, deadline);
        self.driver.stop();

        trace!("read {} x{} -> {:?}", address, count, result);
        result
    }

    /// Fixed-size read for sensor frames.
    pub fn read_array<const N: usize>(&mut self, address: BusAddress) -> Result<[u8; N], BusError> {
        let payload = self.read(address, N)?;
        let mut frame = [0u8; N];
        frame.copy_from_slice(&payload);
        Ok(frame)
    }

    /// Runs a transaction; writes return an empty payload.
    pub fn execute(&mut self, transaction: &Transaction<'_>) -> Result<Payload, BusError> {
        match *transaction {
            Transaction::Write { address, payload } => {
                self.write(address, payload)?;
                Ok(Payload::new())
            }
            Transaction::Read { address, count } => self.read(address, count),
        }
    }

    /// Zero-length write. `Ok(false)` when nobody answers at `address`.
    pub fn probe(&mut self, address: BusAddress) -> Result<bool, BusError> {
        match self.write(address, &[]) {
            Ok(()) => Ok(true),
            Err(BusError::NoAck) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Probes every address in [1, 126] and returns the responders in
    /// ascending order. Diagnostic use only.
    pub fn scan(&mut self) -> ScanResult {
        let mut found = ScanResult::new();

        for raw in SCAN_FIRST_ADDRESS..=SCAN_LAST_ADDRESS {
            let address = BusAddress(raw);
            match self.probe(address) {
                Ok(true) => {
                    debug!("device found at {}", address);
                    let _ = found.push(address);
                }
                Ok(false) => {}
                Err(e) => debug!("probe of {} failed: {}", address, e),
            }
        }

        found
    }

    fn write_frame(&mut self, address: BusAddress, bytes: &[u8], deadline: Instant) -> Result<(), BusError> {
        self.send(address.frame_byte(Direction::Write), deadline)?;
        for &byte in bytes {
            self.send(byte, deadline)?;
        }
        Ok(())
    }

    fn read_frame(&mut self, address: BusAddress, count: usize, deadline: Instant) -> Result<Payload, BusError> {
        self.send(address.frame_byte(Direction::Read), deadline)?;

        let mut payload = Payload::new();
        for index in 0..count {
            let ack = if index + 1 == count { Ack::Nack } else { Ack::Ack };
            let driver = &mut self.driver;
            let byte = poll_until(deadline, || driver.read_byte(ack))?;
            payload.push(byte);
        }

        Ok(payload)
    }

    fn send(&mut self, byte: u8, deadline: Instant) -> Result<(), BusError> {
        let driver = &mut self.driver;
        match poll_until(deadline, || driver.write_byte(byte))? {
            Ack::Ack => Ok(()),
            Ack::Nack => Err(BusError::NoAck),
        }
    }
}

fn poll_until<T>(deadline: Instant, mut op: impl FnMut() -> nb::Result<T, BusError>) -> Result<T, BusError> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(nb::Error::Other(e)) => return Err(e),
            Err(nb::Error::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(BusError::Timeout);
                }
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_byte_carries_direction() {
        let address = BusAddress::known(0x38);
        assert_eq!(address.frame_byte(Direction::Write), 0x70);
        assert_eq!(address.frame_byte(Direction::Read), 0x71);
        assert_eq!(Direction::from_frame_byte(0x71), Direction::Read);
    }

    #[test]
    fn test_address_range() {
        assert!(BusAddress::new(0x7F).is_ok());
        assert_eq!(BusAddress::new(0x80), Err(InvalidAddress(0x80)));
        assert_eq!(BusAddress::try_from(0x55).map(u8::from), Ok(0x55));
    }

    #[test]
    fn test_address_serde_rejects_eight_bit_values() {
        let address: BusAddress = serde_json::from_str("112").unwrap();
        assert_eq!(address.raw(), 0x70);
        assert!(serde_json::from_str::<BusAddress>("200").is_err());
    }
}
