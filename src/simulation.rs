//! Simulated board: a byte-level bus with modelled peripherals, an ADC and
//! the charger status pins.
//!
//! The peripherals answer the same command sequences as the real parts, so
//! the decoders run unchanged against them. Every completed bus
//! transaction is recorded for inspection.

use crate::analog::{AdcReader, AnalogError};
use crate::bus::{Ack, BusAddress, BusDriver, BusError, Direction};
use crate::power::StatusInputs;
use crate::sensors::{aht2x, fuel_gauge, shtc3, tvoc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

/// Deterministic noise source.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        // Numerical Recipes parameters
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.state >> 16) as u32
    }

    /// Uniform in `[-span, span]`.
    pub fn jitter(&mut self, span: u16) -> i32 {
        if span == 0 {
            return 0;
        }
        let width = u32::from(span) * 2 + 1;
        i32::try_from(self.next_u32() % width).unwrap_or(0) - i32::from(span)
    }
}

fn jittered(value: u16, rng: &mut Option<(Lcg, u16)>) -> u16 {
    match rng {
        Some((lcg, span)) => (i32::from(value) + lcg.jitter(*span)).clamp(0, i32::from(u16::MAX)) as u16,
        None => value,
    }
}

/// A device on the simulated bus.
pub trait Peripheral: Send {
    /// Called after the device recognised its address.
    fn begin(&mut self, direction: Direction) -> Ack {
        let _ = direction;
        Ack::Ack
    }

    fn write(&mut self, byte: u8) -> Ack;

    /// `WouldBlock` models clock stretching.
    fn read(&mut self) -> nb::Result<u8, BusError>;

    fn end(&mut self) {}
}

/// A completed transaction as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub address: u8,
    pub direction: Direction,
    pub bytes: Vec<u8>,
    /// Acknowledge the controller sent after the most recent read byte.
    pub last_read_ack: Option<Ack>,
}

#[derive(Default)]
pub struct SimulatedBus {
    devices: BTreeMap<u8, Box<dyn Peripheral>>,
    expecting_address: bool,
    active: Option<BusEvent>,
    events: Vec<BusEvent>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, address: BusAddress, device: impl Peripheral + 'static) {
        self.devices.insert(address.raw(), Box::new(device));
    }

    pub fn with_device(mut self, address: BusAddress, device: impl Peripheral + 'static) -> Self {
        self.attach(address, device);
        self
    }

    pub fn detach(&mut self, address: BusAddress) -> bool {
        self.devices.remove(&address.raw()).is_some()
    }

    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Payloads of completed writes to `address`, in order.
    pub fn writes_to(&self, address: BusAddress) -> impl Iterator<Item = &[u8]> + '_ {
        self.events
            .iter()
            .filter(move |e| e.address == address.raw() && e.direction == Direction::Write)
            .map(|e| e.bytes.as_slice())
    }

    /// Number of completed reads from `address`.
    pub fn reads_from(&self, address: BusAddress) -> usize {
        self.events
            .iter()
            .filter(|e| e.address == address.raw() && e.direction == Direction::Read)
            .count()
    }
}

impl core::fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedBus")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("events", &self.events.len())
            .finish()
    }
}

impl BusDriver for SimulatedBus {
    fn start(&mut self) {
        self.expecting_address = true;
        self.active = None;
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<Ack, BusError> {
        if self.expecting_address {
            self.expecting_address = false;
            let address = byte >> 1;
            let direction = Direction::from_frame_byte(byte);

            let Some(device) = self.devices.get_mut(&address) else {
                return Ok(Ack::Nack);
            };
            let ack = device.begin(direction);
            if ack == Ack::Ack {
                self.active = Some(BusEvent {
                    address,
                    direction,
                    bytes: Vec::new(),
                    last_read_ack: None,
                });
            }
            return Ok(ack);
        }

        let Some(event) = self.active.as_mut() else {
            return Ok(Ack::Nack);
        };
        let Some(device) = self.devices.get_mut(&event.address) else {
            return Ok(Ack::Nack);
        };
        let ack = device.write(byte);
        if ack == Ack::Ack {
            event.bytes.push(byte);
        }
        Ok(ack)
    }

    fn read_byte(&mut self, ack: Ack) -> nb::Result<u8, BusError> {
        let Some(event) = self.active.as_mut() else {
            return Err(nb::Error::Other(BusError::NoAck));
        };
        let Some(device) = self.devices.get_mut(&event.address) else {
            return Err(nb::Error::Other(BusError::NoAck));
        };
        let byte = device.read()?;
        event.bytes.push(byte);
        event.last_read_ack = Some(ack);
        Ok(byte)
    }

    fn stop(&mut self) {
        self.expecting_address = false;
        if let Some(event) = self.active.take() {
            if let Some(device) = self.devices.get_mut(&event.address) {
                device.end();
            }
            self.events.push(event);
        }
    }
}

/// SHTC3 model. Sleeping devices ignore everything but the wakeup command.
#[derive(Debug, Clone)]
pub struct Shtc3Sim {
    raw_temperature: u16,
    raw_humidity: u16,
    asleep: bool,
    measured: bool,
    nack_sleep: bool,
    nack_reads: bool,
    direction: Direction,
    command: Vec<u8>,
    frame: [u8; shtc3::FRAME_LEN],
    cursor: usize,
    noise: Option<(Lcg, u16)>,
}

impl Shtc3Sim {
    pub fn new(raw_temperature: u16, raw_humidity: u16) -> Self {
        Self {
            raw_temperature,
            raw_humidity,
            asleep: true,
            measured: false,
            nack_sleep: false,
            nack_reads: false,
            direction: Direction::Write,
            command: Vec::new(),
            frame: [0; shtc3::FRAME_LEN],
            cursor: 0,
            noise: None,
        }
    }

    /// Rejects the sleep command with a NACK while awake.
    pub fn refusing_sleep(mut self) -> Self {
        self.nack_sleep = true;
        self
    }

    /// NACKs its address on every read transfer.
    pub fn refusing_reads(mut self) -> Self {
        self.nack_reads = true;
        self
    }

    pub fn with_noise(mut self, seed: u64, span: u16) -> Self {
        self.noise = Some((Lcg::new(seed), span));
        self
    }

    fn latch_measurement(&mut self) {
        let t = jittered(self.raw_temperature, &mut self.noise).to_be_bytes();
        let h = jittered(self.raw_humidity, &mut self.noise).to_be_bytes();
        self.frame = [t[0], t[1], tvoc::checksum(&t), h[0], h[1], tvoc::checksum(&h)];
        self.measured = true;
    }
}

impl Peripheral for Shtc3Sim {
    fn begin(&mut self, direction: Direction) -> Ack {
        self.direction = direction;
        self.command.clear();
        self.cursor = 0;
        if self.nack_reads && direction == Direction::Read {
            return Ack::Nack;
        }
        Ack::Ack
    }

    fn write(&mut self, byte: u8) -> Ack {
        if self.nack_sleep && !self.asleep && self.command.is_empty() && byte == shtc3::CMD_SLEEP[0] {
            return Ack::Nack;
        }
        self.command.push(byte);
        Ack::Ack
    }

    fn read(&mut self) -> nb::Result<u8, BusError> {
        let byte = if self.measured && !self.asleep {
            self.frame.get(self.cursor).copied().unwrap_or(0xFF)
        } else {
            0xFF
        };
        self.cursor += 1;
        Ok(byte)
    }

    fn end(&mut self) {
        if self.direction != Direction::Write {
            return;
        }
        let command = core::mem::take(&mut self.command);
        if command == shtc3::CMD_WAKEUP {
            self.asleep = false;
        } else if self.asleep {
            return;
        } else if command == shtc3::CMD_SLEEP {
            self.asleep = true;
        } else if command == shtc3::CMD_MEASURE {
            self.latch_measurement();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AhtReadMode {
    Status,
    Data,
}

/// AHT2x model with a configurable number of busy status polls.
#[derive(Debug, Clone)]
pub struct Aht2xSim {
    status: u8,
    raw_humidity: u32,
    raw_temperature: u32,
    busy_polls_after_trigger: u32,
    busy_remaining: u32,
    always_busy: bool,
    triggered: bool,
    status_requested: bool,
    direction: Direction,
    mode: AhtReadMode,
    command: Vec<u8>,
    cursor: usize,
}

impl Aht2xSim {
    pub fn new(raw_humidity: u32, raw_temperature: u32) -> Self {
        Self {
            status: aht2x::STATUS_CALIBRATED,
            raw_humidity: raw_humidity & 0xF_FFFF,
            raw_temperature: raw_temperature & 0xF_FFFF,
            busy_polls_after_trigger: 1,
            busy_remaining: 0,
            always_busy: false,
            triggered: false,
            status_requested: false,
            direction: Direction::Write,
            mode: AhtReadMode::Data,
            command: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    /// Status polls that report busy after each trigger.
    pub fn busy_for(mut self, polls: u32) -> Self {
        self.busy_polls_after_trigger = polls;
        self
    }

    pub fn stuck_busy(mut self) -> Self {
        self.always_busy = true;
        self
    }

    fn frame(&self) -> [u8; aht2x::FRAME_LEN] {
        let rh = self.raw_humidity;
        let t = self.raw_temperature;
        [
            self.status,
            (rh >> 12) as u8,
            (rh >> 4) as u8,
            (((rh & 0x0F) << 4) | (t >> 16)) as u8,
            (t >> 8) as u8,
            t as u8,
        ]
    }
}

impl Peripheral for Aht2xSim {
    fn begin(&mut self, direction: Direction) -> Ack {
        self.direction = direction;
        self.command.clear();
        self.cursor = 0;
        if direction == Direction::Read {
            self.mode = if self.status_requested {
                AhtReadMode::Status
            } else {
                AhtReadMode::Data
            };
            self.status_requested = false;
        }
        Ack::Ack
    }

    fn write(&mut self, byte: u8) -> Ack {
        self.command.push(byte);
        Ack::Ack
    }

    fn read(&mut self) -> nb::Result<u8, BusError> {
        let byte = match self.mode {
            AhtReadMode::Status => {
                let busy = self.triggered && (self.always_busy || self.busy_remaining > 0);
                if busy && !self.always_busy {
                    self.busy_remaining -= 1;
                }
                if busy {
                    self.status | aht2x::STATUS_BUSY
                } else {
                    self.status
                }
            }
            AhtReadMode::Data => self.frame().get(self.cursor).copied().unwrap_or(0xFF),
        };
        self.cursor += 1;
        Ok(byte)
    }

    fn end(&mut self) {
        if self.direction != Direction::Write {
            return;
        }
        if self.command == aht2x::CMD_STATUS {
            self.status_requested = true;
        } else if self.command == aht2x::CMD_TRIGGER {
            self.triggered = true;
            self.busy_remaining = self.busy_polls_after_trigger;
        }
    }
}

/// Register-pointer device: a write selects the register, reads stream its
/// bytes.
#[derive(Debug, Clone, Default)]
pub struct RegisterSim {
    registers: BTreeMap<u8, Vec<u8>>,
    pointer: u8,
    pointer_pending: bool,
    cursor: usize,
}

impl RegisterSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register(mut self, register: u8, bytes: &[u8]) -> Self {
        self.registers.insert(register, bytes.to_vec());
        self
    }

    pub fn set_register(&mut self, register: u8, bytes: &[u8]) {
        self.registers.insert(register, bytes.to_vec());
    }

    pub fn fuel_gauge_soc(percent: u16) -> Self {
        Self::new().with_register(fuel_gauge::SOC_REGISTER, &percent.to_le_bytes())
    }

    pub fn fuel_gauge_voltage(raw: u16) -> Self {
        Self::new().with_register(fuel_gauge::VCELL_REGISTER, &raw.to_be_bytes())
    }

    pub fn tvoc(concentration: u32) -> Self {
        Self::new().with_register(tvoc::DATA_REGISTER, &tvoc_frame(concentration))
    }
}

/// Four big-endian data bytes followed by their CRC.
pub fn tvoc_frame(concentration: u32) -> [u8; tvoc::FRAME_LEN] {
    let data = concentration.to_be_bytes();
    [data[0], data[1], data[2], data[3], tvoc::checksum(&data)]
}

impl Peripheral for RegisterSim {
    fn begin(&mut self, direction: Direction) -> Ack {
        self.pointer_pending = direction == Direction::Write;
        self.cursor = 0;
        Ack::Ack
    }

    fn write(&mut self, byte: u8) -> Ack {
        if self.pointer_pending {
            self.pointer = byte;
            self.pointer_pending = false;
            return Ack::Ack;
        }
        self.registers.entry(self.pointer).or_default().push(byte);
        Ack::Ack
    }

    fn read(&mut self) -> nb::Result<u8, BusError> {
        let byte = self
            .registers
            .get(&self.pointer)
            .and_then(|bytes| bytes.get(self.cursor))
            .copied()
            .unwrap_or(0xFF);
        self.cursor += 1;
        Ok(byte)
    }
}

/// Acknowledges its address and then holds the clock low forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct StretchingSim;

impl Peripheral for StretchingSim {
    fn write(&mut self, _byte: u8) -> Ack {
        Ack::Ack
    }

    fn read(&mut self) -> nb::Result<u8, BusError> {
        Err(nb::Error::WouldBlock)
    }
}

/// Acknowledges its address but NACKs every data byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct NackingSim;

impl Peripheral for NackingSim {
    fn write(&mut self, _byte: u8) -> Ack {
        Ack::Nack
    }

    fn read(&mut self) -> nb::Result<u8, BusError> {
        Ok(0xFF)
    }
}

/// ADC returning a settable code. Clones share the code and fault flag so
/// a test or the simulator can steer a channel owned by the node.
#[derive(Debug, Clone)]
pub struct SimulatedAdc {
    code: Arc<AtomicU16>,
    fault: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    noise: Option<(Lcg, u16)>,
    converting: bool,
}

impl SimulatedAdc {
    pub fn new(code: u16) -> Self {
        Self {
            code: Arc::new(AtomicU16::new(code)),
            fault: Arc::new(AtomicBool::new(false)),
            stalled: Arc::new(AtomicBool::new(false)),
            noise: None,
            converting: false,
        }
    }

    pub fn with_noise(mut self, seed: u64, span: u16) -> Self {
        self.noise = Some((Lcg::new(seed), span));
        self
    }

    pub fn set_code(&self, code: u16) {
        self.code.store(code, Ordering::Relaxed);
    }

    pub fn set_fault(&self, fault: bool) {
        self.fault.store(fault, Ordering::Relaxed);
    }

    /// A stalled converter never finishes a conversion.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }
}

impl AdcReader for SimulatedAdc {
    fn read(&mut self, channel: u8) -> nb::Result<u16, AnalogError> {
        if self.fault.load(Ordering::Relaxed) {
            return Err(nb::Error::Other(AnalogError::Fault { channel }));
        }
        if self.stalled.load(Ordering::Relaxed) {
            return Err(nb::Error::WouldBlock);
        }
        // Every conversion reports "in progress" once before completing.
        if !self.converting {
            self.converting = true;
            return Err(nb::Error::WouldBlock);
        }
        self.converting = false;
        Ok(jittered(self.code.load(Ordering::Relaxed), &mut self.noise))
    }
}

/// Charger status pins, active-low. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedInputs {
    not_power_good: Arc<AtomicBool>,
    not_charging: Arc<AtomicBool>,
}

impl SimulatedInputs {
    /// Pins start high: no charger, not charging.
    pub fn new() -> Self {
        Self {
            not_power_good: Arc::new(AtomicBool::new(true)),
            not_charging: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_levels(&self, not_power_good: bool, not_charging: bool) {
        self.not_power_good.store(not_power_good, Ordering::Relaxed);
        self.not_charging.store(not_charging, Ordering::Relaxed);
    }

    pub fn plug_charger(&self, charging: bool) {
        self.set_levels(false, !charging);
    }

    pub fn unplug_charger(&self) {
        self.set_levels(true, true);
    }
}

impl Default for SimulatedInputs {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusInputs for SimulatedInputs {
    fn not_power_good(&mut self) -> bool {
        self.not_power_good.load(Ordering::Relaxed)
    }

    fn not_charging(&mut self) -> bool {
        self.not_charging.load(Ordering::Relaxed)
    }
}

/// Bus populated with every supported sensor at its default address,
/// reading about 22 °C, 45 %RH, 87 % state of charge, 3.9 V and 120 ppb.
pub fn standard_bus(seed: u64) -> SimulatedBus {
    SimulatedBus::new()
        .with_device(shtc3::DEFAULT_ADDRESS, Shtc3Sim::new(25_090, 29_491).with_noise(seed, 40))
        .with_device(aht2x::DEFAULT_ADDRESS, Aht2xSim::new(471_859, 382_730).busy_for(2))
        .with_device(fuel_gauge::SOC_DEFAULT_ADDRESS, RegisterSim::fuel_gauge_soc(87))
        .with_device(fuel_gauge::VCELL_DEFAULT_ADDRESS, RegisterSim::fuel_gauge_voltage(49_920))
        .with_device(tvoc::DEFAULT_ADDRESS, RegisterSim::tvoc(120))
}
