use battnode::bus::*;
use battnode::simulation::*;
use std::time::{Duration, Instant};

fn bus_with(address: u8, device: impl Peripheral + 'static) -> I2cBus<SimulatedBus> {
    let sim = SimulatedBus::new().with_device(BusAddress::known(address), device);
    I2cBus::new(sim, Duration::from_millis(DEFAULT_TRANSACTION_TIMEOUT_MS))
}

#[test]
fn test_stretched_clock_times_out() {
    let sim = SimulatedBus::new().with_device(BusAddress::known(0x40), StretchingSim::default());
    let mut bus = I2cBus::new(sim, Duration::from_millis(20));

    let started = Instant::now();
    let result = bus.read(BusAddress::known(0x40), 2);

    assert_eq!(result, Err(BusError::Timeout));
    // Bounded by the transaction timeout, not by the peripheral
    assert!(started.elapsed() < Duration::from_secs(2));

    // The bus is usable again after the failure
    assert_eq!(bus.write(BusAddress::known(0x41), &[0x00]), Err(BusError::NoAck));
}

#[test]
fn test_missing_device_is_no_ack() {
    let mut bus = I2cBus::new(SimulatedBus::new(), Duration::from_millis(100));

    assert_eq!(bus.write(BusAddress::known(0x70), &[0x35, 0x17]), Err(BusError::NoAck));
    assert_eq!(bus.read(BusAddress::known(0x70), 6).map(|p| p.len()), Err(BusError::NoAck));
    assert_eq!(bus.probe(BusAddress::known(0x70)), Ok(false));
}

#[test]
fn test_data_byte_nack_fails_write() {
    let mut bus = bus_with(0x22, NackingSim);

    assert_eq!(bus.probe(BusAddress::known(0x22)), Ok(true));
    assert_eq!(bus.write(BusAddress::known(0x22), &[0x01, 0x02]), Err(BusError::NoAck));
}

#[test]
fn test_transfer_length_limit() {
    let mut bus = bus_with(0x10, RegisterSim::new());
    let address = BusAddress::known(0x10);

    let too_long = [0u8; MAX_TRANSFER_LEN + 1];
    assert_eq!(bus.write(address, &too_long), Err(BusError::TransferTooLong(MAX_TRANSFER_LEN + 1)));
    assert_eq!(
        bus.read(address, MAX_TRANSFER_LEN + 1).map(|p| p.len()),
        Err(BusError::TransferTooLong(MAX_TRANSFER_LEN + 1))
    );

    // Nothing reached the wire
    assert!(bus.driver().events().is_empty());
}

#[test]
fn test_register_read_framing() {
    let device = RegisterSim::new().with_register(0x0B, &[0x57, 0x00, 0xAA]);
    let mut bus = bus_with(0x55, device);
    let address = BusAddress::known(0x55);

    bus.write(address, &[0x0B]).unwrap();
    let payload = bus.read(address, 3).unwrap();
    assert_eq!(payload.as_slice(), &[0x57, 0x00, 0xAA]);

    let events = bus.driver().events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].direction, Direction::Write);
    assert_eq!(events[0].bytes, vec![0x0B]);
    assert_eq!(events[1].direction, Direction::Read);
    // Last byte of a read is answered with NACK
    assert_eq!(events[1].last_read_ack, Some(Ack::Nack));
}

#[test]
fn test_execute_transactions() {
    let device = RegisterSim::new().with_register(0x02, &[0xC3, 0x00]);
    let mut bus = bus_with(0x36, device);
    let address = BusAddress::known(0x36);

    let select = Transaction::Write {
        address,
        payload: &[0x02],
    };
    let fetch = Transaction::Read { address, count: 2 };
    assert_eq!(select.direction(), Direction::Write);
    assert_eq!(fetch.len(), 2);

    assert!(bus.execute(&select).unwrap().is_empty());
    assert_eq!(bus.execute(&fetch).unwrap().as_slice(), &[0xC3, 0x00]);
}

#[test]
fn test_scan_lists_exactly_the_responders() {
    let mut bus = I2cBus::new(standard_bus(7), Duration::from_millis(100));

    let found: Vec<u8> = bus.scan().iter().map(|a| a.raw()).collect();
    assert_eq!(found, vec![0x1A, 0x36, 0x38, 0x55, 0x70]);
}

#[test]
fn test_scan_of_empty_bus() {
    let mut bus = I2cBus::new(SimulatedBus::new(), Duration::from_millis(100));
    assert!(bus.scan().is_empty());
}

#[test]
fn test_scan_survives_stretching_device() {
    let sim = SimulatedBus::new()
        .with_device(BusAddress::known(0x08), StretchingSim::default())
        .with_device(BusAddress::known(0x50), RegisterSim::new());
    let mut bus = I2cBus::new(sim, Duration::from_millis(20));

    // Probes are zero-length writes, so a device that only stretches reads
    // still answers.
    let found: Vec<u8> = bus.scan().iter().map(|a| a.raw()).collect();
    assert_eq!(found, vec![0x08, 0x50]);
}
