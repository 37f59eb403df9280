use battnode::bus::{BusAddress, BusError, I2cBus};
use battnode::delay::SimulatedDelay;
use battnode::sensors::*;
use battnode::simulation::*;
use std::time::Duration;

fn bus_with(address: BusAddress, device: impl Peripheral + 'static) -> I2cBus<SimulatedBus> {
    I2cBus::new(SimulatedBus::new().with_device(address, device), Duration::from_millis(100))
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected {} but got {}",
        expected,
        actual
    );
}

#[test]
fn test_shtc3_conversion_endpoints() {
    assert_close(shtc3::temperature_from_raw(0), -45.0);
    assert_close(shtc3::temperature_from_raw(u16::MAX), 130.0);
    assert_close(shtc3::humidity_from_raw(0), 0.0);
    assert_close(shtc3::humidity_from_raw(u16::MAX), 100.0);
}

#[test]
fn test_shtc3_conversion_strictly_increasing() {
    let mut last_t = shtc3::temperature_from_raw(0);
    let mut last_h = shtc3::humidity_from_raw(0);
    for raw in 1..=u16::MAX {
        let t = shtc3::temperature_from_raw(raw);
        let h = shtc3::humidity_from_raw(raw);
        assert!(t > last_t, "temperature not increasing at raw {}", raw);
        assert!(h > last_h, "humidity not increasing at raw {}", raw);
        last_t = t;
        last_h = h;
    }
}

#[test]
fn test_shtc3_measurement_sequence() {
    let mut bus = bus_with(shtc3::DEFAULT_ADDRESS, Shtc3Sim::new(0x6666, 0x8000));
    let mut delay = SimulatedDelay::default();

    let m = Shtc3::default().measure(&mut bus, &mut delay).unwrap();
    assert_close(m.temperature_c, 25.0);
    assert_close(m.humidity_percent, 50.0);

    let writes: Vec<&[u8]> = bus.driver().writes_to(shtc3::DEFAULT_ADDRESS).collect();
    assert_eq!(
        writes,
        vec![
            &shtc3::CMD_SLEEP[..],
            &shtc3::CMD_WAKEUP[..],
            &shtc3::CMD_MEASURE[..],
            &shtc3::CMD_SLEEP[..],
        ]
    );
    assert_eq!(bus.driver().reads_from(shtc3::DEFAULT_ADDRESS), 1);
    assert_eq!(delay.total_ms, 17);
}

#[test]
fn test_shtc3_sleep_failure_keeps_measurement() {
    let mut bus = bus_with(shtc3::DEFAULT_ADDRESS, Shtc3Sim::new(0x6666, 0x8000).refusing_sleep());
    let mut delay = SimulatedDelay::default();

    let m = Shtc3::default().measure(&mut bus, &mut delay).unwrap();
    assert_close(m.temperature_c, 25.0);
}

#[test]
fn test_shtc3_read_failure_still_sleeps() {
    let mut bus = bus_with(shtc3::DEFAULT_ADDRESS, Shtc3Sim::new(0x6666, 0x8000).refusing_reads());
    let mut delay = SimulatedDelay::default();

    let result = Shtc3::default().measure(&mut bus, &mut delay);
    assert_eq!(result, Err(SensorError::Bus(BusError::NoAck)));

    let writes: Vec<&[u8]> = bus.driver().writes_to(shtc3::DEFAULT_ADDRESS).collect();
    assert_eq!(
        writes,
        vec![
            &shtc3::CMD_SLEEP[..],
            &shtc3::CMD_WAKEUP[..],
            &shtc3::CMD_MEASURE[..],
            &shtc3::CMD_SLEEP[..],
        ]
    );
    assert_eq!(bus.driver().reads_from(shtc3::DEFAULT_ADDRESS), 0);
}

#[test]
fn test_shtc3_missing_device() {
    let mut bus = I2cBus::new(SimulatedBus::new(), Duration::from_millis(100));
    let mut delay = SimulatedDelay::default();

    let result = Shtc3::default().measure(&mut bus, &mut delay);
    assert_eq!(result, Err(SensorError::Bus(BusError::NoAck)));
}

#[test]
fn test_aht2x_uncalibrated_never_triggers() {
    let mut bus = bus_with(aht2x::DEFAULT_ADDRESS, Aht2xSim::new(0x80000, 0x40000).with_status(0x10));
    let mut delay = SimulatedDelay::default();

    let result = Aht2x::default().measure(&mut bus, &mut delay);
    assert_eq!(result, Err(SensorError::NotCalibrated { status: 0x10 }));

    let writes: Vec<&[u8]> = bus.driver().writes_to(aht2x::DEFAULT_ADDRESS).collect();
    assert_eq!(writes, vec![&aht2x::CMD_STATUS[..]]);
}

#[test]
fn test_aht2x_busy_polls_are_bounded() {
    let mut bus = bus_with(aht2x::DEFAULT_ADDRESS, Aht2xSim::new(0x80000, 0x40000).stuck_busy());
    let mut delay = SimulatedDelay::default();

    let result = Aht2x::default().measure(&mut bus, &mut delay);
    assert_eq!(result, Err(SensorError::BusyTimeout { polls: 10 }));

    // One calibration check plus ten busy polls, no data read
    assert_eq!(bus.driver().reads_from(aht2x::DEFAULT_ADDRESS), 11);
    let triggers = bus
        .driver()
        .writes_to(aht2x::DEFAULT_ADDRESS)
        .filter(|w| *w == aht2x::CMD_TRIGGER)
        .count();
    assert_eq!(triggers, 1);
}

#[test]
fn test_aht2x_measurement_after_busy() {
    let mut bus = bus_with(aht2x::DEFAULT_ADDRESS, Aht2xSim::new(0x80000, 0x40000).busy_for(2));
    let mut delay = SimulatedDelay::default();

    let m = Aht2x::default().measure(&mut bus, &mut delay).unwrap();
    assert_close(m.humidity_percent, 50.0);
    assert_close(m.temperature_c, 0.0);

    // Calibration check, three polls, one data frame
    assert_eq!(bus.driver().reads_from(aht2x::DEFAULT_ADDRESS), 5);
    assert_eq!(delay.total_ms, 100 + 10 + 80 + 2 * 10);
}

#[test]
fn test_aht2x_humidity_boundaries() {
    assert_eq!(aht2x::humidity_from_raw(0), 0.0);
    let top = aht2x::humidity_from_raw(0xF_FFFF);
    assert!(top < 100.0);
    assert!(top > 99.99);

    let m = aht2x::decode_frame(&[0x18, 0xFF, 0xFF, 0xF0, 0x00, 0x00]);
    assert!(m.humidity_percent < 100.0);
    assert_close(m.temperature_c, -50.0);
}

#[test]
fn test_aht2x_shared_nibble() {
    // Humidity 0x12345, temperature 0x6789A share byte 3 as 0x56
    let m = aht2x::decode_frame(&[0x18, 0x12, 0x34, 0x56, 0x78, 0x9A]);
    assert_close(m.humidity_percent, aht2x::humidity_from_raw(0x12345));
    assert_close(m.temperature_c, aht2x::temperature_from_raw(0x6789A));
}

#[test]
fn test_state_of_charge_is_little_endian() {
    let mut bus = bus_with(fuel_gauge::SOC_DEFAULT_ADDRESS, RegisterSim::fuel_gauge_soc(87));
    assert_eq!(StateOfChargeGauge::default().read_percent(&mut bus), Ok(87));

    let device = RegisterSim::new().with_register(fuel_gauge::SOC_REGISTER, &[0x2C, 0x01]);
    let mut bus = bus_with(fuel_gauge::SOC_DEFAULT_ADDRESS, device);
    // Out-of-range values pass through
    assert_eq!(StateOfChargeGauge::default().read_percent(&mut bus), Ok(300));

    let writes: Vec<&[u8]> = bus.driver().writes_to(fuel_gauge::SOC_DEFAULT_ADDRESS).collect();
    assert_eq!(writes, vec![&[fuel_gauge::SOC_REGISTER][..]]);
}

#[test]
fn test_cell_voltage_scaling() {
    let mut bus = bus_with(fuel_gauge::VCELL_DEFAULT_ADDRESS, RegisterSim::fuel_gauge_voltage(49_920));
    let volts = CellVoltageGauge::default().read_volts(&mut bus).unwrap();
    assert_close(volts, 3.9);
    assert_eq!(fuel_gauge::volts_from_raw(0), 0.0);
}

#[test]
fn test_tvoc_frame_checksum() {
    let mut bus = bus_with(tvoc::DEFAULT_ADDRESS, RegisterSim::tvoc(120));
    assert_eq!(TvocSensor::default().read_concentration(&mut bus), Ok(120));

    let mut frame = tvoc_frame(120);
    frame[3] ^= 0x01;
    let device = RegisterSim::new().with_register(tvoc::DATA_REGISTER, &frame);
    let mut bus = bus_with(tvoc::DEFAULT_ADDRESS, device);
    assert!(matches!(
        TvocSensor::default().read_concentration(&mut bus),
        Err(SensorError::CrcMismatch { .. })
    ));
}

#[test]
fn test_decoder_acquire_reports_readings() {
    let mut bus = I2cBus::new(standard_bus(3), Duration::from_millis(100));
    let mut delay = SimulatedDelay::default();

    let readings = Decoder::FuelGaugeSoc(StateOfChargeGauge::default())
        .acquire(&mut bus, &mut delay)
        .unwrap();
    assert_eq!(readings.as_slice(), &[SensorReading::StateOfCharge(87)]);

    let readings = Decoder::Shtc3(Shtc3::default()).acquire(&mut bus, &mut delay).unwrap();
    assert_eq!(readings.len(), 2);
    assert!(matches!(readings[0], SensorReading::Temperature(_)));
    assert!(matches!(readings[1], SensorReading::Humidity(_)));
}

#[test]
fn test_decoder_from_json() {
    let decoder: Decoder = serde_json::from_str(r#"{"kind":"aht2x","max_busy_polls":5}"#).unwrap();
    assert_eq!(decoder.kind(), SensorKind::Aht2x);
    assert_eq!(decoder.address(), aht2x::DEFAULT_ADDRESS);

    let decoder: Decoder = serde_json::from_str(r#"{"kind":"tvoc","address":64}"#).unwrap();
    assert_eq!(decoder.address().raw(), 0x40);

    assert!(serde_json::from_str::<Decoder>(r#"{"kind":"bme280"}"#).is_err());
}
