use battnode::analog::*;
use battnode::simulation::SimulatedAdc;
use std::time::{Duration, Instant};

/// Converter whose conversion never completes.
struct NeverReady {
    polls: u32,
}

impl AdcReader for NeverReady {
    fn read(&mut self, _channel: u8) -> nb::Result<u16, AnalogError> {
        self.polls += 1;
        Err(nb::Error::WouldBlock)
    }
}

fn config() -> AnalogConfig {
    AnalogConfig::default()
}

#[test]
fn test_init_rejects_curve_fitting() {
    let mut config = config();
    config.scheme = CalibrationScheme::CurveFitting;

    let result = init(SimulatedAdc::new(0), &config);
    assert!(matches!(
        result,
        Err(CalibrationError::UnsupportedScheme(CalibrationScheme::CurveFitting))
    ));
}

#[test]
fn test_init_rejects_unsupported_bit_width() {
    for bits in [0u8, 8, 13, 16] {
        let mut config = config();
        config.bit_width = bits;
        assert!(matches!(
            init(SimulatedAdc::new(0), &config),
            Err(CalibrationError::UnsupportedBitWidth(b)) if b == bits
        ));
    }
}

#[test]
fn test_current_conversion() {
    let adc = SimulatedAdc::new(4095);
    let mut channel = init(adc.clone(), &config()).unwrap();
    let sense = CurrentSense { v_ref: 3.85 };

    let full = channel.sample_current(&sense).unwrap();
    assert!((full - 3.85).abs() < 1e-5);

    adc.set_code(0);
    assert_eq!(channel.sample_current(&sense).unwrap(), 0.0);

    adc.set_code(2048);
    let mid = channel.sample_current(&sense).unwrap();
    assert!((mid - 2048.0 / 4095.0 * 3.85).abs() < 1e-5);
}

#[test]
fn test_code_above_bit_width_is_rejected() {
    let mut config = config();
    config.bit_width = 10;
    let mut channel = init(SimulatedAdc::new(1024), &config).unwrap();

    assert_eq!(channel.profile().max_code(), 1023);
    assert_eq!(
        channel.sample_raw(),
        Err(AnalogError::OutOfRange { raw: 1024, max: 1023 })
    );
}

#[test]
fn test_fault_surfaces_as_error() {
    let adc = SimulatedAdc::new(100);
    let mut channel = init(adc.clone(), &config()).unwrap();

    adc.set_fault(true);
    assert_eq!(channel.sample_raw(), Err(AnalogError::Fault { channel: 0 }));

    adc.set_fault(false);
    assert_eq!(channel.sample_raw(), Ok(100));
}

#[test]
fn test_millivolts_follow_attenuation() {
    let mut config = config();
    config.attenuation = Attenuation::Db6;
    let mut channel = init(SimulatedAdc::new(4095), &config).unwrap();

    let mv = channel.sample_millivolts().unwrap();
    assert!((mv - 2200.0).abs() < 0.01);
}

#[test]
fn test_analog_config_from_json() {
    let config: AnalogConfig =
        serde_json::from_str(r#"{"channel":3,"attenuation":"Db2_5","v_ref":2.0}"#).unwrap();
    assert_eq!(config.channel, 3);
    assert_eq!(config.attenuation, Attenuation::Db2_5);
    assert_eq!(config.bit_width, 12);
    assert_eq!(config.scheme, CalibrationScheme::LineFitting);
}

#[test]
fn test_never_ready_converter_times_out() {
    let mut config = config();
    config.channel = 2;
    config.timeout_ms = 20;
    let mut channel = init(NeverReady { polls: 0 }, &config).unwrap();
    assert_eq!(channel.timeout(), Duration::from_millis(20));

    let started = Instant::now();
    assert_eq!(channel.sample_raw(), Err(AnalogError::Timeout { channel: 2 }));
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(channel.reader_mut().polls > 1);

    let sense = CurrentSense::default();
    assert_eq!(
        channel.sample_current(&sense),
        Err(AnalogError::Timeout { channel: 2 })
    );
}

#[test]
fn test_stalled_converter_recovers() {
    let adc = SimulatedAdc::new(300);
    let mut channel = init(adc.clone(), &config()).unwrap().with_timeout(Duration::from_millis(5));

    adc.set_stalled(true);
    assert_eq!(channel.sample_raw(), Err(AnalogError::Timeout { channel: 0 }));

    adc.set_stalled(false);
    assert_eq!(channel.sample_raw(), Ok(300));
}
