use battnode::analog::Attenuation;
use battnode::config::*;
use battnode::sensors::{Decoder, SensorKind};
use battnode::StatusFormat;

#[test]
fn test_defaults_are_valid() {
    let config = NodeConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.cycle_interval_ms, 5000);
    assert_eq!(config.bus.timeout_ms, 1000);
    assert_eq!(config.battery.total_charge, 9000.0);
    assert_eq!(config.stale_after_failures, 3);
    assert_eq!(config.max_cycles, None);
    assert_eq!(config.sensors.len(), 1);
    assert_eq!(config.sensors[0].kind(), SensorKind::Shtc3);
}

#[test]
fn test_partial_json_fills_defaults() {
    let config = NodeConfig::from_json(
        r#"{
            "cycle_interval_ms": 1000,
            "status_format": "json",
            "analog": {"attenuation": "Db6"},
            "battery": {"initial_charge": 4500.0}
        }"#,
    )
    .unwrap();

    assert_eq!(config.cycle_interval_ms, 1000);
    assert_eq!(config.status_format, StatusFormat::Json);
    assert_eq!(config.analog.attenuation, Attenuation::Db6);
    assert_eq!(config.analog.bit_width, 12);
    assert_eq!(config.battery.initial_charge, Some(4500.0));
    assert!(config.battery.clamp_to_capacity);
}

#[test]
fn test_fuel_gauge_decoders_may_share_address() {
    let config = NodeConfig::from_json(
        r#"{"sensors": [
            {"kind": "fuel_gauge_soc"},
            {"kind": "fuel_gauge_voltage", "address": 85}
        ]}"#,
    )
    .unwrap();
    assert_eq!(config.sensors.len(), 2);
}

#[test]
fn test_duplicate_address_rejected() {
    let result = NodeConfig::from_json(
        r#"{"sensors": [
            {"kind": "shtc3"},
            {"kind": "aht2x", "address": 112}
        ]}"#,
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        r#"{"cycle_interval_ms": 0}"#,
        r#"{"stale_after_failures": 0}"#,
        r#"{"bus": {"timeout_ms": 0}}"#,
        r#"{"analog": {"v_ref": 0.0}}"#,
        r#"{"analog": {"timeout_ms": 0}}"#,
        r#"{"battery": {"total_charge": -1.0}}"#,
        r#"{"battery": {"initial_charge": 9500.0}}"#,
        r#"{"sensors": [{"kind": "aht2x", "max_busy_polls": 0}]}"#,
    ];

    for case in cases {
        assert!(
            matches!(NodeConfig::from_json(case), Err(ConfigError::Invalid(_))),
            "accepted {}",
            case
        );
    }
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(NodeConfig::from_json("{"), Err(ConfigError::Parse(_))));
    assert!(matches!(
        NodeConfig::from_json(r#"{"sensors": [{"kind": "shtc3", "address": 200}]}"#),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let result = NodeConfig::from_file("/nonexistent/battnode.json");
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_file_round_trip() {
    let mut config = NodeConfig::default();
    config.max_cycles = Some(12);
    config.sensors.push(Decoder::Tvoc(Default::default()));

    let path = std::env::temp_dir().join(format!("battnode-config-{}.json", std::process::id()));
    std::fs::write(&path, config.to_json_pretty().unwrap()).unwrap();
    let loaded = NodeConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded, config);
}
