//! # Battery Telemetry Node
//!
//! Acquisition core for a battery-powered sensor node: a byte-level I2C
//! transaction layer, per-sensor protocol decoders, a calibrated current
//! channel and a coulomb-counting charge estimator, tied together by a
//! fixed-period acquisition loop that emits one status record per cycle.
//!
//! ## Features
//!
//! - **Timeout-bounded bus**: every transaction fails with a typed error
//!   instead of hanging on a stretched clock
//! - **Closed decoder set**: SHTC3, AHT2x, fuel gauge and TVOC protocols,
//!   selected by configuration
//! - **Charge estimation**: forward-Euler charge and discharge steps driven
//!   by the charger status pins
//! - **Simulated board**: modelled peripherals, ADC and status pins for the
//!   binaries and the test suite
//!
//! ## Quick Start
//!
//! ```rust
//! use battnode::simulation::{standard_bus, SimulatedAdc, SimulatedInputs};
//! use battnode::{NodeConfig, SimulatedDelay, TelemetryNode};
//!
//! let config = NodeConfig::default();
//! let mut node = TelemetryNode::from_config(
//!     &config,
//!     standard_bus(1),
//!     SimulatedAdc::new(1200),
//!     SimulatedInputs::new(),
//!     SimulatedDelay::default(),
//! )
//! .expect("default configuration is valid");
//!
//! let record = node.run_cycle();
//! println!("{}", record);
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - transactions over a signal-level driver
//! - [`sensors`] - protocol decoders
//! - [`analog`] - ADC calibration and current conversion
//! - [`power`] - charger status pins
//! - [`charge`] - coulomb counting
//! - [`node`] - the acquisition loop
//! - [`status`] - status records and sinks
//! - [`config`] - JSON configuration
//! - [`control`] - control messages for the simulated board
//! - [`simulation`] - simulated board

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod analog;
pub mod bus;
pub mod charge;
pub mod config;
pub mod control;
pub mod delay;
pub mod node;
pub mod power;
pub mod sensors;
pub mod simulation;
pub mod status;

// Re-export main public types for convenience
pub use analog::{AdcReader, AnalogConfig, CalibratedChannel, CalibrationError};
pub use bus::{BusAddress, BusDriver, BusError, I2cBus};
pub use charge::{ChargeState, ChargeStep};
pub use config::{ConfigError, NodeConfig};
pub use delay::{Delay, SimulatedDelay, StdDelay};
pub use node::{LoopState, NodeError, ShutdownSignal, TelemetryNode};
pub use power::{PowerStatusFlags, StatusInputs};
pub use sensors::{Decoder, SensorError, SensorKind, SensorReading};
pub use status::{StatusFormat, StatusRecord, StatusSink};
