//! Control messages for a node running on the simulated board.
//!
//! One JSON object per line. Commands steer the simulated charger pins and
//! load current; replies carry an `ok` flag so a client can tell them apart
//! from the status records streamed on the same connection.

use crate::bus::BusAddress;
use crate::simulation::{SimulatedAdc, SimulatedInputs};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerState {
    Unplugged,
    Plugged,
    Charging,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Charger { state: ChargerState },
    LoadCode { code: u16 },
    AdcFault { fault: bool },
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<BusAddress>,
}

impl ControlReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            devices: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            devices: Vec::new(),
        }
    }
}

/// Handles shared with the node's simulated ADC and status pins.
#[derive(Debug, Clone)]
pub struct SimulatedControls {
    inputs: SimulatedInputs,
    adc: SimulatedAdc,
    devices: Vec<BusAddress>,
}

impl SimulatedControls {
    /// `devices` is the result of the bus scan taken at startup.
    pub fn new(inputs: SimulatedInputs, adc: SimulatedAdc, devices: Vec<BusAddress>) -> Self {
        Self { inputs, adc, devices }
    }

    pub fn handle_line(&self, line: &str) -> ControlReply {
        match serde_json::from_str::<ControlCommand>(line) {
            Ok(command) => self.apply(&command),
            Err(e) => ControlReply::error(format!("invalid command: {}", e)),
        }
    }

    pub fn apply(&self, command: &ControlCommand) -> ControlReply {
        info!("control command: {:?}", command);

        match *command {
            ControlCommand::Charger { state } => {
                match state {
                    ChargerState::Unplugged => self.inputs.unplug_charger(),
                    ChargerState::Plugged => self.inputs.plug_charger(false),
                    ChargerState::Charging => self.inputs.plug_charger(true),
                }
                ControlReply::ok(format!("charger {:?}", state).to_lowercase())
            }
            ControlCommand::LoadCode { code } => {
                self.adc.set_code(code);
                ControlReply::ok(format!("load code set to {}", code))
            }
            ControlCommand::AdcFault { fault } => {
                self.adc.set_fault(fault);
                ControlReply::ok(if fault { "adc fault injected" } else { "adc fault cleared" })
            }
            ControlCommand::Scan => {
                let mut reply = ControlReply::ok(format!("{} devices", self.devices.len()));
                reply.devices.clone_from(&self.devices);
                reply
            }
        }
    }
}
