//! Per-cycle status record and the sinks it is delivered to.
//!
//! Sinks are best-effort and must return promptly: the acquisition loop
//! calls every sink inline once per cycle.

use crate::power::PowerStatusFlags;
use crate::sensors::{SensorKind, SensorReading};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub cycle: u64,
    pub load_current_a: f32,
    pub power: PowerStatusFlags,
    pub battery_charge: f32,
    pub battery_life_percent: f32,
    pub temperature_c: Option<f32>,
    pub humidity_percent: Option<f32>,
    pub state_of_charge_percent: Option<u16>,
    pub cell_voltage_v: Option<f32>,
    pub gas_concentration: Option<u32>,
    pub stale_sensors: Vec<SensorKind>,
}

impl StatusRecord {
    /// A record with no sensor quantities and no load current yet.
    pub fn new(cycle: u64, power: PowerStatusFlags, battery_charge: f32, battery_life_percent: f32) -> Self {
        Self {
            cycle,
            load_current_a: 0.0,
            power,
            battery_charge,
            battery_life_percent,
            temperature_c: None,
            humidity_percent: None,
            state_of_charge_percent: None,
            cell_voltage_v: None,
            gas_concentration: None,
            stale_sensors: Vec::new(),
        }
    }

    /// Fills the field for `reading` unless an earlier reading already did.
    /// `Current` always replaces the load current: the current-sense channel
    /// is its only source.
    pub fn absorb(&mut self, reading: SensorReading) {
        match reading {
            SensorReading::Temperature(t) => {
                self.temperature_c.get_or_insert(t);
            }
            SensorReading::Humidity(h) => {
                self.humidity_percent.get_or_insert(h);
            }
            SensorReading::StateOfCharge(p) => {
                self.state_of_charge_percent.get_or_insert(p);
            }
            SensorReading::CellVoltage(v) => {
                self.cell_voltage_v.get_or_insert(v);
            }
            SensorReading::GasConcentration(c) => {
                self.gas_concentration.get_or_insert(c);
            }
            SensorReading::Current(a) => self.load_current_a = a,
        }
    }

    pub fn render(&self, format: StatusFormat) -> String {
        match format {
            StatusFormat::Text => self.to_string(),
            StatusFormat::Json => serde_json::to_string(self).unwrap_or_else(|_| self.to_string()),
        }
    }
}

impl core::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Load current = {:.2} A, {}, {}, Battery Life = {:.2}, Temperature = ",
            self.load_current_a,
            self.power.power_text(),
            self.power.charge_text(),
            self.battery_life_percent,
        )?;
        match self.temperature_c {
            Some(t) => write!(f, "{:.2}", t)?,
            None => f.write_str("n/a")?,
        }
        if !self.stale_sensors.is_empty() {
            f.write_str(", stale:")?;
            for kind in &self.stale_sensors {
                write!(f, " {}", kind)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("status consumer is gone")]
    Closed,
    #[error("status delivery failed: {0}")]
    Io(#[from] std::io::Error),
}

pub trait StatusSink {
    fn publish(&mut self, record: &StatusRecord) -> Result<(), SinkError>;
}

/// Writes each record to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
    pub format: StatusFormat,
}

impl StatusSink for LogSink {
    fn publish(&mut self, record: &StatusRecord) -> Result<(), SinkError> {
        info!(target: "status", "{}", record.render(self.format));
        Ok(())
    }
}

/// Latest-value slot shared with concurrent readers. The loop is the only
/// writer; readers never hold the acquisition state.
#[derive(Debug)]
pub struct WatchSink {
    tx: watch::Sender<Option<StatusRecord>>,
}

impl WatchSink {
    pub fn new() -> (Self, watch::Receiver<Option<StatusRecord>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusRecord>> {
        self.tx.subscribe()
    }
}

impl StatusSink for WatchSink {
    fn publish(&mut self, record: &StatusRecord) -> Result<(), SinkError> {
        // Replaces the value even when nobody is subscribed.
        self.tx.send_replace(Some(record.clone()));
        Ok(())
    }
}

/// One datagram per record on a non-blocking socket.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
    format: StatusFormat,
}

impl UdpSink {
    pub fn bind(local: SocketAddr, target: SocketAddr, format: StatusFormat) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target, format })
    }
}

impl StatusSink for UdpSink {
    fn publish(&mut self, record: &StatusRecord) -> Result<(), SinkError> {
        let mut line = record.render(self.format);
        line.push_str("\r\n");
        self.socket.send_to(line.as_bytes(), self.target)?;
        Ok(())
    }
}

impl StatusSink for mpsc::Sender<StatusRecord> {
    fn publish(&mut self, record: &StatusRecord) -> Result<(), SinkError> {
        self.send(record.clone()).map_err(|_| SinkError::Closed)
    }
}
