use crate::analog::{self, AdcReader, CalibratedChannel, CalibrationError, CurrentSense};
use crate::bus::{BusDriver, I2cBus, ScanResult};
use crate::charge::{ChargeState, ChargeStep};
use crate::config::{ConfigError, NodeConfig};
use crate::delay::Delay;
use crate::power::{PowerStatusFlags, StatusInputs};
use crate::sensors::{Decoder, Readings, SensorKind, SensorReading};
use crate::status::{StatusRecord, StatusSink};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Init,
    Sampling,
    Reporting,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("analog channel calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NodeStats {
    pub cycles: u64,
    pub sensor_failures: u64,
    pub analog_failures: u64,
    pub sink_failures: u64,
    pub clamp_events: u64,
    pub last_cycle_time_us: u32,
}

/// Cancellation flag shared between the loop and whoever stops it. Waiting
/// on it doubles as the inter-cycle delay so a stop request cuts the wait
/// short.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`; returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct SensorSlot {
    decoder: Decoder,
    last_good: Readings,
    consecutive_failures: u32,
}

/// Owns every piece of acquisition state and runs the fixed-period cycle.
pub struct TelemetryNode<D, A, G, T> {
    bus: I2cBus<D>,
    channel: CalibratedChannel<A>,
    inputs: G,
    delay: T,
    current_sense: CurrentSense,
    sensors: Vec<SensorSlot>,
    sinks: Vec<Box<dyn StatusSink + Send>>,

    charge: ChargeState,
    interval_ms: u32,
    max_cycles: Option<u64>,
    stale_after_failures: u32,
    charge_current_a: f32,
    clamp_to_capacity: bool,

    state: LoopState,
    cycle: u64,
    last_current_a: f32,
    stats: NodeStats,
}

impl<D, A, G, T> TelemetryNode<D, A, G, T>
where
    D: BusDriver,
    A: AdcReader,
    G: StatusInputs,
    T: Delay,
{
    /// Builds a node around an already calibrated channel.
    pub fn new(bus: I2cBus<D>, channel: CalibratedChannel<A>, inputs: G, delay: T, config: &NodeConfig) -> Self {
        let battery = &config.battery;
        let charge = match battery.initial_charge {
            Some(initial) => ChargeState::with_charge(battery.total_charge, initial),
            None => ChargeState::new(battery.total_charge),
        };

        let sensors = config
            .sensors
            .iter()
            .cloned()
            .map(|decoder| SensorSlot {
                decoder,
                last_good: Readings::new(),
                consecutive_failures: 0,
            })
            .collect();

        Self {
            bus,
            channel,
            inputs,
            delay,
            current_sense: CurrentSense {
                v_ref: config.analog.v_ref,
            },
            sensors,
            sinks: Vec::new(),
            charge,
            interval_ms: config.cycle_interval_ms,
            max_cycles: config.max_cycles,
            stale_after_failures: config.stale_after_failures,
            charge_current_a: battery.charge_current_a,
            clamp_to_capacity: battery.clamp_to_capacity,
            state: LoopState::Init,
            cycle: 0,
            last_current_a: 0.0,
            stats: NodeStats::default(),
        }
    }

    /// Validates the configuration and calibrates the analog channel. A
    /// calibration failure is fatal: no node exists without a calibrated
    /// channel.
    pub fn from_config(config: &NodeConfig, driver: D, adc: A, inputs: G, delay: T) -> Result<Self, NodeError> {
        config.validate()?;

        let channel = analog::init(adc, &config.analog).map_err(|e| {
            error!("analog calibration failed: {}", e);
            e
        })?;
        let bus = I2cBus::new(driver, Duration::from_millis(config.bus.timeout_ms));

        info!(
            "telemetry node ready: {} sensors, {} ms cycle, {:.1} As capacity",
            config.sensors.len(),
            config.cycle_interval_ms,
            config.battery.total_charge
        );
        Ok(Self::new(bus, channel, inputs, delay, config))
    }

    pub fn with_sink(mut self, sink: impl StatusSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn StatusSink + Send>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn charge(&self) -> &ChargeState {
        &self.charge
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    pub fn bus_mut(&mut self) -> &mut I2cBus<D> {
        &mut self.bus
    }

    pub fn channel_mut(&mut self) -> &mut CalibratedChannel<A> {
        &mut self.channel
    }

    pub fn inputs_mut(&mut self) -> &mut G {
        &mut self.inputs
    }

    pub fn scan_bus(&mut self) -> ScanResult {
        let found = self.bus.scan();
        info!("bus scan found {} devices", found.len());
        found
    }

    /// One Sampling → Reporting pass. Sensor and analog failures are logged
    /// and papered over with the last good values; the cycle always
    /// produces a record.
    pub fn run_cycle(&mut self) -> StatusRecord {
        let cycle_start = Instant::now();
        self.state = LoopState::Sampling;

        let flags = PowerStatusFlags::read(&mut self.inputs);
        let load_current_a = self.sample_load_current();

        let step = ChargeStep::select(flags, load_current_a, self.charge_current_a);
        if let Some(unclamped) = self.charge.apply(step, self.interval_ms, self.clamp_to_capacity) {
            self.stats.clamp_events += 1;
            warn!(
                "battery charge estimate {:.2} As clamped to {:.2} As",
                unclamped,
                self.charge.battery_charge()
            );
        }

        self.acquire_sensors();

        self.state = LoopState::Reporting;
        let record = self.build_record(flags, load_current_a);
        self.publish(&record);

        debug!(
            "cycle {}: {:?}, charge {:.2} As",
            self.cycle,
            step,
            self.charge.battery_charge()
        );

        self.cycle += 1;
        self.stats.cycles += 1;
        self.stats.last_cycle_time_us = cycle_start.elapsed().as_micros() as u32;

        record
    }

    /// Runs cycles until `shutdown` fires or the configured cycle bound is
    /// reached. Returns the number of cycles completed by this call.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> u64 {
        let first_cycle = self.cycle;
        let interval = Duration::from_millis(u64::from(self.interval_ms));
        info!("telemetry loop starting, cycle interval {:?}", interval);

        loop {
            if shutdown.is_triggered() {
                info!("shutdown requested");
                break;
            }
            if self.bound_reached() {
                info!("cycle bound {} reached", self.cycle);
                break;
            }

            self.run_cycle();

            if self.bound_reached() {
                info!("cycle bound {} reached", self.cycle);
                break;
            }
            if shutdown.wait_timeout(interval) {
                info!("shutdown requested");
                break;
            }
        }

        self.shutdown();
        self.cycle - first_cycle
    }

    pub fn shutdown(&mut self) {
        self.state = LoopState::Shutdown;
        info!(
            "telemetry loop stopped after {} cycles, battery at {:.2}%",
            self.cycle,
            self.charge.battery_life_percent()
        );
    }

    fn bound_reached(&self) -> bool {
        self.max_cycles.is_some_and(|max| self.cycle >= max)
    }

    fn sample_load_current(&mut self) -> f32 {
        match self.channel.sample_current(&self.current_sense) {
            Ok(current) => {
                self.last_current_a = current;
                current
            }
            Err(e) => {
                self.stats.analog_failures += 1;
                warn!(
                    "current sample failed: {}; reusing {:.3} A",
                    e, self.last_current_a
                );
                self.last_current_a
            }
        }
    }

    fn acquire_sensors(&mut self) {
        for slot in &mut self.sensors {
            match slot.decoder.acquire(&mut self.bus, &mut self.delay) {
                Ok(readings) => {
                    if slot.consecutive_failures >= self.stale_after_failures {
                        info!("{} at {} recovered", slot.decoder.kind(), slot.decoder.address());
                    }
                    slot.last_good = readings;
                    slot.consecutive_failures = 0;
                }
                Err(e) => {
                    slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
                    self.stats.sensor_failures += 1;
                    warn!(
                        "{} at {} failed ({} in a row): {}",
                        slot.decoder.kind(),
                        slot.decoder.address(),
                        slot.consecutive_failures,
                        e
                    );
                }
            }
        }
    }

    fn build_record(&self, flags: PowerStatusFlags, load_current_a: f32) -> StatusRecord {
        let mut record = StatusRecord::new(
            self.cycle,
            flags,
            self.charge.battery_charge(),
            self.charge.battery_life_percent(),
        );
        record.absorb(SensorReading::Current(load_current_a));

        // Sensors that answered this cycle go first, in configured order.
        // Held values of failing sensors only fill what is still missing.
        let answered = self.sensors.iter().filter(|slot| slot.consecutive_failures == 0);
        let failing = self.sensors.iter().filter(|slot| slot.consecutive_failures > 0);
        for slot in answered.chain(failing) {
            for reading in &slot.last_good {
                record.absorb(*reading);
            }
        }

        record.stale_sensors = self.stale_sensors().collect();
        record
    }

    fn publish(&mut self, record: &StatusRecord) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(record) {
                self.stats.sink_failures += 1;
                debug!("status sink rejected record {}: {}", record.cycle, e);
            }
        }
    }

    pub fn stale_sensors(&self) -> impl Iterator<Item = SensorKind> + '_ {
        self.sensors
            .iter()
            .filter(|slot| slot.consecutive_failures >= self.stale_after_failures)
            .map(|slot| slot.decoder.kind())
    }
}
