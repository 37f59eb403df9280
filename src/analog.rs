//! Calibrated analog channel and battery current sensing.
//!
//! A [`CalibratedChannel`] can only be built from a [`CalibrationProfile`],
//! so no code path samples an uncalibrated channel.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_VREF_MV: u16 = 1100;
pub const DEFAULT_CURRENT_FULL_SCALE: f32 = 3.85;
pub const DEFAULT_CONVERSION_TIMEOUT_MS: u64 = 100;
const MIN_BIT_WIDTH: u8 = 9;
const MAX_BIT_WIDTH: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attenuation {
    Db0,
    Db2_5,
    Db6,
    Db11,
}

impl Attenuation {
    /// Nominal input voltage at the top code.
    pub fn full_scale_mv(self) -> f32 {
        match self {
            Attenuation::Db0 => 1100.0,
            Attenuation::Db2_5 => 1500.0,
            Attenuation::Db6 => 2200.0,
            Attenuation::Db11 => 3900.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationScheme {
    LineFitting,
    CurveFitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("calibration scheme {0:?} is not supported")]
    UnsupportedScheme(CalibrationScheme),
    #[error("bit width {0} is not supported")]
    UnsupportedBitWidth(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnalogError {
    #[error("conversion fault on channel {channel}")]
    Fault { channel: u8 },
    #[error("raw code {raw} above maximum {max}")]
    OutOfRange { raw: u16, max: u16 },
    #[error("conversion on channel {channel} timed out")]
    Timeout { channel: u8 },
}

/// One-shot conversions, supplied by board bring-up.
pub trait AdcReader {
    fn read(&mut self, channel: u8) -> nb::Result<u16, AnalogError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogConfig {
    pub channel: u8,
    pub attenuation: Attenuation,
    pub bit_width: u8,
    pub scheme: CalibrationScheme,
    pub vref_mv: u16,
    /// Amperes represented by the top code of the current-sense channel.
    pub v_ref: f32,
    /// Longest wait for one conversion to complete.
    pub timeout_ms: u64,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            attenuation: Attenuation::Db11,
            bit_width: 12,
            scheme: CalibrationScheme::LineFitting,
            vref_mv: DEFAULT_VREF_MV,
            v_ref: DEFAULT_CURRENT_FULL_SCALE,
            timeout_ms: DEFAULT_CONVERSION_TIMEOUT_MS,
        }
    }
}

/// Line-fit coefficients for one channel, fixed after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationProfile {
    channel: u8,
    attenuation: Attenuation,
    bit_width: u8,
    slope_mv: f32,
}

impl CalibrationProfile {
    pub fn line_fit(
        channel: u8,
        attenuation: Attenuation,
        bit_width: u8,
        scheme: CalibrationScheme,
        vref_mv: u16,
    ) -> Result<Self, CalibrationError> {
        if scheme != CalibrationScheme::LineFitting {
            return Err(CalibrationError::UnsupportedScheme(scheme));
        }
        if !(MIN_BIT_WIDTH..=MAX_BIT_WIDTH).contains(&bit_width) {
            return Err(CalibrationError::UnsupportedBitWidth(bit_width));
        }

        let max_code = f32::from(max_code_for(bit_width));
        let vref_scale = f32::from(vref_mv) / f32::from(DEFAULT_VREF_MV);

        Ok(Self {
            channel,
            attenuation,
            bit_width,
            slope_mv: attenuation.full_scale_mv() * vref_scale / max_code,
        })
    }

    pub fn from_config(config: &AnalogConfig) -> Result<Self, CalibrationError> {
        Self::line_fit(
            config.channel,
            config.attenuation,
            config.bit_width,
            config.scheme,
            config.vref_mv,
        )
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn attenuation(&self) -> Attenuation {
        self.attenuation
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    pub fn max_code(&self) -> u16 {
        max_code_for(self.bit_width)
    }

    pub fn raw_to_millivolts(&self, raw: u16) -> f32 {
        f32::from(raw) * self.slope_mv
    }
}

fn max_code_for(bit_width: u8) -> u16 {
    (1u16 << bit_width) - 1
}

/// Linear current conversion: `I = raw / max_code * v_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentSense {
    pub v_ref: f32,
}

impl Default for CurrentSense {
    fn default() -> Self {
        Self {
            v_ref: DEFAULT_CURRENT_FULL_SCALE,
        }
    }
}

impl CurrentSense {
    pub fn amps_from_raw(&self, raw: u16, max_code: u16) -> f32 {
        f32::from(raw) / f32::from(max_code) * self.v_ref
    }
}

#[derive(Debug)]
pub struct CalibratedChannel<A> {
    reader: A,
    profile: CalibrationProfile,
    timeout: Duration,
}

impl<A: AdcReader> CalibratedChannel<A> {
    pub fn new(reader: A, profile: CalibrationProfile) -> Self {
        Self {
            reader,
            profile,
            timeout: Duration::from_millis(DEFAULT_CONVERSION_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn reader_mut(&mut self) -> &mut A {
        &mut self.reader
    }

    pub fn sample_raw(&mut self) -> Result<u16, AnalogError> {
        let channel = self.profile.channel;
        let deadline = Instant::now() + self.timeout;
        let raw = loop {
            match self.reader.read(channel) {
                Ok(raw) => break raw,
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(AnalogError::Timeout { channel });
                    }
                    std::thread::yield_now();
                }
            }
        };
        let max = self.profile.max_code();
        if raw > max {
            return Err(AnalogError::OutOfRange { raw, max });
        }
        Ok(raw)
    }

    pub fn sample_millivolts(&mut self) -> Result<f32, AnalogError> {
        let raw = self.sample_raw()?;
        Ok(self.profile.raw_to_millivolts(raw))
    }

    pub fn sample_current(&mut self, sense: &CurrentSense) -> Result<f32, AnalogError> {
        let raw = self.sample_raw()?;
        Ok(sense.amps_from_raw(raw, self.profile.max_code()))
    }
}

/// Calibrates the configured channel and hands back the only handle that
/// can sample it.
pub fn init<A: AdcReader>(reader: A, config: &AnalogConfig) -> Result<CalibratedChannel<A>, CalibrationError> {
    let profile = CalibrationProfile::from_config(config)?;
    info!(
        "ADC channel {} calibrated: line fitting, {:?}, {} bit",
        profile.channel, profile.attenuation, profile.bit_width
    );
    Ok(CalibratedChannel::new(reader, profile).with_timeout(Duration::from_millis(config.timeout_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_code_maps_to_v_ref() {
        let sense = CurrentSense::default();
        assert!((sense.amps_from_raw(4095, 4095) - 3.85).abs() < 1e-6);
        assert!(sense.amps_from_raw(0, 4095).abs() < 1e-6);
    }

    #[test]
    fn test_line_fit_slope_follows_attenuation() {
        let profile =
            CalibrationProfile::line_fit(0, Attenuation::Db11, 12, CalibrationScheme::LineFitting, 1100).unwrap();
        assert!((profile.raw_to_millivolts(4095) - 3900.0).abs() < 0.01);
        assert_eq!(profile.max_code(), 4095);
    }
}
