//! Coulomb counting.
//!
//! Charge is kept in ampere-seconds. Each cycle applies one forward-Euler
//! step chosen from the charger flags by [`ChargeStep::select`].

use crate::power::PowerStatusFlags;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOTAL_CHARGE: f32 = 9000.0;
pub const DEFAULT_CHARGE_CURRENT_A: f32 = 0.5;

/// `charge -= current_a * interval_ms / 1000`
pub fn apply_discharge(interval_ms: u32, current_a: f32, charge: &mut f32) {
    *charge -= charge_delta(interval_ms, current_a);
}

/// `charge += charge_current_a * interval_ms / 1000`
pub fn apply_charge(interval_ms: u32, charge_current_a: f32, charge: &mut f32) {
    *charge += charge_delta(interval_ms, charge_current_a);
}

fn charge_delta(interval_ms: u32, current_a: f32) -> f32 {
    current_a * interval_ms as f32 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChargeStep {
    Discharge(f32),
    Charge(f32),
    /// Charger present but idle: it carries the load and the battery is left alone.
    Hold,
}

impl ChargeStep {
    pub fn select(flags: PowerStatusFlags, load_current_a: f32, charge_current_a: f32) -> Self {
        if flags.battery_charging {
            ChargeStep::Charge(charge_current_a)
        } else if flags.charger_present {
            ChargeStep::Hold
        } else {
            ChargeStep::Discharge(load_current_a)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeState {
    battery_charge: f32,
    total_charge: f32,
}

impl ChargeState {
    pub fn new(total_charge: f32) -> Self {
        Self {
            battery_charge: total_charge,
            total_charge,
        }
    }

    pub fn with_charge(total_charge: f32, battery_charge: f32) -> Self {
        Self {
            battery_charge,
            total_charge,
        }
    }

    pub fn battery_charge(&self) -> f32 {
        self.battery_charge
    }

    pub fn total_charge(&self) -> f32 {
        self.total_charge
    }

    pub fn battery_life_percent(&self) -> f32 {
        100.0 * self.battery_charge / self.total_charge
    }

    pub fn discharge(&mut self, interval_ms: u32, current_a: f32) {
        apply_discharge(interval_ms, current_a, &mut self.battery_charge);
    }

    pub fn charge(&mut self, interval_ms: u32, charge_current_a: f32) {
        apply_charge(interval_ms, charge_current_a, &mut self.battery_charge);
    }

    /// Applies `step`. With `clamp` set the result is held to
    /// `[0, total_charge]` and the pre-clamp value is returned when it was
    /// out of range.
    pub fn apply(&mut self, step: ChargeStep, interval_ms: u32, clamp: bool) -> Option<f32> {
        match step {
            ChargeStep::Discharge(current_a) => self.discharge(interval_ms, current_a),
            ChargeStep::Charge(current_a) => self.charge(interval_ms, current_a),
            ChargeStep::Hold => {}
        }

        if !clamp {
            return None;
        }

        let unclamped = self.battery_charge;
        self.battery_charge = unclamped.clamp(0.0, self.total_charge);
        if self.battery_charge == unclamped {
            None
        } else {
            Some(unclamped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_prefers_charging_flag() {
        let charging = PowerStatusFlags::from_levels(false, false);
        assert_eq!(ChargeStep::select(charging, 1.0, 0.5), ChargeStep::Charge(0.5));

        let idle_charger = PowerStatusFlags::from_levels(false, true);
        assert_eq!(ChargeStep::select(idle_charger, 1.0, 0.5), ChargeStep::Hold);

        let on_battery = PowerStatusFlags::from_levels(true, true);
        assert_eq!(ChargeStep::select(on_battery, 1.0, 0.5), ChargeStep::Discharge(1.0));
    }
}
