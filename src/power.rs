//! Charger status inputs.

use serde::{Deserialize, Serialize};

/// Raw levels of the charger's two open-drain status pins. Both are
/// active-low: a high level means "not present" / "not charging".
pub trait StatusInputs {
    fn not_power_good(&mut self) -> bool;
    fn not_charging(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerStatusFlags {
    pub charger_present: bool,
    pub battery_charging: bool,
}

impl PowerStatusFlags {
    pub fn from_levels(not_power_good: bool, not_charging: bool) -> Self {
        Self {
            charger_present: !not_power_good,
            battery_charging: !not_charging,
        }
    }

    pub fn read<G: StatusInputs + ?Sized>(inputs: &mut G) -> Self {
        Self::from_levels(inputs.not_power_good(), inputs.not_charging())
    }

    pub fn power_text(&self) -> &'static str {
        if self.charger_present {
            "charger connected"
        } else {
            "charger not connected"
        }
    }

    pub fn charge_text(&self) -> &'static str {
        if self.battery_charging {
            "battery charging"
        } else {
            "battery not charging"
        }
    }
}
