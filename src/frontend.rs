//! Collaborators around the measurement pipeline that only need switching.

use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::events::Notifier;

/// Power gating and enables of the analog front end. Every call is
/// idempotent.
#[cfg_attr(test, automock)]
pub trait SensorFrontEnd {
    /// Voltage regulator feeding the sensing circuitry
    fn set_voltage_reference(&mut self, enabled: bool);
    fn set_voltage_sense(&mut self, enabled: bool);
    fn set_current_sense(&mut self, enabled: bool);
    /// Zero-cross comparator supply
    fn set_comparator(&mut self, enabled: bool);
    /// Level of the external voltage select jumper
    fn external_voltage_selected(&self) -> bool;
}

/// Single real-time timer; expiry wakes the subscribed task
#[cfg_attr(test, automock)]
pub trait OneShotTimer {
    fn subscribe(&mut self, notifier: Notifier);
    /// Re-arming replaces any pending expiry
    fn arm(&mut self, after: Duration);
}

/// Optional configuration board with its own supply, LED and panel/circuit
/// selector switches
#[cfg_attr(test, automock)]
pub trait BatteryPack {
    fn is_attached(&self) -> bool;
    fn is_usb_attached(&self) -> bool;
    fn set_power(&mut self, enabled: bool);
    fn led_on(&mut self);
    fn panel_id(&mut self) -> u8;
    fn circuit_id(&mut self) -> u8;
}

/// Stand-in for boards built without the battery pack connector
#[derive(Debug, Default)]
pub struct NoBatteryPack;

impl BatteryPack for NoBatteryPack {
    fn is_attached(&self) -> bool {
        false
    }

    fn is_usb_attached(&self) -> bool {
        false
    }

    fn set_power(&mut self, _enabled: bool) {}

    fn led_on(&mut self) {}

    fn panel_id(&mut self) -> u8 {
        0
    }

    fn circuit_id(&mut self) -> u8 {
        0
    }
}

/// Turns the whole sensing chain off
pub fn power_down_sensing(front_end: &mut impl SensorFrontEnd) {
    front_end.set_comparator(false);
    front_end.set_current_sense(false);
    front_end.set_voltage_sense(false);
    front_end.set_voltage_reference(false);
}
