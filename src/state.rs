//! Device lifecycle state.
//!
//! Tracks the monitor's reported state, tilt, and battery level across a
//! connection. Readiness derives from the state and is edge-triggered:
//! [`StateTracker::update_state`] reports a readiness change only when the
//! boolean actually flips, not on every notification.

use crate::proto::service::{StateType, Tilt};

/// Connection-scoped device state. Reset to `Unknown` on teardown.
#[derive(Debug)]
pub struct StateTracker {
    state: StateType,
    ready: bool,
    tilt: Option<Tilt>,
    battery: Option<u8>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: StateType::Unknown,
            ready: false,
            tilt: None,
            battery: None,
        }
    }

    /// Apply a reported state. Returns the new readiness value when it
    /// changed, `None` when it did not.
    pub fn update_state(&mut self, state: StateType) -> Option<bool> {
        self.state = state;
        let ready = state == StateType::Waiting;
        if ready != self.ready {
            self.ready = ready;
            Some(ready)
        } else {
            None
        }
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    /// Whether the device is waiting for a shot.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_tilt(&mut self, tilt: Option<Tilt>) {
        self.tilt = tilt;
    }

    pub fn tilt(&self) -> Option<Tilt> {
        self.tilt
    }

    /// Record a sampled battery level. Every sample is reportable, so this
    /// returns the value unconditionally clamped to 0-100.
    pub fn update_battery(&mut self, level: u8) -> u8 {
        let level = level.min(100);
        self.battery = Some(level);
        level
    }

    pub fn battery(&self) -> Option<u8> {
        self.battery
    }

    /// Drop all connection-scoped state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_is_edge_triggered() {
        let mut tracker = StateTracker::new();
        assert!(!tracker.is_ready());

        // Unknown -> Waiting flips readiness on.
        assert_eq!(tracker.update_state(StateType::Waiting), Some(true));
        // Repeated Waiting notifications do not re-fire.
        assert_eq!(tracker.update_state(StateType::Waiting), None);
        // Waiting -> Measuring flips it off.
        assert_eq!(tracker.update_state(StateType::Measuring), Some(false));
        // Standby keeps it off without an event.
        assert_eq!(tracker.update_state(StateType::Standby), None);
    }

    #[test]
    fn battery_clamps_and_stores() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.update_battery(87), 87);
        assert_eq!(tracker.update_battery(130), 100);
        assert_eq!(tracker.battery(), Some(100));
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = StateTracker::new();
        tracker.update_state(StateType::Waiting);
        tracker.set_tilt(Some(Tilt {
            roll: 1.0,
            pitch: 2.0,
        }));
        tracker.update_battery(50);

        tracker.reset();
        assert_eq!(tracker.state(), StateType::Unknown);
        assert!(!tracker.is_ready());
        assert!(tracker.tilt().is_none());
        assert!(tracker.battery().is_none());
    }
}
