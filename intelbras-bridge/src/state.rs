//! The derived state model shared between protocol handlers and the MQTT
//! publisher: zone states (monotonic once triggered), availability, and the
//! last full status snapshot.

use std::collections::BTreeMap;

use isecnet_proto::status::CentralStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneState {
    #[default]
    Unknown,
    Closed,
    Open,
    Triggered,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeState {
    pub zone_states: BTreeMap<u16, ZoneState>,
    pub last_status: Option<CentralStatus>,
    pub available: bool,
    pub panic_active: bool,
    pub ac_power_ok: bool,
    pub system_battery_ok: bool,
}

impl BridgeState {
    pub fn new(zones: &[u16]) -> Self {
        Self {
            zone_states: zones.iter().map(|&z| (z, ZoneState::Unknown)).collect(),
            last_status: None,
            available: false,
            panic_active: false,
            ac_power_ok: true,
            system_battery_ok: true,
        }
    }

    /// Applies a poll result: violated -> Triggered, else open -> Open, else
    /// closed -> Closed *unless* the zone is already Triggered, in which
    /// case it sticks until an explicit disarm or restoration event clears it.
    pub fn apply_status(&mut self, status: &CentralStatus) {
        for (&zone, state) in self.zone_states.iter_mut() {
            if status.zones.violated.contains(&zone) {
                *state = ZoneState::Triggered;
            } else if status.zones.open.contains(&zone) {
                *state = ZoneState::Open;
            } else if *state != ZoneState::Triggered {
                *state = ZoneState::Closed;
            }
        }
        self.last_status = Some(status.clone());
    }

    /// Clears all `Triggered` zones back to `Closed`; used on explicit disarm.
    pub fn clear_triggered(&mut self) {
        for state in self.zone_states.values_mut() {
            if *state == ZoneState::Triggered {
                *state = ZoneState::Closed;
            }
        }
    }

    pub fn set_zone_triggered(&mut self, zone: u16) {
        self.zone_states.insert(zone, ZoneState::Triggered);
    }

    pub fn set_zone_closed(&mut self, zone: u16) {
        if self.zone_states.get(&zone) != Some(&ZoneState::Triggered) {
            self.zone_states.insert(zone, ZoneState::Closed);
        }
    }

    pub fn triggered_zones(&self) -> Vec<u16> {
        self.zone_states
            .iter()
            .filter(|(_, s)| **s == ZoneState::Triggered)
            .map(|(z, _)| *z)
            .collect()
    }

    pub fn any_triggered(&self) -> bool {
        self.zone_states.values().any(|s| *s == ZoneState::Triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isecnet_proto::status::PartialCentralStatus;

    fn status_with(violated: &[u16], open: &[u16]) -> CentralStatus {
        let mut partial = PartialCentralStatus::parse(&[0u8; 43]).unwrap();
        partial.zones.violated = violated.iter().copied().collect();
        partial.zones.open = open.iter().copied().collect();
        partial.promote()
    }

    #[test]
    fn triggered_zone_is_sticky_across_a_later_closed_poll() {
        let mut state = BridgeState::new(&[1, 2, 3]);
        state.apply_status(&status_with(&[3], &[1]));
        assert_eq!(state.zone_states[&3], ZoneState::Triggered);
        assert_eq!(state.zone_states[&1], ZoneState::Open);
        assert_eq!(state.zone_states[&2], ZoneState::Closed);

        state.apply_status(&status_with(&[], &[1]));
        assert_eq!(state.zone_states[&3], ZoneState::Triggered, "triggered must stick");
        assert_eq!(state.triggered_zones(), vec![3]);
    }

    #[test]
    fn explicit_clear_resets_triggered_zones() {
        let mut state = BridgeState::new(&[1]);
        state.set_zone_triggered(1);
        state.clear_triggered();
        assert_eq!(state.zone_states[&1], ZoneState::Closed);
    }
}
