//! Decodes the 43-byte partial and 54-byte full central status payloads
//! returned for opcodes `0x5A`/`0x5B` into a structured model.
//!
//! Byte offsets below are byte-exact against the panel's own field layout;
//! the partial and full schemas do not share a byte grid (the full payload
//! is not simply the partial payload with appended bytes), so each `parse`
//! carries its own offsets rather than delegating to the other.

use std::collections::BTreeSet;

use time::{Date, Month, PrimitiveDateTime, Time};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("partial status payload must be exactly 43 bytes, got {0}")]
    WrongPartialLength(usize),
    #[error("full status payload must be exactly 54 bytes, got {0}")]
    WrongFullLength(usize),
}

bitflags::bitflags! {
    /// Power/battery problem flags; these five bits share the same layout in
    /// both the partial (byte 28) and full (byte 35) status payloads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProblemFlags: u8 {
        const AC_FAILURE     = 0b0000_0001;
        const LOW_BATTERY     = 0b0000_0010;
        const BATTERY_ABSENT  = 0b0000_0100;
        const BATTERY_SHORT   = 0b0000_1000;
        const AUX_OVERLOAD    = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemProblems {
    pub power: ProblemFlags,
    pub keyboard_problems: Vec<u8>,
    pub keyboard_tampers: Vec<u8>,
    pub receiver_problems: Vec<u8>,
    pub pgm_expander_problems: Vec<u8>,
    pub zone_expander_problems: Vec<u8>,
    pub siren_wire_cut: bool,
    pub siren_short: bool,
    pub phone_line_cut: bool,
    pub event_comm_failure: bool,
}

impl Default for ProblemFlags {
    fn default() -> Self {
        ProblemFlags::empty()
    }
}

impl SystemProblems {
    pub fn has_problems(&self) -> bool {
        !self.power.is_empty()
            || !self.keyboard_problems.is_empty()
            || !self.keyboard_tampers.is_empty()
            || !self.receiver_problems.is_empty()
            || !self.pgm_expander_problems.is_empty()
            || !self.zone_expander_problems.is_empty()
            || self.siren_wire_cut
            || self.siren_short
            || self.phone_line_cut
            || self.event_comm_failure
    }
}

/// Extracts the set of 1-based zone numbers whose bit is set, scanning
/// `bytes` low bit first within each byte, starting the numbering at `start`.
fn parse_bitmask(bytes: &[u8], start: u16) -> BTreeSet<u16> {
    let mut zones = BTreeSet::new();
    for (byte_idx, byte) in bytes.iter().enumerate() {
        for bit in 0..8u16 {
            if byte & (1 << bit) != 0 {
                zones.insert(start + byte_idx as u16 * 8 + bit);
            }
        }
    }
    zones
}

/// Lists the 1-based bit positions set in one nibble of `byte` (low nibble
/// when `low`, else high nibble), e.g. bit 0 of the nibble becomes `1`.
fn nibble_list(byte: u8, low: bool) -> Vec<u8> {
    let nibble = if low { byte & 0x0F } else { byte >> 4 };
    (0..4u8).filter(|bit| nibble & (1 << bit) != 0).map(|bit| bit + 1).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneStatus {
    pub open: BTreeSet<u16>,
    pub violated: BTreeSet<u16>,
    pub bypassed: BTreeSet<u16>,
    pub tamper: BTreeSet<u16>,
    pub short_circuit: BTreeSet<u16>,
    pub low_battery: BTreeSet<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStatus {
    pub enabled: bool,
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub d: bool,
}

impl PartitionStatus {
    pub fn any_armed(&self) -> bool {
        self.a || self.b || self.c || self.d
    }

    pub fn all_armed(&self) -> bool {
        self.a && self.b && self.c && self.d
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgmStatus {
    states: std::collections::BTreeMap<u8, bool>,
}

impl PgmStatus {
    pub fn is_on(&self, n: u8) -> Option<bool> {
        self.states.get(&n).copied()
    }

    pub fn active_pgms(&self) -> Vec<u8> {
        self.states.iter().filter(|(_, on)| **on).map(|(n, _)| *n).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralStatus {
    pub model: u8,
    pub firmware: (u8, u8),
    pub armed: bool,
    pub triggered: bool,
    pub siren_on: bool,
    pub has_problem: bool,
    pub timestamp: Option<PrimitiveDateTime>,
    pub zones: ZoneStatus,
    pub partitions: PartitionStatus,
    pub pgms: PgmStatus,
    pub problems: SystemProblems,
    pub raw: Vec<u8>,
}

impl CentralStatus {
    pub fn firmware_string(&self) -> String {
        format!("{}.{}", self.firmware.0, self.firmware.1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCentralStatus {
    pub model: u8,
    pub firmware: (u8, u8),
    pub armed: bool,
    pub triggered: bool,
    pub siren_on: bool,
    pub has_problem: bool,
    pub timestamp: Option<PrimitiveDateTime>,
    pub zones: ZoneStatus,
    pub partitions: PartitionStatus,
    pub pgms: PgmStatus,
    pub problems: SystemProblems,
    pub raw: Vec<u8>,
}

impl PartialCentralStatus {
    /// Copies every field this partial schema tracks into a full
    /// [`CentralStatus`]; zones/partitions/PGMs not covered by the 43-byte
    /// payload are left at their empty/false defaults.
    pub fn promote(&self) -> CentralStatus {
        CentralStatus {
            model: self.model,
            firmware: self.firmware,
            armed: self.armed,
            triggered: self.triggered,
            siren_on: self.siren_on,
            has_problem: self.has_problem,
            timestamp: self.timestamp,
            zones: self.zones.clone(),
            partitions: self.partitions,
            pgms: self.pgms.clone(),
            problems: self.problems.clone(),
            raw: self.raw.clone(),
        }
    }
}

fn decode_timestamp(hour: u8, minute: u8, day: u8, month: u8, year_offset: u8) -> Option<PrimitiveDateTime> {
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(2000 + i32::from(year_offset), month, day).ok()?;
    let time = Time::from_hms(hour, minute, 0).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

fn functioning_flags(byte: u8) -> (bool, bool, bool, bool) {
    let armed = byte & 0b0000_1000 != 0;
    let triggered = byte & 0b0000_0100 != 0 || byte & 0b0100_0000 != 0;
    let siren_on = byte & 0b0000_0010 != 0;
    let has_problem = byte & 0b0000_0001 != 0 || byte & 0b0001_0000 != 0;
    (armed, triggered, siren_on, has_problem)
}

impl PartialCentralStatus {
    pub fn parse(payload: &[u8]) -> Result<Self, StatusError> {
        if payload.len() != 43 {
            return Err(StatusError::WrongPartialLength(payload.len()));
        }
        let zones = ZoneStatus {
            open: parse_bitmask(&payload[0..6], 1),
            violated: parse_bitmask(&payload[6..12], 1),
            bypassed: parse_bitmask(&payload[12..18], 1),
            tamper: parse_bitmask(&payload[33..35], 1),
            short_circuit: parse_bitmask(&payload[35..37], 1),
            low_battery: parse_bitmask(&payload[38..43], 1),
        };
        let model = payload[18];
        let firmware = (payload[19] >> 4, payload[19] & 0x0F);
        let enabled = payload[20] & 0x01 != 0;
        let partitions = PartitionStatus {
            enabled,
            a: payload[21] & 0b01 != 0,
            b: payload[21] & 0b10 != 0,
            c: false,
            d: false,
        };
        let (armed, triggered, mut siren_on, has_problem) = functioning_flags(payload[22]);
        let timestamp = decode_timestamp(payload[23], payload[24], payload[25], payload[26], payload[27]);

        let power = ProblemFlags::from_bits_truncate(payload[28] & 0b0001_1111);
        // Byte 37 bit 2 can report the siren as on even when byte 22 didn't.
        siren_on |= payload[37] & 0b0000_0100 != 0;
        let problems = SystemProblems {
            power,
            keyboard_problems: nibble_list(payload[29], true),
            receiver_problems: nibble_list(payload[29], false),
            keyboard_tampers: nibble_list(payload[31], false),
            pgm_expander_problems: Vec::new(),
            zone_expander_problems: Vec::new(),
            siren_wire_cut: payload[32] & 0x01 != 0,
            siren_short: payload[32] & 0x02 != 0,
            phone_line_cut: payload[32] & 0x04 != 0,
            event_comm_failure: payload[32] & 0x08 != 0,
        };

        let mut pgm_states = std::collections::BTreeMap::new();
        pgm_states.insert(1, payload[37] & 0b0100_0000 != 0);
        pgm_states.insert(2, payload[37] & 0b0010_0000 != 0);
        let pgms = PgmStatus { states: pgm_states };

        Ok(Self {
            model,
            firmware,
            armed,
            triggered,
            siren_on,
            has_problem,
            timestamp,
            zones,
            partitions,
            pgms,
            problems,
            raw: payload.to_vec(),
        })
    }

    pub fn try_parse(payload: &[u8]) -> Option<Self> {
        Self::parse(payload).ok()
    }
}

impl CentralStatus {
    pub fn parse(payload: &[u8]) -> Result<Self, StatusError> {
        if payload.len() != 54 {
            return Err(StatusError::WrongFullLength(payload.len()));
        }
        let zones = ZoneStatus {
            open: parse_bitmask(&payload[0..8], 1),
            violated: parse_bitmask(&payload[8..16], 1),
            bypassed: parse_bitmask(&payload[16..24], 1),
            tamper: parse_bitmask(&payload[43..44], 1),
            short_circuit: parse_bitmask(&payload[44..45], 1),
            low_battery: parse_bitmask(&payload[46..52], 17),
        };
        let model = payload[24];
        let firmware = (payload[25] >> 4, payload[25] & 0x0F);
        let enabled = payload[26] & 0x01 != 0;
        let partitions = PartitionStatus {
            enabled,
            a: payload[27] & 0b01 != 0,
            b: payload[27] & 0b10 != 0,
            c: payload[28] & 0b01 != 0,
            d: payload[28] & 0b10 != 0,
        };
        let (armed, triggered, siren_on, has_problem) = functioning_flags(payload[29]);
        let timestamp = decode_timestamp(payload[30], payload[31], payload[32], payload[33], payload[34]);

        let power = ProblemFlags::from_bits_truncate(payload[35] & 0b0001_1111);
        let mut zone_expander_problems = nibble_list(payload[37], false);
        if payload[38] & 0x01 != 0 {
            zone_expander_problems.push(5);
        }
        if payload[38] & 0x02 != 0 {
            zone_expander_problems.push(6);
        }
        let problems = SystemProblems {
            power,
            keyboard_problems: nibble_list(payload[36], true),
            receiver_problems: nibble_list(payload[36], false),
            keyboard_tampers: nibble_list(payload[41], false),
            pgm_expander_problems: nibble_list(payload[37], true),
            zone_expander_problems,
            siren_wire_cut: payload[42] & 0x01 != 0,
            siren_short: payload[42] & 0x02 != 0,
            phone_line_cut: payload[42] & 0x04 != 0,
            event_comm_failure: payload[42] & 0x08 != 0,
        };

        let mut pgm_states = std::collections::BTreeMap::new();
        pgm_states.insert(1, payload[45] & 0b0100_0000 != 0);
        pgm_states.insert(2, payload[45] & 0b0010_0000 != 0);
        pgm_states.insert(3, payload[45] & 0b0001_0000 != 0);
        for bit in 0..8u8 {
            pgm_states.insert(4 + bit, payload[52] & (1 << bit) != 0);
        }
        for bit in 0..8u8 {
            pgm_states.insert(12 + bit, payload[53] & (1 << bit) != 0);
        }
        let pgms = PgmStatus { states: pgm_states };

        Ok(Self {
            model,
            firmware,
            armed,
            triggered,
            siren_on,
            has_problem,
            timestamp,
            zones,
            partitions,
            pgms,
            problems,
            raw: payload.to_vec(),
        })
    }

    pub fn try_parse(payload: &[u8]) -> Option<Self> {
        Self::parse(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial_fixture(mut patch: impl FnMut(&mut [u8; 43])) -> [u8; 43] {
        let mut payload = [0u8; 43];
        patch(&mut payload);
        payload
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            PartialCentralStatus::parse(&[0u8; 10]),
            Err(StatusError::WrongPartialLength(10))
        );
        assert_eq!(CentralStatus::parse(&[0u8; 10]), Err(StatusError::WrongFullLength(10)));
    }

    #[test]
    fn try_parse_is_total_on_bad_length() {
        assert!(PartialCentralStatus::try_parse(&[0u8; 5]).is_none());
        assert!(CentralStatus::try_parse(&[0u8; 5]).is_none());
    }

    #[test]
    fn partial_status_scenario_partitions_and_armed_flag() {
        let payload = partial_fixture(|p| {
            p[21] = 0x03;
            p[22] = 0x08;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        assert!(status.partitions.a);
        assert!(status.partitions.b);
        assert!(status.armed);
        assert!(!status.triggered);
    }

    #[test]
    fn datetime_decoding_scenario_is_raw_hex_not_bcd() {
        let payload = partial_fixture(|p| {
            p[23] = 0x12;
            p[24] = 0x3B;
            p[25] = 0x12;
            p[26] = 0x0C;
            p[27] = 0x19;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        let ts = status.timestamp.unwrap();
        assert_eq!(ts.year(), 2025);
        assert_eq!(ts.month(), Month::December);
        assert_eq!(ts.day(), 18);
        assert_eq!(ts.hour(), 18);
        assert_eq!(ts.minute(), 59);
    }

    #[test]
    fn invalid_datetime_bytes_yield_null_not_error() {
        let payload = partial_fixture(|p| {
            p[23] = 0xFF;
            p[25] = 0xFF;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        assert!(status.timestamp.is_none());
    }

    #[test]
    fn zone_bitmask_parses_low_bit_as_first_zone() {
        let payload = partial_fixture(|p| {
            p[0] = 0b0000_0001;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        assert!(status.zones.open.contains(&1));
        assert!(!status.zones.open.contains(&2));
    }

    #[test]
    fn partial_siren_phone_problems_come_from_byte_32() {
        let payload = partial_fixture(|p| {
            p[32] = 0b0000_1111;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        assert!(status.problems.siren_wire_cut);
        assert!(status.problems.siren_short);
        assert!(status.problems.phone_line_cut);
        assert!(status.problems.event_comm_failure);
    }

    #[test]
    fn partial_byte_37_bit_2_forces_siren_on() {
        let payload = partial_fixture(|p| {
            p[37] = 0b0000_0100;
        });
        let status = PartialCentralStatus::parse(&payload).unwrap();
        assert!(status.siren_on);
    }

    #[test]
    fn promote_carries_overlapping_fields_into_full_schema() {
        let payload = partial_fixture(|p| {
            p[18] = 7;
            p[21] = 0x01;
            p[22] = 0x08;
        });
        let partial = PartialCentralStatus::parse(&payload).unwrap();
        let full = partial.promote();
        assert_eq!(full.model, 7);
        assert!(full.partitions.a);
        assert!(!full.partitions.c);
        assert!(full.armed);
    }

    #[test]
    fn full_status_parses_widened_zone_range() {
        let mut payload = [0u8; 54];
        payload[7] = 0b1000_0000; // zone 64, last bit of 8th byte
        payload[29] = 0b0000_1000; // armed
        let status = CentralStatus::parse(&payload).unwrap();
        assert!(status.zones.open.contains(&64));
        assert!(status.armed);
    }

    #[test]
    fn full_status_low_battery_zones_start_at_17() {
        let mut payload = [0u8; 54];
        payload[46] = 0b0000_0001;
        let status = CentralStatus::parse(&payload).unwrap();
        assert!(status.zones.low_battery.contains(&17));
        assert!(!status.zones.low_battery.contains(&1));
    }

    #[test]
    fn full_status_pgm_ranges_match_panel_numbering() {
        let mut payload = [0u8; 54];
        payload[52] = 0b0000_0001; // pgm 4
        payload[53] = 0b0000_0001; // pgm 12
        let status = CentralStatus::parse(&payload).unwrap();
        assert_eq!(status.pgms.is_on(4), Some(true));
        assert_eq!(status.pgms.is_on(12), Some(true));
        assert_eq!(status.pgms.is_on(11), Some(false));
    }

    #[test]
    fn full_status_expander_and_tamper_problem_bytes() {
        let mut payload = [0u8; 54];
        payload[36] = 0b0001_0001; // keyboard 1, receiver 1
        payload[37] = 0b0001_0001; // pgm expander 1, zone expander 1
        payload[38] = 0b0000_0011; // zone expander 5 and 6
        payload[41] = 0b0001_0000; // keyboard tamper 1
        payload[42] = 0b0000_1111; // siren/phone/event-comm
        let status = CentralStatus::parse(&payload).unwrap();
        assert_eq!(status.problems.keyboard_problems, vec![1]);
        assert_eq!(status.problems.receiver_problems, vec![1]);
        assert_eq!(status.problems.pgm_expander_problems, vec![1]);
        assert_eq!(status.problems.zone_expander_problems, vec![1, 5, 6]);
        assert_eq!(status.problems.keyboard_tampers, vec![1]);
        assert!(status.problems.siren_wire_cut);
        assert!(status.problems.siren_short);
        assert!(status.problems.phone_line_cut);
        assert!(status.problems.event_comm_failure);
    }
}
