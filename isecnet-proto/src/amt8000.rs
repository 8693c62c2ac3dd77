//! The AMT8000 legacy dialect: a distinct client-initiated frame layout that
//! shares the XOR checksum discipline with ISECNet but differs in framing
//! and command set.

use crate::checksum::{validate_xor_packet, xor_checksum};

pub const DST_ID: [u8; 2] = [0x00, 0x00];
pub const OUR_ID: [u8; 2] = [0x8F, 0xFF];

pub const OPCODE_AUTH: [u8; 2] = [0xF0, 0xF0];
pub const OPCODE_STATUS: [u8; 2] = [0x0B, 0x4A];
pub const OPCODE_ARM_DISARM: [u8; 2] = [0x40, 0x1E];
pub const OPCODE_PANIC: [u8; 2] = [0x40, 0x1A];
pub const OPCODE_PAIRED_SENSORS: [u8; 2] = [0x0B, 0x01];

const MAX_ZONES: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LegacyFrameError {
    #[error("frame shorter than the fixed header")]
    Truncated,
    #[error("declared length does not match the frame size")]
    LengthMismatch,
    #[error("checksum mismatch")]
    BadChecksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFrame {
    pub opcode: [u8; 2],
    pub body: Vec<u8>,
}

impl LegacyFrame {
    pub fn new(opcode: [u8; 2], body: Vec<u8>) -> Self {
        Self { opcode, body }
    }

    /// `dst_id | our_id | length_be16 | opcode | body | checksum`, where
    /// `length` counts the opcode and body bytes only.
    pub fn build(&self) -> Vec<u8> {
        let length = (2 + self.body.len()) as u16;
        let mut out = Vec::with_capacity(4 + 2 + 2 + self.body.len() + 1);
        out.extend_from_slice(&DST_ID);
        out.extend_from_slice(&OUR_ID);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&self.opcode);
        out.extend_from_slice(&self.body);
        let checksum = xor_checksum(&out);
        out.push(checksum);
        out
    }

    pub fn parse(raw: &[u8]) -> Result<Self, LegacyFrameError> {
        if raw.len() < 9 {
            return Err(LegacyFrameError::Truncated);
        }
        let length = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        if raw.len() != 6 + length + 1 {
            return Err(LegacyFrameError::LengthMismatch);
        }
        if !validate_xor_packet(raw) {
            return Err(LegacyFrameError::BadChecksum);
        }
        let opcode = [raw[6], raw[7]];
        let body = raw[8..raw.len() - 1].to_vec();
        Ok(Self { opcode, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    Partial,
    ArmedAway,
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyStatus {
    pub model: u8,
    pub firmware: (u8, u8, u8),
    pub arm_state: ArmState,
    pub zones_firing: bool,
    pub all_closed: bool,
    pub siren_on: bool,
    pub has_problem: bool,
    pub zones_open: Vec<u16>,
}

/// Decodes a status reply payload (the bytes starting at offset 8 of the
/// raw legacy response, i.e. the frame body).
pub fn decode_status(payload: &[u8]) -> Option<LegacyStatus> {
    if payload.len() < 30 {
        return None;
    }
    let model = payload[0];
    let firmware = (payload[1], payload[2], payload[3]);
    let global = payload[20];
    let arm_state = match (global >> 5) & 0b11 {
        0 => ArmState::Disarmed,
        1 => ArmState::Partial,
        3 => ArmState::ArmedAway,
        other => ArmState::Unknown(other),
    };
    let zones_firing = global & 0b0000_1000 != 0;
    let all_closed = global & 0b0000_0100 != 0;
    let siren_on = global & 0b0000_0010 != 0;
    let has_problem = global & 0b0000_0001 != 0;

    let zone_bytes = &payload[22..22 + 8];
    let mut zones_open = Vec::new();
    for (i, byte) in zone_bytes.iter().enumerate() {
        for bit in 0..8u16 {
            if byte & (1 << bit) != 0 {
                let zone = i as u16 * 8 + bit + 1;
                if zone as usize <= MAX_ZONES {
                    zones_open.push(zone);
                }
            }
        }
    }

    Some(LegacyStatus {
        model,
        firmware,
        arm_state,
        zones_firing,
        all_closed,
        siren_on,
        has_problem,
        zones_open,
    })
}

/// Byte offset of the tamper flag within the status payload.
pub fn decode_tamper(payload: &[u8]) -> Option<bool> {
    payload.get(71).map(|b| b & 0b10 != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Dead,
    Low,
    Middle,
    Full,
    Unknown(u8),
}

impl BatteryLevel {
    pub fn percentage(self) -> Option<u8> {
        match self {
            BatteryLevel::Dead => Some(0),
            BatteryLevel::Low => Some(25),
            BatteryLevel::Middle => Some(75),
            BatteryLevel::Full => Some(100),
            BatteryLevel::Unknown(_) => None,
        }
    }
}

pub fn decode_battery(payload: &[u8]) -> Option<BatteryLevel> {
    payload.get(134).map(|&b| match b {
        1 => BatteryLevel::Dead,
        2 => BatteryLevel::Low,
        3 => BatteryLevel::Middle,
        4 => BatteryLevel::Full,
        other => BatteryLevel::Unknown(other),
    })
}

/// Builds the auth payload: device type, six password digits, software version.
pub fn auth_body(password: &str, device_type: u8, software_version: u8) -> Option<Vec<u8>> {
    if password.len() != 6 || !password.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut body = Vec::with_capacity(8);
    body.push(device_type);
    body.extend(password.bytes().map(|b| b - b'0'));
    body.push(software_version);
    Some(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    BadPassword,
    BadSoftwareVersion,
    Callback,
    WaitingUser,
    Unknown(u8),
}

/// `reply` is the raw socket response; the auth result code sits at offset 8.
pub fn decode_auth_result(reply: &[u8]) -> Option<AuthResult> {
    reply.get(8).map(|&b| match b {
        0 => AuthResult::Ok,
        1 => AuthResult::BadPassword,
        2 => AuthResult::BadSoftwareVersion,
        3 => AuthResult::Callback,
        4 => AuthResult::WaitingUser,
        other => AuthResult::Unknown(other),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmResult {
    Armed,
    ArmedWithBypass,
    Failed,
}

/// `reply` is the raw socket response to an arm command; the result sits at offset 9.
pub fn decode_arm_result(reply: &[u8]) -> ArmResult {
    match reply.get(9) {
        Some(0x91) => ArmResult::Armed,
        Some(0x99) => ArmResult::ArmedWithBypass,
        _ => ArmResult::Failed,
    }
}

/// `reply` is the raw socket response to a disarm command; offset 9 carries `0x90` on success.
pub fn decode_disarm_ok(reply: &[u8]) -> bool {
    reply.get(9) == Some(&0x90)
}

/// `reply` is the raw socket response to a panic command; offset 7 carries `0xFE` on success.
pub fn decode_panic_ok(reply: &[u8]) -> bool {
    reply.get(7) == Some(&0xFE)
}

/// Extracts the list of paired sensor zone numbers from a `paired_sensors`
/// reply: up to 8 bitmask bytes starting at raw offset 8, one bit per zone.
pub fn decode_paired_sensors(reply: &[u8]) -> Vec<u16> {
    let mut zones = Vec::new();
    for byte_index in 0..8usize {
        let Some(&byte) = reply.get(8 + byte_index) else { break };
        for bit in 0..8u16 {
            if byte & (1 << bit) != 0 {
                zones.push(byte_index as u16 * 8 + bit + 1);
            }
        }
    }
    zones
}

/// Slices the status payload out of a raw reply the way the panel actually
/// sends it: the wire length at offset 4..6 may overstate what arrived, in
/// which case everything from offset 8 onward is used instead.
pub fn extract_status_payload(raw: &[u8]) -> &[u8] {
    if raw.len() < 8 {
        return &[];
    }
    let Some(length_bytes) = raw.get(4..6) else { return &raw[8..] };
    let declared = u16::from_be_bytes([length_bytes[0], length_bytes[1]]) as usize;
    if raw.len() < 8 + declared {
        &raw[8..]
    } else {
        &raw[8..8 + declared]
    }
}

/// `partition` of `0` addresses the whole system (wire value `0xFF`).
pub fn partition_byte(partition: Option<u8>) -> u8 {
    partition.unwrap_or(0xFF)
}

pub fn arm_disarm_body(partition: Option<u8>, arm: bool) -> Vec<u8> {
    vec![partition_byte(partition), if arm { 0x01 } else { 0x00 }]
}

pub fn panic_body(panic_type: u8) -> Vec<u8> {
    vec![panic_type]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_roundtrips() {
        let frame = LegacyFrame::new(OPCODE_STATUS, vec![1, 2, 3]);
        let built = frame.build();
        assert!(validate_xor_packet(&built));
        assert_eq!(LegacyFrame::parse(&built).unwrap(), frame);
    }

    #[test]
    fn decode_status_reads_arm_state_and_zones() {
        let mut payload = vec![0u8; 135];
        payload[0] = 1;
        payload[20] = 0b011_0_0000; // ArmedAway
        payload[22] = 0b0000_0001; // zone 1 open
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.model, 1);
        assert_eq!(status.arm_state, ArmState::ArmedAway);
        assert_eq!(status.zones_open, vec![1]);
    }

    #[test]
    fn battery_percentage_mapping() {
        let mut payload = vec![0u8; 135];
        payload[134] = 3;
        assert_eq!(decode_battery(&payload), Some(BatteryLevel::Middle));
        assert_eq!(decode_battery(&payload).unwrap().percentage(), Some(75));
    }

    #[test]
    fn auth_body_requires_six_digit_password() {
        assert!(auth_body("12345", 1, 0x10).is_none());
        assert_eq!(
            auth_body("123456", 1, 0x10).unwrap(),
            vec![1, 1, 2, 3, 4, 5, 6, 0x10]
        );
    }

    #[test]
    fn arm_disarm_body_uses_0xff_for_whole_system() {
        assert_eq!(arm_disarm_body(None, true), vec![0xFF, 0x01]);
        assert_eq!(arm_disarm_body(Some(2), false), vec![0x02, 0x00]);
    }
}
