//! Typed builders for every supported ISECNet opcode, producing full
//! ISECMobile-wrapped-in-ISECNet wire frames.

use crate::isecmobile::{MobileFrame, MobileFrameError};
use crate::isecnet::NetFrame;

pub const OPCODE_ACTIVATION: u8 = 0x41;
pub const OPCODE_DEACTIVATION: u8 = 0x44;
pub const OPCODE_SIREN_ON: u8 = 0x43;
pub const OPCODE_SIREN_OFF: u8 = 0x63;
pub const OPCODE_PGM: u8 = 0x50;
pub const OPCODE_PARTIAL_STATUS: u8 = 0x5A;
pub const OPCODE_FULL_STATUS: u8 = 0x5B;
pub const OPCODE_IDENTIFICATION: u8 = 0x94;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Frame(#[from] MobileFrameError),
    #[error("PGM output must be in 1..=19, got {0}")]
    InvalidPgmOutput(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    All,
    A,
    B,
    C,
    D,
    Stay,
}

impl Partition {
    fn body_byte(self) -> Option<u8> {
        match self {
            Partition::All => None,
            Partition::A => Some(0x41),
            Partition::B => Some(0x42),
            Partition::C => Some(0x43),
            Partition::D => Some(0x44),
            Partition::Stay => Some(0x50),
        }
    }

    fn body(self) -> Vec<u8> {
        self.body_byte().map(|b| vec![b]).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgmAction {
    On,
    Off,
}

impl PgmAction {
    fn byte(self) -> u8 {
        match self {
            PgmAction::On => 0x4C,
            PgmAction::Off => 0x44,
        }
    }
}

fn wrap(password: &str, opcode: u8, body: Vec<u8>) -> Result<NetFrame, CommandError> {
    let mobile = MobileFrame::new(password, opcode, body)?;
    Ok(NetFrame::wrap_mobile(&mobile.build()))
}

pub fn arm(password: &str, partition: Partition) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_ACTIVATION, partition.body())
}

pub fn disarm(password: &str, partition: Partition) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_DEACTIVATION, partition.body())
}

pub fn siren_on(password: &str) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_SIREN_ON, vec![])
}

pub fn siren_off(password: &str) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_SIREN_OFF, vec![])
}

pub fn pgm(password: &str, output: u8, action: PgmAction) -> Result<NetFrame, CommandError> {
    if !(1..=19).contains(&output) {
        return Err(CommandError::InvalidPgmOutput(output));
    }
    let address = 0x30 + output;
    wrap(password, OPCODE_PGM, vec![action.byte(), address])
}

pub fn partial_status(password: &str) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_PARTIAL_STATUS, vec![])
}

pub fn full_status(password: &str) -> Result<NetFrame, CommandError> {
    wrap(password, OPCODE_FULL_STATUS, vec![])
}

/// Parsed `0x94` identification frame the panel sends right after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub channel: ConnectionChannel,
    pub account: u16,
    pub mac_suffix: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChannel {
    Ethernet,
    Gprs1,
    Gprs2,
    Unknown(u8),
}

impl From<u8> for ConnectionChannel {
    fn from(b: u8) -> Self {
        match b {
            0 => ConnectionChannel::Ethernet,
            1 => ConnectionChannel::Gprs1,
            2 => ConnectionChannel::Gprs2,
            other => ConnectionChannel::Unknown(other),
        }
    }
}

impl ConnectionInfo {
    /// `content` is the body of the `0x94` frame: channel, two account
    /// nibbles, three MAC suffix bytes.
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < 6 {
            return None;
        }
        let channel = ConnectionChannel::from(content[0]);
        let account = u16::from(content[1]) << 8 | u16::from(content[2]);
        let mac_suffix = [content[3], content[4], content[5]];
        Some(Self {
            channel,
            account,
            mac_suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_all_matches_scenario_bytes() {
        let frame = arm("1234", Partition::All).unwrap();
        assert_eq!(
            frame.build(),
            vec![0x08, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x41, 0x21, 0x5B]
        );
    }

    #[test]
    fn disarm_partition_a_matches_scenario_bytes() {
        let frame = disarm("1234", Partition::A).unwrap();
        assert_eq!(
            frame.build(),
            vec![0x09, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x44, 0x41, 0x21, 0x1E]
        );
    }

    #[test]
    fn pgm_address_encoding() {
        let frame = pgm("1234", 1, PgmAction::On).unwrap();
        let content = &frame.content;
        assert_eq!(content[content.len() - 3], 0x4C);
        assert_eq!(content[content.len() - 2], 0x31);
    }

    #[test]
    fn pgm_rejects_out_of_range_output() {
        assert!(matches!(
            pgm("1234", 20, PgmAction::On),
            Err(CommandError::InvalidPgmOutput(20))
        ));
        assert!(matches!(
            pgm("1234", 0, PgmAction::On),
            Err(CommandError::InvalidPgmOutput(0))
        ));
    }

    #[test]
    fn connection_info_parses_channel_account_and_mac() {
        let info = ConnectionInfo::parse(&[0x00, 0x12, 0x34, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(info.channel, ConnectionChannel::Ethernet);
        assert_eq!(info.account, 0x1234);
        assert_eq!(info.mac_suffix, [0xAA, 0xBB, 0xCC]);
    }
}
