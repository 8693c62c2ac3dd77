//! Classifies an inbound wrapped frame's content as an ACK, a NACK with a
//! mapped reason, a status/data payload, or unclassifiable.

use crate::isecnet::NetFrame;

const ACK_BYTE: u8 = 0xFE;
const NACK_RANGE: std::ops::RangeInclusive<u8> = 0xE0..=0xEA;
/// Collides with the outer ISECMobile carrier byte; never a NACK code.
const NACK_EXCLUDED: u8 = 0xE9;
const PARTIAL_STATUS_LEN: usize = 43;
const FULL_STATUS_LEN: usize = 54;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    Nack { code: u8, message: &'static str },
    Data(Vec<u8>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self.kind, ResponseKind::Ack)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Nack { .. })
    }

    pub fn message(&self) -> Option<&'static str> {
        match &self.kind {
            ResponseKind::Nack { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::Nack { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classifies an already-parsed outer frame's content.
    ///
    /// Content of exactly 43 or 54 bytes is always treated as a status
    /// payload even if its first byte happens to fall in the ACK/NACK range;
    /// any other length falls back to first-byte classification, since a
    /// long NACK and an oddly-sized status blob are otherwise indistinguishable.
    /// When the first byte is neither the ACK byte nor a NACK code, `Data`
    /// carries everything after it, and a first byte with nothing following
    /// it classifies as `Unknown` rather than an empty `Data`.
    pub fn from_frame(frame: &NetFrame) -> Self {
        Self::classify(&frame.content)
    }

    pub fn classify(content: &[u8]) -> Self {
        let kind = if content.is_empty() {
            ResponseKind::Unknown
        } else if content.len() == PARTIAL_STATUS_LEN || content.len() == FULL_STATUS_LEN {
            ResponseKind::Data(content.to_vec())
        } else if content[0] == ACK_BYTE {
            ResponseKind::Ack
        } else if NACK_RANGE.contains(&content[0]) && content[0] != NACK_EXCLUDED {
            ResponseKind::Nack {
                code: content[0],
                message: nack_message(content[0]),
            }
        } else {
            let payload = &content[1..];
            if payload.is_empty() {
                ResponseKind::Unknown
            } else {
                ResponseKind::Data(payload.to_vec())
            }
        };
        Self { kind }
    }

    pub fn try_from_frame(frame: &NetFrame) -> Option<Self> {
        let response = Self::from_frame(frame);
        (!matches!(response.kind, ResponseKind::Unknown)).then_some(response)
    }
}

fn nack_message(code: u8) -> &'static str {
    match code {
        0xE0 => "invalid packet",
        0xE1 => "wrong password",
        0xE2 => "invalid command",
        0xE3 => "not partitioned",
        0xE4 => "zones open",
        0xE5 => "discontinued",
        0xE6 => "no bypass permission",
        0xE7 => "no disarm permission",
        0xE8 => "bypass not allowed while armed",
        0xEA => "no zones in partition",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ack() {
        let r = Response::classify(&[0xFE, 0xEA]);
        assert!(r.is_success());
    }

    #[test]
    fn classifies_wrong_password_nack() {
        let r = Response::classify(&[0xE1, 0xF5]);
        assert!(r.is_error());
        assert_eq!(r.error_code(), Some(0xE1));
        assert_eq!(r.message(), Some("wrong password"));
    }

    #[test]
    fn e9_is_never_a_nack_code() {
        let r = Response::classify(&[0xE9, 0x01]);
        assert!(!r.is_error());
    }

    #[test]
    fn forty_three_bytes_is_always_data_even_if_first_byte_looks_like_nack() {
        let mut content = vec![0xE1; PARTIAL_STATUS_LEN];
        content[0] = 0xE1;
        let r = Response::classify(&content);
        assert_eq!(r.kind, ResponseKind::Data(content));
    }

    #[test]
    fn empty_content_is_unknown() {
        let r = Response::classify(&[]);
        assert_eq!(r.kind, ResponseKind::Unknown);
    }

    #[test]
    fn single_byte_with_no_trailing_payload_is_unknown_not_data() {
        let r = Response::classify(&[0x05]);
        assert_eq!(r.kind, ResponseKind::Unknown);
    }

    #[test]
    fn data_fallback_carries_only_the_payload_after_the_first_byte() {
        let r = Response::classify(&[0x05, 0xAA, 0xBB]);
        assert_eq!(r.kind, ResponseKind::Data(vec![0xAA, 0xBB]));
    }
}
