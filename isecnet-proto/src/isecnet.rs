//! The outer ISECNet transport frame and the streaming reader that pulls
//! whole frames out of an arbitrarily-chunked byte stream.

use bytes::BytesMut;

use crate::checksum::{append_xor_checksum, validate_xor_packet};

/// Bare heartbeat byte sent by the panel; carries no length or checksum.
pub const HEARTBEAT: u8 = 0xF7;
/// Bare ACK byte the server sends back for heartbeats and the identification frame.
pub const SIMPLE_ACK: u8 = 0xFE;
/// Outer command byte that always wraps an ISECMobile frame.
pub const MOBILE_CARRIER: u8 = 0xE9;
/// Outer command byte sent by the panel right after connecting.
pub const IDENTIFICATION: u8 = 0x94;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NetFrameError {
    #[error("frame shorter than the minimum length+command+checksum size")]
    Truncated,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("length byte is zero or smaller than the command byte it must cover")]
    BadLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetFrame {
    pub command: u8,
    pub content: Vec<u8>,
}

impl NetFrame {
    pub fn new(command: u8, content: Vec<u8>) -> Self {
        Self { command, content }
    }

    pub fn wrap_mobile(mobile: &[u8]) -> Self {
        Self::new(MOBILE_CARRIER, mobile.to_vec())
    }

    pub fn is_mobile_command(&self) -> bool {
        self.command == MOBILE_CARRIER
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == HEARTBEAT
    }

    /// `[length, command, ...content, checksum]`, `length = 1 + content.len()`.
    pub fn build(&self) -> Vec<u8> {
        let length = 1 + self.content.len();
        let mut body = Vec::with_capacity(1 + length);
        body.push(length as u8);
        body.push(self.command);
        body.extend_from_slice(&self.content);
        append_xor_checksum(&body)
    }

    pub fn parse(raw: &[u8]) -> Result<Self, NetFrameError> {
        if raw.len() < 3 {
            return Err(NetFrameError::Truncated);
        }
        let length = raw[0] as usize;
        if length < 1 {
            return Err(NetFrameError::BadLength);
        }
        if raw.len() != length + 2 {
            return Err(NetFrameError::Truncated);
        }
        if !validate_xor_packet(raw) {
            return Err(NetFrameError::BadChecksum);
        }
        let command = raw[1];
        let content = raw[2..raw.len() - 1].to_vec();
        Ok(Self { command, content })
    }

    pub fn try_parse(raw: &[u8]) -> Option<Self> {
        Self::parse(raw).ok()
    }
}

/// The bare single-byte ACK used for heartbeats and the identification handshake.
pub fn simple_ack_bytes() -> Vec<u8> {
    vec![SIMPLE_ACK]
}

/// The bare single-byte heartbeat, as sent by the panel.
pub fn heartbeat_bytes() -> Vec<u8> {
    vec![HEARTBEAT]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrame {
    Heartbeat,
    Frame(NetFrame),
}

/// Extracts whole frames from a growing byte buffer, fed in arbitrary chunks.
#[derive(Debug, Default)]
pub struct NetFrameReader {
    buf: BytesMut,
}

impl NetFrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Appends `data` to the internal buffer and returns every whole frame
    /// that can now be extracted, in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ReadFrame> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_frame() {
            frames.push(frame);
        }
        frames
    }

    fn try_extract_frame(&mut self) -> Option<ReadFrame> {
        loop {
            if self.buf.is_empty() {
                return None;
            }
            if self.buf[0] == HEARTBEAT {
                self.buf.split_to(1);
                return Some(ReadFrame::Heartbeat);
            }
            if self.buf.len() < 3 {
                return None;
            }
            let length = self.buf[0] as usize;
            if length < 1 {
                self.buf.split_to(1);
                continue;
            }
            let total = length + 2;
            if self.buf.len() < total {
                return None;
            }
            match NetFrame::parse(&self.buf[..total]) {
                Ok(frame) => {
                    self.buf.split_to(total);
                    return Some(ReadFrame::Frame(frame));
                }
                Err(_) => {
                    self.buf.split_to(1);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_arm_all_matches_scenario_bytes() {
        let mobile = crate::isecmobile::MobileFrame::new("1234", 0x41, vec![])
            .unwrap()
            .build();
        let frame = NetFrame::wrap_mobile(&mobile);
        assert_eq!(
            frame.build(),
            vec![0x08, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x41, 0x21, 0x5B]
        );
    }

    #[test]
    fn build_disarm_partition_a_matches_scenario_bytes() {
        let mobile = crate::isecmobile::MobileFrame::new("1234", 0x44, vec![0x41])
            .unwrap()
            .build();
        let frame = NetFrame::wrap_mobile(&mobile);
        assert_eq!(
            frame.build(),
            vec![0x09, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x44, 0x41, 0x21, 0x1E]
        );
    }

    #[test]
    fn roundtrips_for_arbitrary_content() {
        let frame = NetFrame::new(0x5A, vec![1, 2, 3, 4, 5]);
        let built = frame.build();
        assert!(validate_xor_packet(&built));
        assert_eq!(NetFrame::parse(&built).unwrap(), frame);
    }

    #[test]
    fn reader_splits_heartbeat_and_frame_from_one_chunk() {
        let mut reader = NetFrameReader::new();
        let input = [0xF7, 0x08, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x41, 0x21, 0x5B];
        let frames = reader.feed(&input);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], ReadFrame::Heartbeat);
        match &frames[1] {
            ReadFrame::Frame(f) => assert_eq!(f.command, MOBILE_CARRIER),
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(reader.pending_bytes(), 0);
    }

    #[test]
    fn reader_is_equivalent_across_arbitrary_splits() {
        let input = [0xF7, 0x08, 0xE9, 0x21, 0x31, 0x32, 0x33, 0x34, 0x41, 0x21, 0x5B];
        let mut whole = NetFrameReader::new();
        let all_at_once = whole.feed(&input);

        for split in 1..input.len() {
            let mut reader = NetFrameReader::new();
            let mut got = reader.feed(&input[..split]);
            got.extend(reader.feed(&input[split..]));
            assert_eq!(got, all_at_once, "split at {split} diverged");
        }
    }

    #[test]
    fn reader_resyncs_on_zero_length_byte() {
        let mut reader = NetFrameReader::new();
        let mut input = vec![0x00];
        input.extend(NetFrame::new(0x5A, vec![]).build());
        let frames = reader.feed(&input);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn reader_discards_one_byte_on_checksum_failure_not_the_whole_window() {
        let valid_frame = NetFrame::new(0x5A, vec![1, 2, 3]).build();
        // A spurious leading length byte (0x04) makes the first length+2=6
        // bytes look like a complete frame, but its checksum doesn't match;
        // the real frame starts one byte later. A correct reader must drop
        // only that one leading byte, not the whole 6-byte misread window.
        let mut input = vec![0x04];
        input.extend_from_slice(&valid_frame);

        let mut reader = NetFrameReader::new();
        let frames = reader.feed(&input);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ReadFrame::Frame(f) => assert_eq!(f, &NetFrame::new(0x5A, vec![1, 2, 3])),
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(reader.pending_bytes(), 0);
    }

    #[test]
    fn reader_waits_on_incomplete_frame() {
        let mut reader = NetFrameReader::new();
        let frames = reader.feed(&[0x05, 0xE9]);
        assert!(frames.is_empty());
        assert_eq!(reader.pending_bytes(), 2);
    }

    #[test]
    fn simple_ack_and_heartbeat_are_bare_single_bytes() {
        assert_eq!(simple_ack_bytes(), vec![0xFE]);
        assert_eq!(heartbeat_bytes(), vec![0xF7]);
    }
}
