//! The inner ISECMobile command frame: `0x21 | password | opcode | body | 0x21`.

const DELIMITER: u8 = 0x21;
const MIN_PASSWORD_LEN: usize = 4;
const MAX_PASSWORD_LEN: usize = 6;
const MAX_BODY_LEN: usize = 52;
/// Opcodes live at or above this value; used to heuristically locate the end
/// of the password field since the wire format carries no length prefix for it.
const OPCODE_RANGE_START: u8 = 0x41;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MobileFrameError {
    #[error("password must be {MIN_PASSWORD_LEN}..{MAX_PASSWORD_LEN} ASCII digits")]
    InvalidPassword,
    #[error("body exceeds {MAX_BODY_LEN} bytes")]
    BodyTooLong,
    #[error("missing or misplaced frame delimiter")]
    MissingDelimiter,
    #[error("frame is too short to contain a password and opcode")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileFrame {
    pub password: String,
    pub opcode: u8,
    pub body: Vec<u8>,
}

impl MobileFrame {
    pub fn new(password: &str, opcode: u8, body: Vec<u8>) -> Result<Self, MobileFrameError> {
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len())
            || !password.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(MobileFrameError::InvalidPassword);
        }
        if body.len() > MAX_BODY_LEN {
            return Err(MobileFrameError::BodyTooLong);
        }
        Ok(Self {
            password: password.to_string(),
            opcode,
            body,
        })
    }

    pub fn command_code(&self) -> u8 {
        self.opcode
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.password.len() + self.body.len());
        out.push(DELIMITER);
        out.extend_from_slice(self.password.as_bytes());
        out.push(self.opcode);
        out.extend_from_slice(&self.body);
        out.push(DELIMITER);
        out
    }

    pub fn parse(raw: &[u8]) -> Result<Self, MobileFrameError> {
        if raw.len() < 1 + MIN_PASSWORD_LEN + 1 + 1 {
            return Err(MobileFrameError::Truncated);
        }
        if raw[0] != DELIMITER || raw[raw.len() - 1] != DELIMITER {
            return Err(MobileFrameError::MissingDelimiter);
        }
        let inner = &raw[1..raw.len() - 1];
        let password_len = (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN.min(inner.len().saturating_sub(1)))
            .find(|&len| inner.get(len).is_some_and(|&b| b >= OPCODE_RANGE_START))
            .ok_or(MobileFrameError::InvalidPassword)?;
        let password = std::str::from_utf8(&inner[..password_len])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .ok_or(MobileFrameError::InvalidPassword)?
            .to_string();
        let opcode = inner[password_len];
        let body = inner[password_len + 1..].to_vec();
        if body.len() > MAX_BODY_LEN {
            return Err(MobileFrameError::BodyTooLong);
        }
        Ok(Self {
            password,
            opcode,
            body,
        })
    }

    pub fn try_parse(raw: &[u8]) -> Option<Self> {
        Self::parse(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_roundtrips() {
        let frame = MobileFrame::new("1234", 0x41, vec![]).unwrap();
        assert_eq!(frame.build(), b"\x21123441\x21");
        assert_eq!(MobileFrame::parse(&frame.build()).unwrap(), frame);
    }

    #[test]
    fn arm_all_matches_scenario_bytes() {
        let frame = MobileFrame::new("1234", 0x41, vec![]).unwrap();
        assert_eq!(frame.build(), vec![0x21, 0x31, 0x32, 0x33, 0x34, 0x41, 0x21]);
    }

    #[test]
    fn rejects_non_numeric_password() {
        assert_eq!(
            MobileFrame::new("abcd", 0x41, vec![]),
            Err(MobileFrameError::InvalidPassword)
        );
    }

    #[test]
    fn rejects_oversized_body() {
        assert_eq!(
            MobileFrame::new("1234", 0x41, vec![0; 53]),
            Err(MobileFrameError::BodyTooLong)
        );
    }

    #[test]
    fn parse_requires_delimiters() {
        assert_eq!(
            MobileFrame::parse(b"123441"),
            Err(MobileFrameError::MissingDelimiter)
        );
    }

    #[test]
    fn parse_six_digit_password() {
        let frame = MobileFrame::new("123456", 0x44, vec![0x41]).unwrap();
        assert_eq!(MobileFrame::parse(&frame.build()).unwrap(), frame);
    }
}
