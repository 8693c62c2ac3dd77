//! Environment-driven configuration, bound with `clap` so the same struct
//! documents `--help` and reads the process environment.

use std::str::FromStr;

use clap::Parser;

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    IsecNet,
    Amt8000,
}

impl FromStr for Protocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "isecnet" => Ok(Protocol::IsecNet),
            "amt8000" | "legacy" => Ok(Protocol::Amt8000),
            other => Err(BridgeError::Config(format!(
                "unknown ALARM_PROTOCOL {other:?}, expected isecnet or amt8000"
            ))),
        }
    }
}

/// A zone set parsed from `ZONE_RANGE` (e.g. `"1-16,20,33-40"`) or, absent
/// that, `1..=ZONE_COUNT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSet(pub Vec<u16>);

impl ZoneSet {
    pub fn from_range_spec(spec: &str) -> Result<Self, BridgeError> {
        let mut zones = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let start: u16 = start
                    .trim()
                    .parse()
                    .map_err(|_| BridgeError::Config(format!("invalid ZONE_RANGE segment {part:?}")))?;
                let end: u16 = end
                    .trim()
                    .parse()
                    .map_err(|_| BridgeError::Config(format!("invalid ZONE_RANGE segment {part:?}")))?;
                zones.extend(start..=end);
            } else {
                let zone: u16 = part
                    .parse()
                    .map_err(|_| BridgeError::Config(format!("invalid ZONE_RANGE segment {part:?}")))?;
                zones.push(zone);
            }
        }
        Ok(Self(zones))
    }

    pub fn from_count(count: u16) -> Self {
        Self((1..=count).collect())
    }
}

#[derive(Debug, Parser)]
#[command(name = "intelbras-bridge", about = "ISECNet/AMT8000 to MQTT bridge")]
pub struct Config {
    /// Panel IP address; required for the amt8000 dialect, optional for isecnet (the panel dials in).
    #[arg(long, env = "ALARM_IP")]
    pub alarm_ip: Option<String>,

    /// TCP port: bind port for isecnet, dial port for amt8000.
    #[arg(long, env = "ALARM_PORT", default_value_t = 9009)]
    pub alarm_port: u16,

    /// Alarm keypad password, 4-6 ASCII digits.
    #[arg(long, env = "ALARM_PASS")]
    pub alarm_pass: String,

    /// `isecnet` (default) or `amt8000`/`legacy`.
    #[arg(long, env = "ALARM_PROTOCOL", default_value = "isecnet")]
    pub alarm_protocol: String,

    /// Target length for left-zero-pad password normalization.
    #[arg(long, env = "PASSWORD_LENGTH", default_value_t = 6)]
    pub password_length: usize,

    #[arg(long, env = "POLLING_INTERVAL_MINUTES", default_value_t = 5)]
    pub polling_interval_minutes: u64,

    /// Comma list of ints or `a-b` ranges, e.g. "1-16,20,33-40". Takes precedence over `zone_count`.
    #[arg(long, env = "ZONE_RANGE")]
    pub zone_range: Option<String>,

    #[arg(long, env = "ZONE_COUNT", default_value_t = 32)]
    pub zone_count: u16,

    #[arg(long, env = "MQTT_BROKER")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,

    #[arg(long, env = "MQTT_PASS")]
    pub mqtt_pass: Option<String>,

    /// Path to the `receptorip` sidecar binary (amt8000 dialect only).
    #[arg(long, env = "RECEPTORIP_PATH")]
    pub receptorip_path: Option<String>,
}

impl Config {
    pub fn protocol(&self) -> Result<Protocol, BridgeError> {
        self.alarm_protocol.parse()
    }

    pub fn zones(&self) -> Result<ZoneSet, BridgeError> {
        match &self.zone_range {
            Some(spec) => ZoneSet::from_range_spec(spec),
            None => Ok(ZoneSet::from_count(self.zone_count)),
        }
    }

    /// Left-zero-pads a digits-only password shorter than `password_length`.
    pub fn normalized_password(&self) -> String {
        normalize_password(&self.alarm_pass, self.password_length)
    }

    /// Validation beyond what `clap`'s required/typed fields already enforce.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let protocol = self.protocol()?;
        let password = self.normalized_password();
        if !(4..=6).contains(&password.len()) || !password.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BridgeError::Config(
                "ALARM_PASS must normalize to 4-6 ASCII digits".into(),
            ));
        }
        if protocol == Protocol::Amt8000 && self.alarm_ip.is_none() {
            return Err(BridgeError::Config("ALARM_IP is required for the amt8000 dialect".into()));
        }
        if protocol == Protocol::Amt8000 && password.len() != 6 {
            return Err(BridgeError::Config(
                "amt8000 auth requires exactly a 6-digit password".into(),
            ));
        }
        if self.polling_interval_minutes < 1 {
            return Err(BridgeError::Config("POLLING_INTERVAL_MINUTES must be >= 1".into()));
        }
        self.zones()?;
        Ok(())
    }
}

fn normalize_password(password: &str, target_len: usize) -> String {
    if password.len() < target_len && password.bytes().all(|b| b.is_ascii_digit()) {
        format!("{:0>width$}", password, width = target_len)
    } else {
        password.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_range_parses_mixed_list() {
        let set = ZoneSet::from_range_spec("1-4,10,20-22").unwrap();
        assert_eq!(set.0, vec![1, 2, 3, 4, 10, 20, 21, 22]);
    }

    #[test]
    fn zone_count_expands_from_one() {
        let set = ZoneSet::from_count(3);
        assert_eq!(set.0, vec![1, 2, 3]);
    }

    #[test]
    fn protocol_accepts_legacy_alias() {
        assert_eq!("legacy".parse::<Protocol>().unwrap(), Protocol::Amt8000);
        assert_eq!("ISECNET".parse::<Protocol>().unwrap(), Protocol::IsecNet);
    }

    #[test]
    fn protocol_rejects_unknown_value() {
        assert!("foo".parse::<Protocol>().is_err());
    }

    #[test]
    fn password_normalization_pads_short_numeric_password() {
        assert_eq!(normalize_password("12", 6), "000012");
        assert_eq!(normalize_password("123456", 6), "123456");
        assert_eq!(normalize_password("abcd", 6), "abcd");
    }
}
