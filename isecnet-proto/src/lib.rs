//! Byte-accurate framing, command, and response layer for the ISECNet /
//! ISECMobile protocol stack, plus the AMT8000 legacy dialect that shares
//! its checksum discipline.
//!
//! This crate is pure data in, data out: no sockets, no async, no MQTT.
//! [`crate::isecnet::NetFrameReader`] is the only stateful type, and it
//! operates purely on byte slices handed to it by the caller.

pub mod amt8000;
pub mod checksum;
pub mod command;
pub mod isecmobile;
pub mod isecnet;
pub mod response;
pub mod status;

pub use command::{arm, disarm, pgm, siren_off, siren_on, ConnectionInfo, Partition, PgmAction};
pub use isecmobile::MobileFrame;
pub use isecnet::{NetFrame, NetFrameReader, ReadFrame};
pub use response::{Response, ResponseKind};
pub use status::{CentralStatus, PartialCentralStatus};
