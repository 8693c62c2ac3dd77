//! Persistent-socket client for the AMT8000 legacy dialect: auth handshake,
//! status query, and arm/disarm/panic, grounded directly on `client.py`'s
//! `Client` class. Any socket error during a command marks the connection
//! closed so the next call reconnects.

use std::time::Duration;

use isecnet_proto::amt8000::{
    self, ArmResult, AuthResult, BatteryLevel, LegacyStatus, OPCODE_ARM_DISARM, OPCODE_AUTH,
    OPCODE_PANIC, OPCODE_STATUS,
};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// [`LegacyStatus`] plus the fields the panel carries further out in the
/// same payload (battery, tamper) that `decode_status` doesn't cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullLegacyStatus {
    pub status: LegacyStatus,
    pub battery: Option<BatteryLevel>,
    pub tamper: bool,
}

const RECV_TIMEOUT: Duration = Duration::from_secs(8);
const DEVICE_TYPE: u8 = 1;
const SOFTWARE_VERSION: u8 = 0x10;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("communication error: {0}")]
    Io(std::io::Error),
    #[error("response too short ({0} bytes)")]
    ShortResponse(usize),
    #[error("authentication rejected: {0:?}")]
    Auth(AuthResult),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// Mirrors `client.py::Client`: a single persistent socket, reconnected
/// lazily the next time a command is issued after a communication error.
pub struct Amt8000Client {
    host: String,
    port: u16,
    socket: Mutex<Option<TcpStream>>,
}

impl Amt8000Client {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            socket: Mutex::new(None),
        }
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut guard = self.socket.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ClientError::Connect(format!("{}:{}", self.host, self.port), e))?;
        info!("amt8000 persistent connection established to {}:{}", self.host, self.port);
        *guard = Some(stream);
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(mut stream) = self.socket.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn send_and_receive(&self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.connect().await?;
        let mut guard = self.socket.lock().await;
        let stream = guard.as_mut().expect("connect() just populated the slot");

        let result: Result<Vec<u8>, ClientError> = async {
            stream.write_all(payload).await?;
            let mut buf = [0u8; 1024];
            let n = tokio::time::timeout(RECV_TIMEOUT, stream.read(&mut buf))
                .await
                .map_err(|_| ClientError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "recv timed out")))??;
            debug!("amt8000 recv {n} bytes: {:02x?}", &buf[..n]);
            Ok(buf[..n].to_vec())
        }
        .await;

        if result.is_err() {
            // Communication failure: drop the socket so the next call reconnects.
            *guard = None;
        }
        result
    }

    pub async fn auth(&self, password: &str) -> Result<(), ClientError> {
        let body = amt8000::auth_body(password, DEVICE_TYPE, SOFTWARE_VERSION)
            .ok_or_else(|| ClientError::ShortResponse(0))?;
        let frame = amt8000::LegacyFrame::new(OPCODE_AUTH, body).build();
        let reply = self.send_and_receive(&frame).await?;
        if reply.len() < 9 {
            return Err(ClientError::ShortResponse(reply.len()));
        }
        match amt8000::decode_auth_result(&reply) {
            Some(AuthResult::Ok) => {
                info!("amt8000 authentication successful");
                Ok(())
            }
            Some(other) => Err(ClientError::Auth(other)),
            None => Err(ClientError::ShortResponse(reply.len())),
        }
    }

    pub async fn status(&self) -> Result<FullLegacyStatus, ClientError> {
        let frame = amt8000::LegacyFrame::new(OPCODE_STATUS, vec![]).build();
        let reply = self.send_and_receive(&frame).await?;
        let payload = amt8000::extract_status_payload(&reply);
        let status = amt8000::decode_status(payload).ok_or(ClientError::ShortResponse(payload.len()))?;
        Ok(FullLegacyStatus {
            status,
            battery: amt8000::decode_battery(payload),
            tamper: amt8000::decode_tamper(payload).unwrap_or(false),
        })
    }

    pub async fn arm(&self, partition: Option<u8>) -> Result<ArmResult, ClientError> {
        let body = amt8000::arm_disarm_body(partition, true);
        let frame = amt8000::LegacyFrame::new(OPCODE_ARM_DISARM, body).build();
        let reply = self.send_and_receive(&frame).await?;
        let result = amt8000::decode_arm_result(&reply);
        if matches!(result, ArmResult::Failed) {
            warn!("amt8000 arm command failed: {:02x?}", reply);
        }
        Ok(result)
    }

    pub async fn disarm(&self, partition: Option<u8>) -> Result<bool, ClientError> {
        let body = amt8000::arm_disarm_body(partition, false);
        let frame = amt8000::LegacyFrame::new(OPCODE_ARM_DISARM, body).build();
        let reply = self.send_and_receive(&frame).await?;
        let ok = amt8000::decode_disarm_ok(&reply);
        if !ok {
            warn!("amt8000 disarm command failed: {:02x?}", reply);
        }
        Ok(ok)
    }

    pub async fn panic(&self, panic_type: u8) -> Result<bool, ClientError> {
        let frame = amt8000::LegacyFrame::new(OPCODE_PANIC, amt8000::panic_body(panic_type)).build();
        let reply = self.send_and_receive(&frame).await?;
        let ok = amt8000::decode_panic_ok(&reply);
        if !ok {
            warn!("amt8000 panic command failed: {:02x?}", reply);
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn close_on_never_connected_client_is_a_noop() {
        let client = Amt8000Client::new("127.0.0.1".to_string(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn connect_then_auth_round_trips_against_a_fake_panel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[6..8], &OPCODE_AUTH);
            let mut reply = vec![0u8; 9];
            reply[8] = 0; // auth ok
            socket.write_all(&reply).await.unwrap();
            let _ = n;
        });

        let client = Amt8000Client::new(addr.ip().to_string(), addr.port());
        client.auth("123456").await.unwrap();
        server.await.unwrap();
    }
}
