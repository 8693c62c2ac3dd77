//! High-level ISECNet dialect operations: command dispatch, periodic status
//! poll, and derived-state publication. A single panel connection is
//! tracked; commands arriving with none connected are logged and discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isecnet_proto::command::{self, Partition};
use isecnet_proto::response::Response;
use isecnet_proto::status::{CentralStatus, PartialCentralStatus};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::error::BridgeError;
use crate::intent::BridgeCommand;
use crate::server::AmtServer;
use crate::state::BridgeState;

const POLL_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
const SIREN_OFF_DELAY: Duration = Duration::from_secs(30);

pub struct IsecNetHandler {
    server: Arc<AmtServer>,
    password: String,
    connection_id: Mutex<Option<String>>,
    /// Bumped on every PANIC; a deferred siren-off checks it's still the
    /// timer that scheduled it before firing, so a second PANIC within the
    /// 30s window resets the timer instead of stacking a second one.
    panic_generation: AtomicU64,
}

impl IsecNetHandler {
    pub fn new(server: Arc<AmtServer>, password: String) -> Self {
        Self {
            server,
            password,
            connection_id: Mutex::new(None),
            panic_generation: AtomicU64::new(0),
        }
    }

    pub async fn set_connection(&self, id: Option<String>) {
        *self.connection_id.lock().await = id;
    }

    async fn active_connection(&self) -> Option<String> {
        self.connection_id.lock().await.clone()
    }

    pub async fn handle_command(self: &Arc<Self>, command: BridgeCommand, state: &Mutex<BridgeState>) -> Result<(), BridgeError> {
        let Some(conn_id) = self.active_connection().await else {
            warn!("command received with no panel connected, discarding");
            return Err(BridgeError::ConnectionNotFound("<none>".into()));
        };

        match command {
            BridgeCommand::Arm(partition) => {
                let frame = command::arm(&self.password, partition).map_err(|e| BridgeError::Config(e.to_string()))?;
                self.send_and_classify(&conn_id, &frame).await?;
            }
            BridgeCommand::Disarm(partition) => {
                let frame = command::disarm(&self.password, partition).map_err(|e| BridgeError::Config(e.to_string()))?;
                self.send_and_classify(&conn_id, &frame).await?;
                if matches!(partition, Partition::All) {
                    state.lock().await.clear_triggered();
                }
            }
            BridgeCommand::Panic => {
                let on = command::siren_on(&self.password).map_err(|e| BridgeError::Config(e.to_string()))?;
                self.send_and_classify(&conn_id, &on).await?;
                self.schedule_siren_off(conn_id);
            }
        }
        Ok(())
    }

    async fn send_and_classify(&self, conn_id: &str, frame: &isecnet_proto::isecnet::NetFrame) -> Result<Response, BridgeError> {
        let reply = self.server.send_command(conn_id, frame, true).await?;
        let reply = reply.ok_or(BridgeError::ResponseTimeout)?;
        let response = Response::from_frame(&reply);
        if let Some(code) = response.error_code() {
            return Err(BridgeError::Nack {
                code,
                message: response.message().unwrap_or("unknown error"),
            });
        }
        Ok(response)
    }

    /// A PANIC within an already-running 30s window resets the timer: the
    /// generation counter is bumped, so the older task's check fails and it
    /// exits without sending siren-off.
    fn schedule_siren_off(self: &Arc<Self>, conn_id: String) {
        let generation = self.panic_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(SIREN_OFF_DELAY).await;
            if handler.panic_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if handler.active_connection().await.as_deref() != Some(conn_id.as_str()) {
                return;
            }
            if let Ok(frame) = command::siren_off(&handler.password) {
                let _ = handler.server.send_command(&conn_id, &frame, true).await;
            }
        });
    }

    pub async fn poll_status(&self, state: &Mutex<BridgeState>) -> Result<CentralStatus, BridgeError> {
        let conn_id = self.active_connection().await.ok_or_else(|| BridgeError::ConnectionNotFound("<none>".into()))?;
        let frame = command::full_status(&self.password).map_err(|e| BridgeError::Config(e.to_string()))?;
        let reply = self
            .server
            .send_command_with_timeout(&conn_id, &frame, true, POLL_DISPATCH_TIMEOUT)
            .await?
            .ok_or(BridgeError::ResponseTimeout)?;

        let response = Response::from_frame(&reply);
        let content = match response.kind {
            isecnet_proto::response::ResponseKind::Data(bytes) => bytes,
            _ => {
                return Err(BridgeError::Nack {
                    code: response.error_code().unwrap_or(0),
                    message: response.message().unwrap_or("status poll did not return a data payload"),
                })
            }
        };

        let status = if content.len() == 54 {
            CentralStatus::parse(&content).map_err(|e| BridgeError::ExternalIo(e.to_string()))?
        } else if content.len() == 43 {
            PartialCentralStatus::parse(&content).map_err(|e| BridgeError::ExternalIo(e.to_string()))?.promote()
        } else {
            return Err(BridgeError::ExternalIo(format!("unexpected status payload length {}", content.len())));
        };

        state.lock().await.apply_status(&status);
        info!("status poll ok: armed={} triggered={}", status.armed, status.triggered);
        Ok(status)
    }

    pub async fn shutdown(&self) {
        self.server.connections.close_all().await;
    }
}
