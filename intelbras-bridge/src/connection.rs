//! Registry of live panel connections, keyed by `host:port`, each with a
//! single-assignment pending-response rendezvous slot.

use std::sync::Arc;
use std::time::Instant;

use isecnet_proto::command::ConnectionInfo;
use isecnet_proto::isecnet::NetFrame;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, Mutex};

use crate::error::BridgeError;

pub struct Connection {
    pub id: String,
    writer: Mutex<OwnedWriteHalf>,
    pub connected_at: Instant,
    pub metadata: Mutex<Option<ConnectionInfo>>,
    pending: Mutex<Option<oneshot::Sender<NetFrame>>>,
}

impl Connection {
    pub fn new(id: String, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
            connected_at: Instant::now(),
            metadata: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        self.id.rsplit_once(':').map(|(host, _)| host).unwrap_or(&self.id)
    }

    pub async fn write_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Creates the pending-response slot *before* the caller writes, so a
    /// reply arriving between write and await is never missed.
    pub async fn arm_pending_response(&self) -> oneshot::Receiver<NetFrame> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);
        rx
    }

    pub async fn clear_pending_response(&self) {
        *self.pending.lock().await = None;
    }

    /// Completes the pending-response slot if one is armed, returning whether
    /// it was. Never reorders: a frame handed to an expired/absent slot is
    /// the caller's responsibility to route to unsolicited-frame handling.
    pub async fn complete_pending_response(&self, frame: NetFrame) -> bool {
        if let Some(tx) = self.pending.lock().await.take() {
            tx.send(frame).is_ok()
        } else {
            false
        }
    }

    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, connection: Arc<Connection>) {
        self.connections.lock().await.push(connection);
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        let index = connections.iter().position(|c| c.id == id)?;
        Some(connections.remove(index))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.lock().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn get_by_host(&self, host: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .await
            .iter()
            .find(|c| c.host() == host)
            .cloned()
    }

    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().await.clone()
    }

    pub async fn list_ids(&self) -> Vec<String> {
        self.connections.lock().await.iter().map(|c| c.id.clone()).collect()
    }

    pub async fn has(&self, id: &str) -> bool {
        self.connections.lock().await.iter().any(|c| c.id == id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn close_all(&self) {
        let connections = self.connections.lock().await.clone();
        for connection in connections {
            connection.close().await;
        }
        self.connections.lock().await.clear();
    }
}

/// Writes `bytes` to `conn_id`, waiting up to `timeout` for a reply if `wait` is set.
pub async fn send_raw(
    manager: &ConnectionManager,
    conn_id: &str,
    bytes: &[u8],
    wait: bool,
    timeout: std::time::Duration,
) -> Result<Option<NetFrame>, BridgeError> {
    let connection = manager
        .get(conn_id)
        .await
        .ok_or_else(|| BridgeError::ConnectionNotFound(conn_id.to_string()))?;

    let rx = if wait {
        Some(connection.arm_pending_response().await)
    } else {
        None
    };

    connection
        .write_bytes(bytes)
        .await
        .map_err(|e| BridgeError::ConnectionLost(e.to_string()))?;

    let Some(rx) = rx else { return Ok(None) };

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(frame)) => Ok(Some(frame)),
        Ok(Err(_)) => Err(BridgeError::ConnectionLost(conn_id.to_string())),
        Err(_) => {
            connection.clear_pending_response().await;
            Err(BridgeError::ResponseTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_trailing_port() {
        let id = "192.168.1.5:51000".to_string();
        assert_eq!(id.rsplit_once(':').map(|(h, _)| h), Some("192.168.1.5"));
    }
}
