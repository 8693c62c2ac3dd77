//! Async TCP listener that hosts panel-initiated ISECNet connections: reads
//! and frames the byte stream, auto-acks heartbeats and the identification
//! handshake, and correlates solicited responses to waiters.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use isecnet_proto::command::ConnectionInfo;
use isecnet_proto::isecnet::{self, NetFrame, NetFrameReader, ReadFrame};
use log::{debug, info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::connection::{self, Connection, ConnectionManager};
use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct AmtServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub response_timeout: Duration,
    pub auto_ack_heartbeat: bool,
    pub auto_ack_identification: bool,
}

impl Default for AmtServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 9009,
            response_timeout: Duration::from_secs(8),
            auto_ack_heartbeat: true,
            auto_ack_identification: true,
        }
    }
}

/// Frames and connection lifecycle events not consumed as an auto-ack or a
/// pending-response completion; the closed-enum analogue of the source's
/// `on_frame`/`on_connect`/`on_disconnect` callback registration.
#[derive(Debug)]
pub enum ServerEvent {
    Connected { conn_id: String },
    Disconnected { conn_id: String },
    Frame { conn_id: String, frame: NetFrame },
}

pub struct AmtServer {
    pub connections: Arc<ConnectionManager>,
    config: AmtServerConfig,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl AmtServer {
    pub fn new(config: AmtServerConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let server = Arc::new(Self {
            connections: Arc::new(ConnectionManager::new()),
            config,
            events_tx,
        });
        (server, events_rx)
    }

    /// Binds and accepts connections until `shutdown` is signalled; then
    /// closes every live connection before returning.
    pub async fn serve(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.bind_port)).await?;
        info!("isecnet server listening on {}:{}", self.config.bind_host, self.config.bind_port);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, addr) = accepted?;
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.handle_connection(socket, addr).await });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.connections.close_all().await;
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let id = addr.to_string();
        let (mut read_half, write_half) = socket.into_split();
        let connection = Arc::new(Connection::new(id.clone(), write_half));
        self.connections.add(connection.clone()).await;
        let _ = self.events_tx.send(ServerEvent::Connected { conn_id: id.clone() });
        info!("panel connected from {id}");

        let mut reader = NetFrameReader::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("read error on {id}: {e}");
                    break;
                }
            };
            for read_frame in reader.feed(&buf[..read]) {
                self.dispatch_frame(&connection, read_frame).await;
            }
        }

        self.connections.remove(&id).await;
        let _ = self.events_tx.send(ServerEvent::Disconnected { conn_id: id.clone() });
        info!("panel disconnected: {id}");
    }

    async fn dispatch_frame(&self, connection: &Arc<Connection>, read_frame: ReadFrame) {
        let frame = match read_frame {
            ReadFrame::Heartbeat => {
                debug!("heartbeat from {}", connection.id);
                if self.config.auto_ack_heartbeat {
                    let _ = connection.write_bytes(&isecnet::simple_ack_bytes()).await;
                }
                return;
            }
            ReadFrame::Frame(frame) => frame,
        };

        if frame.command == isecnet::IDENTIFICATION && self.config.auto_ack_identification {
            if let Some(info) = ConnectionInfo::parse(&frame.content) {
                *connection.metadata.lock().await = Some(info);
            }
            let _ = connection.write_bytes(&isecnet::simple_ack_bytes()).await;
            return;
        }

        if connection.complete_pending_response(frame.clone()).await {
            return;
        }

        let _ = self.events_tx.send(ServerEvent::Frame {
            conn_id: connection.id.clone(),
            frame,
        });
    }

    pub async fn send_command(&self, conn_id: &str, frame: &NetFrame, wait_response: bool) -> Result<Option<NetFrame>, BridgeError> {
        self.send_command_with_timeout(conn_id, frame, wait_response, self.config.response_timeout).await
    }

    pub async fn send_command_with_timeout(
        &self,
        conn_id: &str,
        frame: &NetFrame,
        wait_response: bool,
        timeout: Duration,
    ) -> Result<Option<NetFrame>, BridgeError> {
        connection::send_raw(&self.connections, conn_id, &frame.build(), wait_response, timeout).await
    }

    /// Best-effort fan-out: per-connection failures are logged and do not abort the loop.
    pub async fn broadcast_command(&self, frame: &NetFrame) {
        for connection in self.connections.all().await {
            if let Err(e) = connection.write_bytes(&frame.build()).await {
                warn!("broadcast write failed for {}: {e}", connection.id);
            }
        }
    }
}
