//! The bridge runtime: a single mutex serializing every panel-facing
//! operation (MQTT commands, the periodic poll, sidecar events), the MQTT
//! event loop, and graceful shutdown. Grounded on `addon_main.py`'s
//! top-level wiring and `mqtt_runtime.py::MQTTRuntime`.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::{mpsc, Mutex};

use crate::config::{Config, Protocol};
use crate::error::BridgeError;
use crate::handler_amt8000::{self, Amt8000Handler, SidecarEvent};
use crate::handler_isecnet::IsecNetHandler;
use crate::intent::parse_command;
use crate::mqtt::{MqttPublisher, COMMAND_TOPIC};
use crate::server::{AmtServer, AmtServerConfig, ServerEvent};
use crate::state::BridgeState;

/// The two dialects share a runtime but drive entirely different live
/// objects; kept as a closed enum rather than a trait object so each arm's
/// concrete type (and its extra background tasks) stays visible at the call site.
pub enum Dialect {
    IsecNet {
        handler: Arc<IsecNetHandler>,
        server: Arc<AmtServer>,
        server_events: mpsc::UnboundedReceiver<ServerEvent>,
    },
    Amt8000 {
        handler: Arc<Amt8000Handler>,
        sidecar_events: mpsc::UnboundedReceiver<SidecarEvent>,
    },
}

pub struct Runtime {
    dialect: Mutex<Dialect>,
    state: Mutex<BridgeState>,
    mqtt: MqttPublisher,
    poll_interval: Duration,
}

impl Runtime {
    pub fn new(dialect: Dialect, zones: &[u16], mqtt: MqttPublisher, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            dialect: Mutex::new(dialect),
            state: Mutex::new(BridgeState::new(zones)),
            mqtt,
            poll_interval,
        })
    }

    /// Connects MQTT, starts the listener/client, the poll timer, and the
    /// sidecar/server event pumps; blocks until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut mqtt_eventloop: EventLoop, mqtt_client: AsyncClient, shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        mqtt_client.subscribe(COMMAND_TOPIC, QoS::AtLeastOnce).await?;
        self.publish_initial_state().await;

        let mqtt_task = {
            let runtime = Arc::clone(&self);
            let mut shutdown_rx = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = mqtt_eventloop.poll() => {
                            match event {
                                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                                    runtime.on_command_message(&payload).await;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("mqtt event loop error: {e}");
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                }
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let poll_task = {
            let runtime = Arc::clone(&self);
            let mut shutdown_rx = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(runtime.poll_interval) => {
                            runtime.run_poll_cycle().await;
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let event_pump_task = self.clone().spawn_dialect_event_pump(shutdown.clone()).await;

        let mut shutdown_rx = shutdown;
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        mqtt_task.abort();
        poll_task.abort();
        if let Some(task) = event_pump_task {
            task.abort();
        }

        self.mqtt.publish_availability(false).await;
        self.shutdown_dialect().await;
        mqtt_client.disconnect().await.ok();
        Ok(())
    }

    async fn publish_initial_state(&self) {
        self.mqtt.publish_availability(true).await;
        self.mqtt.publish_ac_power(true).await;
        self.mqtt.publish_system_battery(false).await;
        self.mqtt.publish_tamper(false).await;
        self.mqtt.publish_panic(false).await;
        self.mqtt.publish_partitions_off().await;
        self.mqtt.publish_triggered_zones(&*self.state.lock().await).await;
        self.mqtt.publish_zone_states(&*self.state.lock().await).await;
    }

    async fn on_command_message(&self, payload: &str) {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            warn!("empty mqtt command payload, ignored");
            return;
        }
        info!("mqtt command received: {trimmed}");
        let Some(command) = parse_command(trimmed) else {
            warn!("unrecognized bridge command: {trimmed}");
            return;
        };

        let dialect = self.dialect.lock().await;
        let is_panic = matches!(command, crate::intent::BridgeCommand::Panic);
        let result = match &*dialect {
            Dialect::IsecNet { handler, .. } => handler.handle_command(command, &self.state).await,
            Dialect::Amt8000 { handler, .. } => handler.handle_command(command).await,
        };
        drop(dialect);

        match result {
            Ok(()) => {
                if is_panic {
                    self.mqtt.publish_panic(true).await;
                }
            }
            Err(e) => error!("command error: {e}"),
        }
    }

    async fn run_poll_cycle(&self) {
        let dialect = self.dialect.lock().await;
        match &*dialect {
            Dialect::IsecNet { handler, .. } => match handler.poll_status(&self.state).await {
                Ok(status) => {
                    drop(dialect);
                    let state = self.state.lock().await;
                    self.mqtt.publish_status(&status, &state).await;
                }
                Err(e) => warn!("isecnet poll cycle failed: {e}"),
            },
            Dialect::Amt8000 { handler, .. } => match handler.poll_status(&self.state).await {
                Ok(full) => {
                    drop(dialect);
                    let state = self.state.lock().await;
                    self.mqtt
                        .publish_legacy_status(
                            &full.status,
                            full.battery.and_then(|b| b.percentage()),
                            full.tamper,
                            &state,
                        )
                        .await;
                }
                Err(e) => warn!("amt8000 poll cycle failed: {e}"),
            },
        }
    }

    async fn shutdown_dialect(&self) {
        let dialect = self.dialect.lock().await;
        match &*dialect {
            Dialect::IsecNet { handler, .. } => handler.shutdown().await,
            Dialect::Amt8000 { handler, .. } => handler.shutdown().await,
        }
    }

    /// Spawns the task that feeds ISECNet server events (connect/disconnect
    /// tracking) or amt8000 sidecar events into the shared state + MQTT.
    async fn spawn_dialect_event_pump(self: Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
        let mut dialect = self.dialect.lock().await;
        match &mut *dialect {
            Dialect::IsecNet { handler, server_events, .. } => {
                let handler = Arc::clone(handler);
                let runtime = Arc::clone(&self);
                let mut server_events = std::mem::replace(server_events, mpsc::unbounded_channel().1);
                let mut shutdown_rx = shutdown;
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            event = server_events.recv() => {
                                let Some(event) = event else { break };
                                match event {
                                    ServerEvent::Connected { conn_id } => {
                                        handler.set_connection(Some(conn_id)).await;
                                        runtime.run_poll_cycle().await;
                                    }
                                    ServerEvent::Disconnected { conn_id: _ } => {
                                        handler.set_connection(None).await;
                                    }
                                    ServerEvent::Frame { conn_id, frame } => {
                                        log::debug!("unsolicited frame from {conn_id}: cmd=0x{:02X} len={}", frame.command, frame.content.len());
                                    }
                                }
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }))
            }
            Dialect::Amt8000 { sidecar_events, .. } => {
                let runtime = Arc::clone(&self);
                let mut sidecar_events = std::mem::replace(sidecar_events, mpsc::unbounded_channel().1);
                let mut shutdown_rx = shutdown;
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            event = sidecar_events.recv() => {
                                let Some(event) = event else { break };
                                runtime.handle_sidecar_event(event).await;
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }))
            }
        }
    }

    async fn handle_sidecar_event(&self, event: SidecarEvent) {
        match &event {
            SidecarEvent::Panic => {
                self.mqtt.publish_panic(true).await;
                let mqtt = self.mqtt.clone();
                let dialect = self.dialect.lock().await;
                if let Dialect::Amt8000 { handler, .. } = &*dialect {
                    handler_amt8000::schedule_sidecar_panic_off(handler, move || {
                        tokio::spawn(async move { mqtt.publish_panic(false).await });
                    });
                }
            }
            SidecarEvent::AcPowerLost => self.mqtt.publish_ac_power(false).await,
            SidecarEvent::AcPowerRestored => self.mqtt.publish_ac_power(true).await,
            SidecarEvent::SystemBatteryLow => self.mqtt.publish_system_battery(true).await,
            SidecarEvent::SystemBatteryRestored => self.mqtt.publish_system_battery(false).await,
            SidecarEvent::Armed => self.mqtt.publish_overall_state("Armada").await,
            SidecarEvent::Disarmed => self.mqtt.publish_overall_state("Desarmada").await,
            SidecarEvent::ZoneTriggered(_) | SidecarEvent::ZoneRestored(_) => {}
        }

        let mut state = self.state.lock().await;
        let changed = handler_amt8000::apply_sidecar_event(&mut state, &event);
        if matches!(event, SidecarEvent::ZoneTriggered(_)) {
            self.mqtt.publish_overall_state("Disparada").await;
        }
        if changed {
            self.mqtt.publish_triggered_zones(&state).await;
            self.mqtt.publish_zone_states(&state).await;
        }
    }
}

/// Builds the `rumqttc` client/event-loop pair from [`Config`], with the
/// availability topic set as the last-will.
pub fn build_mqtt_client(config: &Config) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new("intelbras-bridge".to_string(), config.mqtt_broker.clone(), config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(user) = &config.mqtt_user {
        options.set_credentials(user.clone(), config.mqtt_pass.clone().unwrap_or_default());
    }
    options.set_last_will(rumqttc::LastWill::new(
        format!("{}/availability", crate::mqtt::TOPIC_BASE),
        b"offline".to_vec(),
        QoS::AtLeastOnce,
        true,
    ));
    AsyncClient::new(options, 16)
}

/// Constructs the dialect-specific live objects (the ISECNet server, or the
/// amt8000 client + sidecar), per [`Config::protocol`].
pub async fn build_dialect(config: &Config) -> anyhow::Result<Dialect> {
    match config.protocol()? {
        Protocol::IsecNet => {
            let server_config = AmtServerConfig {
                bind_host: "0.0.0.0".to_string(),
                bind_port: config.alarm_port,
                ..AmtServerConfig::default()
            };
            let (server, server_events) = AmtServer::new(server_config);
            let handler = Arc::new(IsecNetHandler::new(Arc::clone(&server), config.normalized_password()));
            Ok(Dialect::IsecNet { handler, server, server_events })
        }
        Protocol::Amt8000 => {
            let host = config
                .alarm_ip
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ALARM_IP is required for the amt8000 dialect"))?;
            let handler = Arc::new(Amt8000Handler::new(host, config.alarm_port, config.normalized_password()));
            let (tx, sidecar_events) = mpsc::unbounded_channel();
            if let Some(path) = &config.receptorip_path {
                handler_amt8000::spawn_sidecar(path, "/alarme-intelbras/config.cfg", tx)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to spawn receptorip sidecar: {e}"))?;
            }
            Ok(Dialect::Amt8000 { handler, sidecar_events })
        }
    }
}

/// Spawns the ISECNet TCP listener as a background task, if the dialect
/// needs one. Returns `None` for amt8000, which has no listener to run.
pub fn spawn_isecnet_listener(dialect: &Dialect, shutdown: tokio::sync::watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    match dialect {
        Dialect::IsecNet { server, .. } => {
            let server = Arc::clone(server);
            Some(tokio::spawn(async move {
                if let Err(e) = server.serve(shutdown).await {
                    error!("isecnet server terminated: {e}");
                }
            }))
        }
        Dialect::Amt8000 { .. } => None,
    }
}

/// Waits for SIGINT (or SIGTERM on unix) and flips the shutdown watch.
pub async fn wait_for_shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    let _ = tx.send(true);
}
