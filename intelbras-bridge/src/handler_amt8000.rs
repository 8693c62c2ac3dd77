//! High-level AMT8000 legacy dialect operations: connect-and-auth retry,
//! command dispatch, status poll, and the `receptorip` sidecar line
//! translation table, grounded on `protocol_handlers/amt8000.py`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use isecnet_proto::amt8000::ArmResult;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

use crate::client_amt8000::Amt8000Client;
use crate::error::BridgeError;
use crate::intent::BridgeCommand;
use crate::state::BridgeState;

const AUTH_RETRIES: u32 = 3;
const AUTH_BACKOFF: Duration = Duration::from_secs(1);

pub struct Amt8000Handler {
    client: Amt8000Client,
    password: String,
    panic_generation: std::sync::atomic::AtomicU64,
}

impl Amt8000Handler {
    pub fn new(host: String, port: u16, password: String) -> Self {
        Self {
            client: Amt8000Client::new(host, port),
            password,
            panic_generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Up to three connect+auth attempts with a 1-second backoff; matches
    /// `connect_and_auth_alarm` in the original handler.
    async fn connect_and_auth(&self) -> bool {
        for attempt in 1..=AUTH_RETRIES {
            match self.client.connect().await {
                Ok(()) => match self.client.auth(&self.password).await {
                    Ok(()) => return true,
                    Err(e) => error!("amt8000 auth attempt {attempt}/{AUTH_RETRIES} failed: {e}"),
                },
                Err(e) => error!("amt8000 connect attempt {attempt}/{AUTH_RETRIES} failed: {e}"),
            }
            if attempt < AUTH_RETRIES {
                tokio::time::sleep(AUTH_BACKOFF).await;
            }
        }
        false
    }

    /// The amt8000 dialect only supports the whole-system arm/disarm/panic
    /// trio; per-partition aliases are logged and discarded, matching the
    /// original's explicit unsupported-command list.
    pub async fn handle_command(&self, command: BridgeCommand) -> Result<(), BridgeError> {
        if !self.connect_and_auth().await {
            warn!("amt8000 auth failed, command dropped");
            return Err(BridgeError::Auth(isecnet_proto::amt8000::AuthResult::Unknown(0)));
        }

        match command {
            BridgeCommand::Arm(partition) => {
                if !matches!(partition, isecnet_proto::command::Partition::All) {
                    warn!("per-partition arm is not supported on the amt8000 dialect");
                    return Ok(());
                }
                let result = self
                    .client
                    .arm(None)
                    .await
                    .map_err(|e| BridgeError::ExternalIo(e.to_string()))?;
                if matches!(result, ArmResult::Failed) {
                    return Err(BridgeError::Nack { code: 0, message: "arm command failed" });
                }
                info!("amt8000 armed ({result:?})");
            }
            BridgeCommand::Disarm(partition) => {
                if !matches!(partition, isecnet_proto::command::Partition::All) {
                    warn!("per-partition disarm is not supported on the amt8000 dialect");
                    return Ok(());
                }
                let ok = self
                    .client
                    .disarm(None)
                    .await
                    .map_err(|e| BridgeError::ExternalIo(e.to_string()))?;
                if !ok {
                    return Err(BridgeError::Nack { code: 0, message: "disarm command failed" });
                }
                info!("amt8000 disarmed");
            }
            BridgeCommand::Panic => {
                info!("triggering audible panic from the home automation bus");
                let ok = self
                    .client
                    .panic(1)
                    .await
                    .map_err(|e| BridgeError::ExternalIo(e.to_string()))?;
                if !ok {
                    return Err(BridgeError::Nack { code: 0, message: "panic command failed" });
                }
            }
        }
        Ok(())
    }

    pub async fn poll_status(&self, state: &Mutex<BridgeState>) -> Result<crate::client_amt8000::FullLegacyStatus, BridgeError> {
        if !self.connect_and_auth().await {
            return Err(BridgeError::Auth(isecnet_proto::amt8000::AuthResult::Unknown(0)));
        }
        let full = self
            .client
            .status()
            .await
            .map_err(|e| BridgeError::ExternalIo(e.to_string()))?;

        let mut guard = state.lock().await;
        for (&zone, zone_state) in guard.zone_states.iter_mut() {
            let zone = zone as usize;
            let open = full.status.zones_open.iter().any(|&z| z as usize == zone);
            if *zone_state != crate::state::ZoneState::Triggered {
                *zone_state = if open { crate::state::ZoneState::Open } else { crate::state::ZoneState::Closed };
            }
        }
        Ok(full)
    }

    pub async fn shutdown(&self) {
        self.client.close().await;
    }
}

/// Portuguese event lines emitted by the `receptorip` sidecar, translated to
/// derived-state transitions. The zone number is always the last
/// whitespace-delimited token on the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarEvent {
    Armed,
    Disarmed,
    Panic,
    AcPowerLost,
    AcPowerRestored,
    SystemBatteryLow,
    SystemBatteryRestored,
    ZoneTriggered(u16),
    ZoneRestored(u16),
}

/// Parses one `receptorip` output line; `None` for lines that match none of
/// the documented substrings.
pub fn parse_sidecar_line(line: &str) -> Option<SidecarEvent> {
    let last_token = || line.split_whitespace().last()?.parse::<u16>().ok();
    if line.contains("Ativacao remota app") {
        Some(SidecarEvent::Armed)
    } else if line.contains("Desativacao remota app") {
        Some(SidecarEvent::Disarmed)
    } else if line.contains("Panico") {
        Some(SidecarEvent::Panic)
    } else if line.contains("Falta de energia AC") {
        Some(SidecarEvent::AcPowerLost)
    } else if line.contains("Retorno de energia AC") {
        Some(SidecarEvent::AcPowerRestored)
    } else if line.contains("Bateria do sistema baixa") {
        Some(SidecarEvent::SystemBatteryLow)
    } else if line.contains("Recuperacao de bateria") || line.contains("Recuperacao bateria do sistema baixa") {
        Some(SidecarEvent::SystemBatteryRestored)
    } else if line.contains("Disparo de zona") {
        last_token().map(SidecarEvent::ZoneTriggered)
    } else if line.contains("Restauracao de zona") {
        last_token().map(SidecarEvent::ZoneRestored)
    } else {
        None
    }
}

/// Spawns the `receptorip` binary and streams its stdout lines as
/// [`SidecarEvent`]s over `tx`. The process is optional: its absence is a
/// fatal startup error (see `spec.md` §6 exit codes), but once running its
/// failures are logged, not propagated.
pub async fn spawn_sidecar(binary_path: &str, config_path: &str, tx: mpsc::UnboundedSender<SidecarEvent>) -> std::io::Result<()> {
    let mut child = Command::new(binary_path)
        .arg(config_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdout = child.stdout.take().expect("spawned with Stdio::piped()");
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    info!("receptorip event: {line}");
                    if let Some(event) = parse_sidecar_line(line) {
                        let _ = tx.send(event);
                    }
                }
                Ok(None) => {
                    warn!("receptorip process ended");
                    break;
                }
                Err(e) => {
                    warn!("receptorip read error: {e}");
                    break;
                }
            }
        }
        let _ = child.wait().await;
    });
    Ok(())
}

/// Applies a sidecar event to the shared bridge state; returns whether the
/// zone-state map changed and therefore needs republishing.
pub fn apply_sidecar_event(state: &mut BridgeState, event: &SidecarEvent) -> bool {
    match event {
        SidecarEvent::Disarmed => {
            for zone_state in state.zone_states.values_mut() {
                *zone_state = crate::state::ZoneState::Closed;
            }
            true
        }
        SidecarEvent::ZoneTriggered(zone) => {
            if state.zone_states.contains_key(zone) {
                state.set_zone_triggered(*zone);
                true
            } else {
                false
            }
        }
        SidecarEvent::ZoneRestored(zone) => {
            if state.zone_states.contains_key(zone) {
                state.set_zone_closed(*zone);
                true
            } else {
                false
            }
        }
        SidecarEvent::Armed | SidecarEvent::Panic | SidecarEvent::AcPowerLost | SidecarEvent::AcPowerRestored
        | SidecarEvent::SystemBatteryLow | SidecarEvent::SystemBatteryRestored => false,
    }
}

/// A fire-and-forget siren-off pulse 30s after a sidecar `Panico` line,
/// reset (not stacked) by a subsequent panic, mirroring the ISECNet dialect.
pub fn schedule_sidecar_panic_off(handler: &Arc<Amt8000Handler>, publish_off: impl FnOnce() + Send + 'static) {
    let generation = handler.panic_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if handler.panic_generation.load(std::sync::atomic::Ordering::SeqCst) == generation {
            publish_off();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_documented_sidecar_lines() {
        assert_eq!(parse_sidecar_line("Ativacao remota app por usuario 1"), Some(SidecarEvent::Armed));
        assert_eq!(parse_sidecar_line("Desativacao remota app"), Some(SidecarEvent::Disarmed));
        assert_eq!(parse_sidecar_line("Panico silencioso"), Some(SidecarEvent::Panic));
        assert_eq!(parse_sidecar_line("Falta de energia AC"), Some(SidecarEvent::AcPowerLost));
        assert_eq!(parse_sidecar_line("Retorno de energia AC"), Some(SidecarEvent::AcPowerRestored));
        assert_eq!(parse_sidecar_line("Bateria do sistema baixa"), Some(SidecarEvent::SystemBatteryLow));
        assert_eq!(parse_sidecar_line("Recuperacao de bateria"), Some(SidecarEvent::SystemBatteryRestored));
        assert_eq!(parse_sidecar_line("Disparo de zona 12"), Some(SidecarEvent::ZoneTriggered(12)));
        assert_eq!(parse_sidecar_line("Restauracao de zona 12"), Some(SidecarEvent::ZoneRestored(12)));
        assert_eq!(parse_sidecar_line("some unrelated log line"), None);
    }

    #[test]
    fn disarmed_event_clears_all_zone_states() {
        let mut state = BridgeState::new(&[1, 2]);
        state.set_zone_triggered(1);
        assert!(apply_sidecar_event(&mut state, &SidecarEvent::Disarmed));
        assert_eq!(state.zone_states[&1], crate::state::ZoneState::Closed);
        assert_eq!(state.zone_states[&2], crate::state::ZoneState::Closed);
    }

    #[test]
    fn zone_restored_does_not_overwrite_unknown_zone() {
        let mut state = BridgeState::new(&[1]);
        assert!(!apply_sidecar_event(&mut state, &SidecarEvent::ZoneRestored(99)));
    }

    #[test]
    fn zone_triggered_then_restored_roundtrip() {
        let mut state = BridgeState::new(&[5]);
        assert!(apply_sidecar_event(&mut state, &SidecarEvent::ZoneTriggered(5)));
        assert_eq!(state.zone_states[&5], crate::state::ZoneState::Triggered);
        assert!(apply_sidecar_event(&mut state, &SidecarEvent::ZoneRestored(5)));
        assert_eq!(state.zone_states[&5], crate::state::ZoneState::Closed);
    }
}
