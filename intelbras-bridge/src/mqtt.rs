//! MQTT topic tree and the status-to-topic derivation logic: `state` is
//! "Disparada" only while armed and actively alarming, and the four
//! `partition_[a-d]_state` topics share one ON/OFF value whenever
//! per-partition state isn't meaningful (siren sounding, disarmed, or
//! partitions disabled).

use isecnet_proto::status::{CentralStatus, PartitionStatus};
use log::warn;
use rumqttc::{AsyncClient, QoS};

use crate::state::{BridgeState, ZoneState};

pub const TOPIC_BASE: &str = "intelbras/alarm";

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    async fn publish(&self, suffix: &str, payload: impl Into<String>, retain: bool) {
        let topic = format!("{TOPIC_BASE}{suffix}");
        let payload = payload.into();
        if let Err(e) = self
            .client
            .publish(&topic, QoS::AtLeastOnce, retain, payload)
            .await
        {
            warn!("mqtt publish to {topic} failed: {e}");
        }
    }

    pub async fn publish_availability(&self, online: bool) {
        self.publish("/availability", if online { "online" } else { "offline" }, true).await;
    }

    pub async fn publish_panic(&self, on: bool) {
        self.publish("/panic", if on { "on" } else { "off" }, false).await;
    }

    fn zone_payload(state: ZoneState) -> &'static str {
        match state {
            ZoneState::Unknown => "Desconocido",
            ZoneState::Closed => "Cerrada",
            ZoneState::Open => "Abierta",
            ZoneState::Triggered => "Disparada",
        }
    }

    /// "Disparada" only while armed and actively alarming (siren or a
    /// violated zone); a merely-remembered trigger falls back to the
    /// armed/disarmed state below, not to the alarm itself.
    fn overall_state(status: &CentralStatus, partitions: &PartitionStatus) -> &'static str {
        let triggered_now = status.siren_on || !status.zones.violated.is_empty();
        if status.armed && triggered_now {
            "Disparada"
        } else if status.armed {
            if partitions.enabled {
                if partitions.all_armed() {
                    "Armada"
                } else {
                    "Armada Parcial"
                }
            } else {
                "Armada"
            }
        } else {
            "Desarmada"
        }
    }

    /// Every partition topic is always published; the value collapses to a
    /// shared ON/OFF when the panel isn't armed, the siren is sounding, or
    /// per-partition state isn't meaningful (`enabled` is false).
    async fn publish_partitions(&self, status: &CentralStatus) {
        let partitions = &status.partitions;
        let shared = if !status.armed && !status.siren_on {
            Some(false)
        } else if status.siren_on {
            Some(true)
        } else if partitions.enabled {
            None
        } else {
            Some(status.armed)
        };

        let per_letter = [
            ("a", partitions.a),
            ("b", partitions.b),
            ("c", partitions.c),
            ("d", partitions.d),
        ];
        for (name, armed) in per_letter {
            let value = shared.unwrap_or(armed);
            self.publish(&format!("/partition_{name}_state"), on_off(value), true).await;
        }
    }

    fn model_name(model: u8) -> String {
        match model {
            0x41 => "AMT-4010".to_string(),
            0x1E => "AMT-2018".to_string(),
            other => format!("0x{other:02X}"),
        }
    }

    /// Battery absent/short reports empty (0%); low reports a quarter; a
    /// clean read reports full, since the poll carries no finer granularity.
    fn battery_percentage(status: &CentralStatus) -> u8 {
        use isecnet_proto::status::ProblemFlags;
        if status.problems.power.contains(ProblemFlags::BATTERY_ABSENT)
            || status.problems.power.contains(ProblemFlags::BATTERY_SHORT)
        {
            0
        } else if status.problems.power.contains(ProblemFlags::LOW_BATTERY) {
            25
        } else {
            100
        }
    }

    /// Publishes every derived topic for a freshly-applied status poll.
    pub async fn publish_status(&self, status: &CentralStatus, bridge_state: &BridgeState) {
        self.publish("/model", Self::model_name(status.model), true).await;
        self.publish("/version", status.firmware_string(), true).await;
        self.publish_battery_percentage(Some(Self::battery_percentage(status))).await;

        let tampered = !status.zones.tamper.is_empty() || !status.problems.keyboard_tampers.is_empty();
        self.publish("/tamper", on_off(tampered), true).await;
        self.publish("/alarm_memory", on_off(status.triggered), true).await;
        self.publish(
            "/ac_power",
            on_off(!status.problems.power.contains(isecnet_proto::status::ProblemFlags::AC_FAILURE)),
            true,
        )
        .await;
        let system_battery_bad = status.problems.power.contains(isecnet_proto::status::ProblemFlags::LOW_BATTERY)
            || status.problems.power.contains(isecnet_proto::status::ProblemFlags::BATTERY_ABSENT)
            || status.problems.power.contains(isecnet_proto::status::ProblemFlags::BATTERY_SHORT);
        self.publish("/system_battery", on_off(system_battery_bad), true).await;

        self.publish_partitions(status).await;

        for (&zone, &state) in &bridge_state.zone_states {
            self.publish(&format!("/zone_{zone}"), Self::zone_payload(state), true).await;
        }

        let triggered = bridge_state.triggered_zones();
        let triggered_payload = if triggered.is_empty() {
            "Ninguna".to_string()
        } else {
            triggered.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
        };
        self.publish("/triggered_zones", triggered_payload, true).await;

        self.publish("/state", Self::overall_state(status, &status.partitions), true).await;
    }

    pub async fn publish_battery_percentage(&self, percentage: Option<u8>) {
        let payload = percentage.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string());
        self.publish("/battery_percentage", payload, true).await;
    }

    pub async fn publish_ac_power(&self, ok: bool) {
        self.publish("/ac_power", on_off(ok), true).await;
    }

    pub async fn publish_system_battery(&self, low: bool) {
        self.publish("/system_battery", on_off(low), true).await;
    }

    pub async fn publish_tamper(&self, tampered: bool) {
        self.publish("/tamper", on_off(tampered), true).await;
    }

    pub async fn publish_zone_states(&self, bridge_state: &BridgeState) {
        for (&zone, &state) in &bridge_state.zone_states {
            self.publish(&format!("/zone_{zone}"), Self::zone_payload(state), true).await;
        }
    }

    pub async fn publish_triggered_zones(&self, bridge_state: &BridgeState) {
        let triggered = bridge_state.triggered_zones();
        let payload = if triggered.is_empty() {
            "Ninguna".to_string()
        } else {
            triggered.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
        };
        self.publish("/triggered_zones", payload, true).await;
    }

    pub async fn publish_overall_state(&self, state: &str) {
        self.publish("/state", state.to_string(), true).await;
    }

    /// Publishes all four partition topics as OFF; used for the on-connect
    /// initial-state sequence before the first status poll lands.
    pub async fn publish_partitions_off(&self) {
        for name in ["a", "b", "c", "d"] {
            self.publish(&format!("/partition_{name}_state"), "off", true).await;
        }
    }

    /// Publishes the legacy (amt8000) status poll result: model/version,
    /// battery, tamper, arm state, and zone states, grounded on
    /// `protocol_handlers/amt8000.py::poll_status`.
    pub async fn publish_legacy_status(
        &self,
        legacy: &isecnet_proto::amt8000::LegacyStatus,
        battery_percentage: Option<u8>,
        tamper: bool,
        bridge_state: &BridgeState,
    ) {
        use isecnet_proto::amt8000::ArmState;

        self.publish("/model", if legacy.model == 1 { "AMT-8000".to_string() } else { "Unknown".to_string() }, true)
            .await;
        self.publish(
            "/version",
            format!("{}.{}.{}", legacy.firmware.0, legacy.firmware.1, legacy.firmware.2),
            true,
        )
        .await;

        if let Some(mapped) = match legacy.arm_state {
            ArmState::ArmedAway => Some("Armada"),
            ArmState::Partial => Some("Armada Parcial"),
            ArmState::Disarmed => Some("Desarmada"),
            ArmState::Unknown(_) => None,
        } {
            self.publish_overall_state(mapped).await;
        }

        let triggered_payload = if legacy.zones_firing { "Desconocido" } else { "Ninguna" };
        self.publish("/triggered_zones", triggered_payload, true).await;

        self.publish_battery_percentage(battery_percentage).await;
        self.publish_tamper(tamper).await;
        self.publish_zone_states(bridge_state).await;
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub const COMMAND_TOPIC: &str = "intelbras/alarm/command";

#[cfg(test)]
mod tests {
    use super::*;
    use isecnet_proto::status::PartialCentralStatus;

    fn status_fixture(mut patch: impl FnMut(&mut CentralStatus)) -> CentralStatus {
        let mut status = PartialCentralStatus::parse(&[0u8; 43]).unwrap().promote();
        patch(&mut status);
        status
    }

    #[test]
    fn overall_state_prioritizes_triggered_over_armed() {
        let status = status_fixture(|s| {
            s.armed = true;
            s.zones.violated.insert(1);
        });
        assert_eq!(MqttPublisher::overall_state(&status, &status.partitions), "Disparada");
    }

    #[test]
    fn overall_state_ignores_stale_violation_when_disarmed() {
        let status = status_fixture(|s| {
            s.armed = false;
            s.zones.violated.insert(1);
        });
        assert_eq!(MqttPublisher::overall_state(&status, &status.partitions), "Desarmada");
    }

    #[test]
    fn overall_state_distinguishes_full_vs_partial_arm() {
        let all_armed = status_fixture(|s| {
            s.armed = true;
            s.partitions = PartitionStatus { enabled: true, a: true, b: true, c: true, d: true };
        });
        assert_eq!(MqttPublisher::overall_state(&all_armed, &all_armed.partitions), "Armada");

        let partial = status_fixture(|s| {
            s.armed = true;
            s.partitions = PartitionStatus { enabled: true, a: true, b: false, c: false, d: false };
        });
        assert_eq!(MqttPublisher::overall_state(&partial, &partial.partitions), "Armada Parcial");

        let none = status_fixture(|s| {
            s.armed = false;
            s.partitions = PartitionStatus { enabled: true, a: false, b: false, c: false, d: false };
        });
        assert_eq!(MqttPublisher::overall_state(&none, &none.partitions), "Desarmada");
    }

    #[test]
    fn model_name_maps_known_codes() {
        assert_eq!(MqttPublisher::model_name(0x41), "AMT-4010");
        assert_eq!(MqttPublisher::model_name(0x1E), "AMT-2018");
        assert_eq!(MqttPublisher::model_name(0x99), "0x99");
    }

    #[test]
    fn battery_percentage_prioritizes_absent_and_short_over_low() {
        use isecnet_proto::status::ProblemFlags;
        let absent = status_fixture(|s| s.problems.power = ProblemFlags::BATTERY_ABSENT);
        assert_eq!(MqttPublisher::battery_percentage(&absent), 0);

        let low = status_fixture(|s| s.problems.power = ProblemFlags::LOW_BATTERY);
        assert_eq!(MqttPublisher::battery_percentage(&low), 25);

        let healthy = status_fixture(|_| {});
        assert_eq!(MqttPublisher::battery_percentage(&healthy), 100);
    }
}
