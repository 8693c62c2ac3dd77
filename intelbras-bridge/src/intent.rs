//! Bridge command tokens as a closed tagged enum, parsed from the MQTT
//! command topic payload. `_PARTITION_` is an alias for `_PART_`.

use isecnet_proto::command::Partition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Arm(Partition),
    Disarm(Partition),
    Panic,
}

pub fn parse_command(raw: &str) -> Option<BridgeCommand> {
    let normalized = raw.trim().to_ascii_uppercase().replace("_PARTITION_", "_PART_");
    match normalized.as_str() {
        "ARM_AWAY" => Some(BridgeCommand::Arm(Partition::All)),
        "ARM_HOME" | "ARM_PART_A" => Some(BridgeCommand::Arm(Partition::A)),
        "ARM_NIGHT" | "ARM_PART_B" => Some(BridgeCommand::Arm(Partition::B)),
        "ARM_VACATION" | "ARM_PART_C" => Some(BridgeCommand::Arm(Partition::C)),
        "ARM_CUSTOM_BYPASS" | "ARM_PART_D" => Some(BridgeCommand::Arm(Partition::D)),
        "DISARM" => Some(BridgeCommand::Disarm(Partition::All)),
        "DISARM_PART_A" => Some(BridgeCommand::Disarm(Partition::A)),
        "DISARM_PART_B" => Some(BridgeCommand::Disarm(Partition::B)),
        "DISARM_PART_C" => Some(BridgeCommand::Disarm(Partition::C)),
        "DISARM_PART_D" => Some(BridgeCommand::Disarm(Partition::D)),
        "PANIC" => Some(BridgeCommand::Panic),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_alias_produces_identical_command() {
        assert_eq!(parse_command("ARM_PARTITION_B"), parse_command("ARM_PART_B"));
        assert_eq!(parse_command("ARM_NIGHT"), parse_command("ARM_PART_B"));
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(parse_command("DO_A_BARREL_ROLL"), None);
    }

    #[test]
    fn command_parsing_is_case_and_whitespace_insensitive() {
        assert_eq!(parse_command("  disarm  "), Some(BridgeCommand::Disarm(Partition::All)));
    }
}
