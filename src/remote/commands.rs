//! Shell commands issued on workers.
//!
//! Taps are managed with iproute2 and attached to an Open vSwitch bridge;
//! VLAN tags are access-port tags set with `ovs-vsctl`.

use crate::alloc::VlanId;

/// Builds the commands for one bridge.
#[derive(Debug, Clone)]
pub struct CommandSet {
    bridge: String,
    sudo: bool,
}

impl CommandSet {
    pub fn new(bridge: impl Into<String>, sudo: bool) -> Self {
        CommandSet {
            bridge: bridge.into(),
            sudo,
        }
    }

    fn privileged(&self, command: String) -> String {
        if self.sudo {
            format!("sudo -n {}", command)
        } else {
            command
        }
    }

    /// Exits 0 when the interface exists.
    pub fn tap_present(&self, tap: &str) -> String {
        format!("ip link show dev {} >/dev/null 2>&1", shell_quote(tap))
    }

    /// Creates the tap, brings it up and attaches it to the bridge.
    pub fn create_tap(&self, tap: &str) -> String {
        let tap = shell_quote(tap);
        [
            self.privileged(format!("ip tuntap add dev {} mode tap", tap)),
            self.privileged(format!("ip link set dev {} up", tap)),
            self.privileged(format!(
                "ovs-vsctl --may-exist add-port {} {}",
                shell_quote(&self.bridge),
                tap
            )),
        ]
        .join(" && ")
    }

    pub fn set_vlan(&self, tap: &str, vlan: VlanId) -> String {
        self.privileged(format!("ovs-vsctl set port {} tag={}", shell_quote(tap), vlan))
    }

    pub fn clear_vlan(&self, tap: &str) -> String {
        self.privileged(format!("ovs-vsctl clear port {} tag", shell_quote(tap)))
    }

    /// Drops the switch port and the interface; missing ones are not an error.
    pub fn delete_tap(&self, tap: &str) -> String {
        let tap = shell_quote(tap);
        format!(
            "{} && {{ {} 2>/dev/null || true; }}",
            self.privileged(format!(
                "ovs-vsctl --if-exists del-port {} {}",
                shell_quote(&self.bridge),
                tap
            )),
            self.privileged(format!("ip link delete {}", tap))
        )
    }
}

/// Quotes a word for a POSIX shell unless it only holds safe characters.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tap_with_sudo() {
        let commands = CommandSet::new("br-int", true);
        assert_eq!(
            commands.create_tap("br-int-VM1-tap2"),
            "sudo -n ip tuntap add dev br-int-VM1-tap2 mode tap && \
             sudo -n ip link set dev br-int-VM1-tap2 up && \
             sudo -n ovs-vsctl --may-exist add-port br-int br-int-VM1-tap2"
        );
    }

    #[test]
    fn test_vlan_commands_without_sudo() {
        let commands = CommandSet::new("br-int", false);
        assert_eq!(commands.set_vlan("tap2", 104), "ovs-vsctl set port tap2 tag=104");
        assert_eq!(commands.clear_vlan("tap2"), "ovs-vsctl clear port tap2 tag");
        assert_eq!(commands.tap_present("tap2"), "ip link show dev tap2 >/dev/null 2>&1");
    }

    #[test]
    fn test_delete_tap() {
        let commands = CommandSet::new("br-int", true);
        assert_eq!(
            commands.delete_tap("br-int-VM1-tap2"),
            "sudo -n ovs-vsctl --if-exists del-port br-int br-int-VM1-tap2 && \
             { sudo -n ip link delete br-int-VM1-tap2 2>/dev/null || true; }"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("br-int-VM1-tap2"), "br-int-VM1-tap2");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
