//! Port mapping between the host and a container.
//!
//! The engine describes published ports as a [`PortMap`]: container ports
//! (`"80/tcp"`) mapped to zero or more host bindings. The runtime's NAT
//! model is narrower, so [`translate_port_bindings`] validates the map and
//! flattens it into [`NatPortBinding`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bock_common::{BockError, BockResult};
use serde::{Deserialize, Serialize};

/// Protocol for port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP protocol.
    Tcp,
    /// UDP protocol.
    Udp,
}

impl Protocol {
    /// Lower-case protocol name, as used in port keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = BockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            _ => Err(BockError::InvalidPortBinding {
                message: format!("invalid protocol {s}"),
            }),
        }
    }
}

/// A container port key such as `80/tcp`.
///
/// The key is kept verbatim; its parts are only interpreted when the map is
/// translated, so a malformed key is reported against the binding that uses it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(String);

impl Port {
    /// Build a key from a protocol name and a port.
    #[must_use]
    pub fn new(proto: &str, port: &str) -> Self {
        Self(format!("{port}/{proto}"))
    }

    /// The protocol part; `tcp` when the key has none.
    #[must_use]
    pub fn proto(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, proto)) if !proto.is_empty() => proto,
            _ => "tcp",
        }
    }

    /// The port part.
    #[must_use]
    pub fn port(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(port, _)| port)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Port {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A host-side binding for a container port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    /// Host IP to bind to; empty means all addresses.
    #[serde(default)]
    pub host_ip: String,
    /// Host port, as given by the user.
    #[serde(default)]
    pub host_port: String,
}

impl PortBinding {
    /// Binding on all host addresses.
    #[must_use]
    pub fn host_port(port: impl Into<String>) -> Self {
        Self {
            host_ip: String::new(),
            host_port: port.into(),
        }
    }

    /// Set the host IP to bind to.
    #[must_use]
    pub fn with_host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = ip.into();
        self
    }
}

/// Container ports mapped to their host bindings.
pub type PortMap = BTreeMap<Port, Vec<PortBinding>>;

/// One NAT rule as understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NatPortBinding {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port inside the container.
    pub internal_port: u16,
    /// Port on the host.
    pub external_port: u16,
}

/// Validate a port map and flatten it into NAT rules.
///
/// # Errors
///
/// Fails with [`BockError::InvalidPortBinding`] when a protocol is neither
/// tcp nor udp, a container port has more than one host port, a binding
/// names a host IP, or a port is not a number in `0..=65535`.
pub fn translate_port_bindings(map: &PortMap) -> BockResult<Vec<NatPortBinding>> {
    let mut rules = Vec::new();

    for (port, bindings) in map {
        let protocol: Protocol = port.proto().parse()?;

        if bindings.len() > 1 {
            return Err(invalid(
                "more than one host port per container port is not supported in NAT settings",
            ));
        }

        for binding in bindings {
            if !binding.host_ip.is_empty() {
                return Err(invalid("host IP addresses are not supported in NAT settings"));
            }

            let external = parse_port(&binding.host_port, "container")?;
            let internal = parse_port(port.port(), "internal")?;

            tracing::debug!(
                %protocol,
                internal_port = internal,
                external_port = external,
                "Translated port binding"
            );

            rules.push(NatPortBinding {
                protocol,
                internal_port: internal,
                external_port: external,
            });
        }
    }

    Ok(rules)
}

fn parse_port(value: &str, which: &str) -> BockResult<u16> {
    let number: i64 = value
        .parse()
        .map_err(|e| invalid(format!("invalid {which} port {value}: {e}")))?;
    u16::try_from(number).map_err(|_| invalid("specified NAT port is not in allowed range"))
}

fn invalid(message: impl Into<String>) -> BockError {
    BockError::InvalidPortBinding {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(port: &str, binding: PortBinding) -> PortMap {
        let mut map = PortMap::new();
        map.insert(Port::from(port), vec![binding]);
        map
    }

    #[test]
    fn port_key_parts() {
        let port = Port::new("udp", "53");
        assert_eq!(port.to_string(), "53/udp");
        assert_eq!(port.port(), "53");
        assert_eq!(port.proto(), "udp");
        assert_eq!(Port::from("8080").proto(), "tcp");
    }

    #[test]
    fn tcp_binding_translates() {
        let rules = translate_port_bindings(&single("80/tcp", PortBinding::host_port("8080"))).unwrap();
        assert_eq!(
            rules,
            vec![NatPortBinding {
                protocol: Protocol::Tcp,
                internal_port: 80,
                external_port: 8080,
            }]
        );

        let json = serde_json::to_value(rules[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Protocol": "TCP", "InternalPort": 80, "ExternalPort": 8080})
        );
    }

    #[test]
    fn protocol_is_case_insensitive() {
        let rules = translate_port_bindings(&single("53/UDP", PortBinding::host_port("5353"))).unwrap();
        assert_eq!(rules[0].protocol, Protocol::Udp);
    }

    #[test]
    fn rejects_unknown_protocol() {
        let err = translate_port_bindings(&single("80/sctp", PortBinding::host_port("80"))).unwrap_err();
        assert!(err.to_string().contains("invalid protocol sctp"));
    }

    #[test]
    fn rejects_two_host_ports() {
        let mut map = PortMap::new();
        map.insert(
            Port::from("80/tcp"),
            vec![PortBinding::host_port("8080"), PortBinding::host_port("8081")],
        );
        assert!(matches!(
            translate_port_bindings(&map),
            Err(BockError::InvalidPortBinding { .. })
        ));
    }

    #[test]
    fn rejects_host_ip() {
        let binding = PortBinding::host_port("8080").with_host_ip("10.0.0.1");
        let err = translate_port_bindings(&single("80/tcp", binding)).unwrap_err();
        assert!(err.to_string().contains("host IP"));
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        for (key, host) in [("80/tcp", "65536"), ("80/tcp", "-1"), ("70000/tcp", "80"), ("80/tcp", "http")] {
            assert!(
                translate_port_bindings(&single(key, PortBinding::host_port(host))).is_err(),
                "{key} -> {host} should be rejected"
            );
        }
    }

    #[test]
    fn empty_binding_list_yields_no_rules() {
        let mut map = PortMap::new();
        map.insert(Port::from("80/tcp"), Vec::new());
        assert!(translate_port_bindings(&map).unwrap().is_empty());
    }

    #[test]
    fn port_map_serialization() {
        let map = single("80/tcp", PortBinding::host_port("8080"));
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"80/tcp":[{"HostIp":"","HostPort":"8080"}]}"#);
        let parsed: PortMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }

    proptest::proptest! {
        #[test]
        fn every_in_range_pair_is_accepted(internal in 0u16..=u16::MAX, external in 0u16..=u16::MAX) {
            let map = single(&format!("{internal}/udp"), PortBinding::host_port(external.to_string()));
            let rules = translate_port_bindings(&map).unwrap();
            proptest::prop_assert_eq!(rules[0].internal_port, internal);
            proptest::prop_assert_eq!(rules[0].external_port, external);
        }

        #[test]
        fn every_out_of_range_host_port_is_rejected(external in 65_536i64..10_000_000) {
            let map = single("80/tcp", PortBinding::host_port(external.to_string()));
            proptest::prop_assert!(translate_port_bindings(&map).is_err());
        }
    }
}
