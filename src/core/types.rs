//! Domain types for SoftAP provisioning

use std::{fmt, net::Ipv4Addr, str::FromStr};

use serde::{Deserialize, Serialize};

/// Connectivity state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Broadcasting as an access point only
    ApOnly,
    /// Attempting to join the upstream network
    JoiningUpstream,
    /// Joined with an address assigned
    Joined,
    /// Upstream link lost, waiting for the next retry
    Disconnected,
}

/// Snapshot of the connectivity state published after every processed event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityStatus {
    /// Current connectivity state
    pub state: ConnectivityState,
    /// Upstream network SSID (if a join was requested)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Assigned IPv4 address (only while joined)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<Ipv4Addr>,
    /// Reconnect attempts made for the current join
    pub retry_count: u32,
}

impl ConnectivityStatus {
    pub fn ap_only() -> Self {
        Self {
            state: ConnectivityState::ApOnly,
            ssid: None,
            ip_address: None,
            retry_count: 0,
        }
    }
}

/// Password or passphrase that must never be logged in full
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value (only for handing to the radio driver)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} chars>", self.0.chars().count())
    }
}

/// Upstream network credentials parsed from a provisioning record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Upstream network SSID
    pub identifier: String,
    /// Upstream network passphrase
    pub credential: Secret,
}

/// Authentication mode advertised by the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Open,
    Wpa2Psk,
    WpaWpa2Psk,
}

impl AuthMode {
    pub fn requires_password(&self) -> bool {
        !matches!(self, AuthMode::Open)
    }
}

/// Access point broadcast configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub password: Secret,
    pub max_clients: u8,
    pub auth_mode: AuthMode,
}

/// MAC address of a station associated with the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 6]);

impl PeerId {
    pub fn new(mac: [u8; 6]) -> Self {
        Self(mac)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for PeerId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().split(':').collect();
        let mut mac = [0u8; 6];
        hex::decode_to_slice(digits, &mut mac)?;
        Ok(Self(mac))
    }
}

/// Identifier for an accepted provisioning connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_masked() {
        let secret = Secret::new("hunter22");
        assert_eq!(format!("{secret}"), "<8 chars>");
        assert_eq!(format!("{secret:?}"), "Secret(<8 chars>)");
        assert_eq!(secret.expose(), "hunter22");
    }

    #[test]
    fn test_credential_record_debug_hides_password() {
        let record = CredentialRecord {
            identifier: "home".to_string(),
            credential: Secret::new("topsecret"),
        };
        let debug = format!("{record:?}");
        assert!(debug.contains("home"));
        assert!(!debug.contains("topsecret"));
    }

    #[test]
    fn test_peer_id_parse_and_display() {
        let peer: PeerId = "AA:bb:0c:DD:ee:01".parse().unwrap();
        assert_eq!(peer.octets(), [0xaa, 0xbb, 0x0c, 0xdd, 0xee, 0x01]);
        assert_eq!(peer.to_string(), "aa:bb:0c:dd:ee:01");
    }

    #[test]
    fn test_peer_id_parse_invalid() {
        assert!("aa:bb:cc".parse::<PeerId>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<PeerId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_status_serialization_omits_missing_fields() {
        let json = serde_json::to_string(&ConnectivityStatus::ap_only()).unwrap();
        assert!(json.contains(r#""state":"ap_only""#));
        assert!(!json.contains("ssid"));
        assert!(!json.contains("ip_address"));
    }
}
