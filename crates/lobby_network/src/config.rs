//! Network configuration for a lobby node.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::NetworkError;

/// Half-open range `start..end` of TCP ports nodes on one host are expected
/// to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Iterate every port in the range.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }
}

/// Configuration for the lobby networking layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ports swept by local discovery and tried when binding.
    pub port_range: PortRange,

    /// First port to try when binding. Defaults to the start of `port_range`.
    pub preferred_port: Option<u16>,

    /// Address the listener binds to.
    pub bind_host: IpAddr,

    /// Host advertised to peers in discovery and heartbeat messages. Detected
    /// at startup when unset.
    pub advertise_host: Option<String>,

    /// Host targeted by the local port sweep.
    pub sweep_host: String,

    /// Maximum number of peers held in the registry.
    pub max_peers: usize,

    /// Interval between discovery rounds.
    #[serde(with = "duration_serde")]
    pub discovery_interval: Duration,

    /// Interval between heartbeat rounds.
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Peer liveness timeout, also the bound on outbound connection attempts.
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Number of players grouped into one game session.
    pub match_size: usize,

    /// How long a session plays before a winner is drawn.
    #[serde(with = "duration_serde")]
    pub game_duration: Duration,

    /// Largest accepted frame payload, in bytes.
    pub max_message_size: usize,

    /// Messages admitted per sender within `rate_limit_window`.
    pub rate_limit_messages: usize,

    #[serde(with = "duration_serde")]
    pub rate_limit_window: Duration,

    /// Discovery messages with a different version are dropped.
    pub protocol_version: String,

    /// Static `host:port` addresses contacted when no peers are known.
    pub seed_nodes: Vec<String>,

    /// Number of successive ports tried before startup gives up.
    pub bind_attempts: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port_range: PortRange::new(8000, 8100),
            preferred_port: None,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_host: None,
            sweep_host: "127.0.0.1".to_string(),
            max_peers: 50,
            discovery_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(15),
            match_size: 3,
            game_duration: Duration::from_secs(60),
            max_message_size: codec::DEFAULT_MAX_FRAME,
            rate_limit_messages: 100,
            rate_limit_window: Duration::from_secs(60),
            protocol_version: "1.0".to_string(),
            seed_nodes: Vec::new(),
            bind_attempts: 10,
        }
    }
}

impl NetworkConfig {
    /// Check that every knob holds a usable value.
    pub fn validate(&self) -> Result<(), NetworkError> {
        let positive_durations = [
            ("discovery_interval", self.discovery_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("connection_timeout", self.connection_timeout),
            ("game_duration", self.game_duration),
            ("rate_limit_window", self.rate_limit_window),
        ];
        for (name, value) in positive_durations {
            if value.is_zero() {
                return Err(NetworkError::InvalidConfig(format!("{name} must be positive")));
            }
        }

        let positive_counts = [
            ("max_peers", self.max_peers),
            ("max_message_size", self.max_message_size),
            ("rate_limit_messages", self.rate_limit_messages),
            ("bind_attempts", self.bind_attempts),
        ];
        for (name, value) in positive_counts {
            if value == 0 {
                return Err(NetworkError::InvalidConfig(format!("{name} must be positive")));
            }
        }

        if self.match_size < 2 {
            return Err(NetworkError::InvalidConfig(
                "match_size must be at least 2".to_string(),
            ));
        }
        if self.port_range.start == 0 || self.port_range.start >= self.port_range.end {
            return Err(NetworkError::InvalidConfig(format!(
                "invalid port range {}-{}",
                self.port_range.start, self.port_range.end
            )));
        }
        if let Some(port) = self.preferred_port {
            if !self.port_range.contains(port) {
                return Err(NetworkError::InvalidConfig(format!(
                    "preferred port {port} outside range {}-{}",
                    self.port_range.start, self.port_range.end
                )));
            }
        }
        if self.protocol_version.is_empty() {
            return Err(NetworkError::InvalidConfig(
                "protocol_version must not be empty".to_string(),
            ));
        }
        self.seed_addrs()?;
        Ok(())
    }

    /// Parse `seed_nodes` into `(host, port)` pairs.
    pub fn seed_addrs(&self) -> Result<Vec<(String, u16)>, NetworkError> {
        self.seed_nodes.iter().map(|s| parse_host_port(s)).collect()
    }

    /// Ports tried in order when binding the listener.
    pub fn bind_candidates(&self) -> Vec<u16> {
        let first = self.preferred_port.unwrap_or(self.port_range.start);
        (first..self.port_range.end).take(self.bind_attempts).collect()
    }

    /// Host to advertise to peers. An explicit `advertise_host` wins, then a
    /// specific `bind_host`, then `detected`, then loopback.
    pub fn resolve_advertise_host(&self, detected: Option<IpAddr>) -> String {
        if let Some(host) = &self.advertise_host {
            return host.clone();
        }
        if !self.bind_host.is_unspecified() {
            return self.bind_host.to_string();
        }
        detected
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .to_string()
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetworkConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn parse_host_port(s: &str) -> Result<(String, u16), NetworkError> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| NetworkError::InvalidConfig(format!("seed '{s}' is not host:port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| NetworkError::InvalidConfig(format!("seed '{s}' has an invalid port")))?;
    if host.is_empty() {
        return Err(NetworkError::InvalidConfig(format!("seed '{s}' has an empty host")));
    }
    Ok((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Seconds as a float, so sub-second intervals survive a save.
    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(dur.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
