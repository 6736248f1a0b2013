//! Configuration system for Lookout.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LOOKOUT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lookout/config.toml
//!   3. ~/.config/lookout/config.toml
//!
//! `LookoutConfig` is the raw, serializable form. The engine never reads it
//! directly: `resolve()` validates it into an immutable `DiscoverySettings`.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Constraints;
use crate::groups::DesiredGroups;
use crate::wire::{self, ServiceId};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookoutConfig {
    pub discovery: DiscoveryConfig,
    pub multicast: MulticastConfig,
    pub unicast: UnicastConfig,
    pub trust: TrustConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Discover registries of every group. Overrides `groups` when true.
    pub all_groups: bool,
    /// Groups to discover when `all_groups` is false. Empty = discover nothing.
    pub groups: Vec<String>,
    /// Wire protocol version to speak.
    pub protocol_version: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Disable to turn off all multicast I/O.
    pub enabled: bool,
    /// Interface names or IPv4 addresses. Empty = system default interface.
    pub interfaces: Vec<String>,
    pub announcement_addr: String,
    pub request_addr: String,
    pub port: u16,
    pub ttl: u32,
    pub max_packet_size: usize,
    /// Number of request cycles each requestor runs.
    pub request_max: u32,
    pub request_interval_ms: u64,
    /// Pause after the last request cycle before the requestor exits.
    pub final_request_interval_ms: u64,
    /// Upper bound of the random delay before the first request. 0 = none.
    pub initial_request_delay_range_ms: u64,
    /// How often registries are expected to announce.
    pub announcement_interval_ms: u64,
    /// Missed-announcement multiplier before a registry is probed.
    pub announcement_tolerance: u32,
    /// How often interfaces that failed to join are retried.
    pub interface_retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnicastConfig {
    /// Connect and read timeout for unicast discovery.
    pub timeout_ms: u64,
    /// Upper bound of the random delay before resolving an announced registry. 0 = none.
    pub delay_range_ms: u64,
    /// Maximum concurrent unicast discovery tasks.
    pub max_concurrent_tasks: usize,
    /// How long termination waits for running tasks before cancelling them.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Registry service IDs (hex) that are never admitted.
    pub blocked_registrars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local HTTP control port.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            all_groups: true,
            groups: Vec::new(),
            protocol_version: wire::PROTOCOL_VERSION,
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interfaces: Vec::new(),
            announcement_addr: wire::ANNOUNCEMENT_ADDR.to_string(),
            request_addr: wire::REQUEST_ADDR.to_string(),
            port: wire::DISCOVERY_PORT,
            ttl: 15,
            max_packet_size: wire::DEFAULT_MAX_PACKET_SIZE,
            request_max: 7,
            request_interval_ms: 5_000,
            final_request_interval_ms: 120_000,
            initial_request_delay_range_ms: 0,
            announcement_interval_ms: 120_000,
            announcement_tolerance: 3,
            interface_retry_interval_ms: 300_000,
        }
    }
}

impl Default for UnicastConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            delay_range_ms: 0,
            max_concurrent_tasks: 10,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9101 }
    }
}

// ── Resolved settings ─────────────────────────────────────────────────────────

/// Validated, immutable engine settings.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub groups: DesiredGroups,
    pub multicast_enabled: bool,
    pub interfaces: Vec<String>,
    pub announcement_addr: Ipv4Addr,
    pub request_addr: Ipv4Addr,
    pub port: u16,
    pub constraints: Constraints,
    pub request_max: u32,
    pub request_interval: Duration,
    pub final_request_interval: Duration,
    pub initial_request_delay_range: Duration,
    pub announcement_interval: Duration,
    pub announcement_tolerance: u32,
    pub interface_retry_interval: Duration,
    pub unicast_delay_range: Duration,
    pub max_concurrent_tasks: usize,
    pub shutdown_grace: Duration,
}

impl DiscoverySettings {
    /// Silence after which a discovered registry is probed for reachability.
    pub fn silence_threshold(&self) -> Duration {
        self.announcement_interval * self.announcement_tolerance
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        // The default config always validates.
        match LookoutConfig::default().resolve() {
            Ok(settings) => settings,
            Err(e) => unreachable!("default configuration is invalid: {e}"),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("lookout")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LookoutConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            LookoutConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LOOKOUT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LookoutConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LOOKOUT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LOOKOUT_DISCOVERY__GROUPS") {
            self.apply_groups_override(&v);
        }
        if let Ok(v) = std::env::var("LOOKOUT_MULTICAST__ENABLED") {
            self.multicast.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("LOOKOUT_MULTICAST__INTERFACES") {
            self.multicast.interfaces = split_list(&v);
        }
        if let Ok(v) = std::env::var("LOOKOUT_MULTICAST__PORT") {
            if let Ok(p) = v.parse() {
                self.multicast.port = p;
            }
        }
        if let Ok(v) = std::env::var("LOOKOUT_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }

    /// `*` selects all groups; anything else is a comma-separated list.
    fn apply_groups_override(&mut self, value: &str) {
        if value.trim() == "*" {
            self.discovery.all_groups = true;
            self.discovery.groups.clear();
        } else {
            self.discovery.all_groups = false;
            self.discovery.groups = split_list(value);
        }
    }

    /// Validate and convert into engine settings.
    pub fn resolve(&self) -> Result<DiscoverySettings, ConfigError> {
        let m = &self.multicast;
        let u = &self.unicast;

        let announcement_addr = parse_multicast_addr("multicast.announcement_addr", &m.announcement_addr)?;
        let request_addr = parse_multicast_addr("multicast.request_addr", &m.request_addr)?;

        if m.ttl == 0 || m.ttl > 255 {
            return Err(invalid("multicast.ttl", format!("{} not in 1..=255", m.ttl)));
        }
        if m.max_packet_size < 256 {
            return Err(invalid(
                "multicast.max_packet_size",
                format!("{} is below the 256 byte minimum", m.max_packet_size),
            ));
        }
        if m.request_max == 0 {
            return Err(invalid("multicast.request_max", "must be at least 1"));
        }
        if m.announcement_interval_ms == 0 {
            return Err(invalid("multicast.announcement_interval_ms", "must be non-zero"));
        }
        if m.announcement_tolerance == 0 {
            return Err(invalid("multicast.announcement_tolerance", "must be at least 1"));
        }
        if m.interface_retry_interval_ms == 0 {
            return Err(invalid("multicast.interface_retry_interval_ms", "must be non-zero"));
        }
        if u.timeout_ms == 0 {
            return Err(invalid("unicast.timeout_ms", "must be non-zero"));
        }
        if u.max_concurrent_tasks == 0 {
            return Err(invalid("unicast.max_concurrent_tasks", "must be at least 1"));
        }

        let groups = if self.discovery.all_groups {
            DesiredGroups::All
        } else {
            DesiredGroups::only(self.discovery.groups.iter().cloned())
        };

        Ok(DiscoverySettings {
            groups,
            multicast_enabled: m.enabled,
            interfaces: m.interfaces.clone(),
            announcement_addr,
            request_addr,
            port: m.port,
            constraints: Constraints {
                protocol_version: self.discovery.protocol_version,
                max_packet_size: m.max_packet_size,
                multicast_ttl: m.ttl,
                unicast_timeout: Duration::from_millis(u.timeout_ms),
            },
            request_max: m.request_max,
            request_interval: Duration::from_millis(m.request_interval_ms),
            final_request_interval: Duration::from_millis(m.final_request_interval_ms),
            initial_request_delay_range: Duration::from_millis(m.initial_request_delay_range_ms),
            announcement_interval: Duration::from_millis(m.announcement_interval_ms),
            announcement_tolerance: m.announcement_tolerance,
            interface_retry_interval: Duration::from_millis(m.interface_retry_interval_ms),
            unicast_delay_range: Duration::from_millis(u.delay_range_ms),
            max_concurrent_tasks: u.max_concurrent_tasks,
            shutdown_grace: Duration::from_millis(u.shutdown_grace_ms),
        })
    }
}

impl TrustConfig {
    /// Parse the blocked registrar list.
    pub fn blocked_ids(&self) -> Result<Vec<ServiceId>, ConfigError> {
        self.blocked_registrars
            .iter()
            .map(|s| {
                ServiceId::from_hex(s)
                    .map_err(|_| invalid("trust.blocked_registrars", format!("bad service id {s:?}")))
            })
            .collect()
    }
}

fn parse_multicast_addr(field: &'static str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    let addr: Ipv4Addr = value
        .parse()
        .map_err(|_| invalid(field, format!("{value:?} is not an IPv4 address")))?;
    if !addr.is_multicast() {
        return Err(invalid(field, format!("{addr} is not a multicast address")));
    }
    Ok(addr)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
