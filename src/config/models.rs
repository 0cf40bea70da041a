//! Configuration data structures for the gateway.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! serde‑friendly and include defaults so that a minimal API definition only needs a
//! listen path and its upstream targets.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

fn default_balancing() -> String {
    "roundrobin".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Durations are written in humantime notation, e.g. `"90s"` or `"1m 30s"`.
pub(crate) mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// One upstream target a definition balances across
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Target {
    /// Base URL of the upstream, e.g. `http://users:8080`
    pub target: String,
    /// Relative weight, only consulted by the `weight` balancer
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Target {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            weight: default_weight(),
        }
    }

    pub fn weighted(target: impl Into<String>, weight: u32) -> Self {
        Self {
            target: target.into(),
            weight,
        }
    }
}

/// Upstream pool of a definition and the strategy used to pick from it
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Upstreams {
    #[serde(default = "default_balancing")]
    pub balancing: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            balancing: default_balancing(),
            targets: Vec::new(),
        }
    }
}

/// Header mutations applied by a route
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct HeaderActions {
    /// Headers set, replacing any existing value
    #[serde(default)]
    pub add: HashMap<String, String>,
    /// Headers removed
    #[serde(default)]
    pub remove: Vec<String>,
}

impl HeaderActions {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Declarative description of one proxied route
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Definition {
    #[serde(default)]
    pub name: String,
    /// Inactive definitions are kept in configuration but never registered
    #[serde(default = "default_true")]
    pub active: bool,
    /// Path the route is reachable under. A trailing `/*` makes it a wildcard.
    pub listen_path: String,
    /// Method tokens, case-insensitive. `ALL` registers every method.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub upstreams: Upstreams,
    /// Remove the listen path prefix before forwarding
    #[serde(default)]
    pub strip_path: bool,
    /// Join the target's own path in front of the forwarded path
    #[serde(default)]
    pub append_path: bool,
    /// Forward the client's `Host` header instead of the target authority
    #[serde(default)]
    pub preserve_host: bool,
    /// Skip TLS certificate verification towards the upstreams
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Applied to the request before it is forwarded
    #[serde(default)]
    pub request_headers: HeaderActions,
    /// Applied to the upstream response
    #[serde(default)]
    pub response_headers: HeaderActions,
}

impl Definition {
    /// Create a definition for `listen_path` with the default method set and balancer.
    pub fn new(listen_path: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            active: true,
            listen_path: listen_path.into(),
            methods: default_methods(),
            upstreams: Upstreams::default(),
            strip_path: false,
            append_path: false,
            preserve_host: false,
            insecure_skip_verify: false,
            request_headers: HeaderActions::default(),
            response_headers: HeaderActions::default(),
        }
    }
}

/// Process-wide tuning of the outbound transports built for every definition
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound of idle pooled connections kept per upstream host
    pub idle_connections_per_host: usize,
    /// Idle timeout of each pooled connection: a connection unused for this
    /// long is dropped from the pool. There is no periodic sweep closing all
    /// idle connections at once. `0s` keeps the pool default.
    #[serde(with = "humantime_duration")]
    pub close_idle_conns_period: Duration,
    /// Interval for flushing streamed response bodies, `0s` flushes every frame
    #[serde(with = "humantime_duration")]
    pub flush_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_connections_per_host: 64,
            close_idle_conns_period: Duration::from_secs(90),
            flush_interval: Duration::ZERO,
        }
    }
}

/// Top-level gateway configuration file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub apis: Vec<Definition>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            transport: TransportConfig::default(),
            apis: Vec::new(),
        }
    }
}
