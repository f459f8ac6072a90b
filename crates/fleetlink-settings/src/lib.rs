//! # fleetlink-settings
//!
//! Configuration for the Fleetlink relay, loaded from environment variables
//! over compiled defaults.
//!
//! Every knob has a production default, so an empty environment yields a
//! working local configuration. Unparseable numeric values are logged and
//! replaced by their defaults rather than rejected; the process always
//! starts with corrected behavior. Values with hard floors (stale timeout,
//! prune interval) are clamped the same way.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `REDIS_URL` | `redis://localhost:6379/0` | Log store URL (`memory://` selects the in-process backend) |
//! | `FLEET_COMMAND_STREAM` | `fleet_commands` | Command stream key |
//! | `FLEET_COMMAND_STREAM_START` | `0-0` | Command consumer start cursor |
//! | `FLEET_COMMAND_MAXLEN` | `500` | Approximate command stream cap |
//! | `FLEET_STATUS_STREAM` | `fleet_status` | Status stream key |
//! | `FLEET_STATUS_STREAM_START` | `0-0` | Status consumer start cursor |
//! | `FLEET_STATUS_MAXLEN` | `500` | Approximate status stream cap |
//! | `FLEET_RETENTION_MINUTES` | `30` | Stream retention window |
//! | `FLEET_TRIM_INTERVAL_SECS` | `86400` | Retention trim cadence |
//! | `FLEET_HOST` | `0.0.0.0` | HTTP bind host |
//! | `FLEET_PORT` | `8080` | HTTP bind port |
//! | `FLEET_READ_TIMEOUT_SECS` | `60` | Device read inactivity before a ping |
//! | `FLEET_STALE_TIMEOUT_SECS` | `600` | Registry staleness threshold (min 1) |
//! | `FLEET_PRUNE_INTERVAL_SECS` | `30` | Background prune cadence (min 5) |

#![deny(unsafe_code)]

use std::time::Duration;

use tracing::warn;

/// Root settings for the relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSettings {
    /// Log store connection and stream naming.
    pub store: StoreSettings,
    /// HTTP/WebSocket server knobs.
    pub server: ServerSettings,
    /// Device registry staleness policy.
    pub registry: RegistrySettings,
}

/// Log store connection and stream naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Store URL. `memory://` selects the in-process backend.
    pub url: String,
    /// Command stream key.
    pub command_stream: String,
    /// Command consumer start cursor.
    pub command_stream_start: String,
    /// Approximate command stream cap applied on append.
    pub command_maxlen: usize,
    /// Status stream key.
    pub status_stream: String,
    /// Status consumer start cursor.
    pub status_stream_start: String,
    /// Approximate status stream cap applied on append.
    pub status_maxlen: usize,
    /// Retention window enforced by the periodic trim task.
    pub retention: Duration,
    /// Cadence of the periodic trim task.
    pub trim_interval: Duration,
}

/// HTTP/WebSocket server knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Device read inactivity before an unsolicited ping.
    pub read_timeout: Duration,
}

/// Device registry staleness policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// A link-less record older than this is pruned.
    pub stale_timeout: Duration,
    /// Background prune cadence.
    pub prune_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            command_stream: "fleet_commands".to_string(),
            command_stream_start: "0-0".to_string(),
            command_maxlen: 500,
            status_stream: "fleet_status".to_string(),
            status_stream_start: "0-0".to_string(),
            status_maxlen: 500,
            retention: Duration::from_secs(30 * 60),
            trim_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(600),
            prune_interval: Duration::from_secs(30),
        }
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl FleetSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary lookup (tests inject maps here).
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            store: StoreSettings {
                url: string_var(&lookup, "REDIS_URL", defaults.store.url),
                command_stream: string_var(
                    &lookup,
                    "FLEET_COMMAND_STREAM",
                    defaults.store.command_stream,
                ),
                command_stream_start: string_var(
                    &lookup,
                    "FLEET_COMMAND_STREAM_START",
                    defaults.store.command_stream_start,
                ),
                command_maxlen: numeric_var(
                    &lookup,
                    "FLEET_COMMAND_MAXLEN",
                    defaults.store.command_maxlen,
                ),
                status_stream: string_var(
                    &lookup,
                    "FLEET_STATUS_STREAM",
                    defaults.store.status_stream,
                ),
                status_stream_start: string_var(
                    &lookup,
                    "FLEET_STATUS_STREAM_START",
                    defaults.store.status_stream_start,
                ),
                status_maxlen: numeric_var(
                    &lookup,
                    "FLEET_STATUS_MAXLEN",
                    defaults.store.status_maxlen,
                ),
                retention: Duration::from_secs(
                    numeric_var::<u64>(&lookup, "FLEET_RETENTION_MINUTES", 30) * 60,
                ),
                trim_interval: Duration::from_secs(numeric_var(
                    &lookup,
                    "FLEET_TRIM_INTERVAL_SECS",
                    24 * 3600,
                )),
            },
            server: ServerSettings {
                host: string_var(&lookup, "FLEET_HOST", defaults.server.host),
                port: numeric_var(&lookup, "FLEET_PORT", defaults.server.port),
                read_timeout: Duration::from_secs(numeric_var(
                    &lookup,
                    "FLEET_READ_TIMEOUT_SECS",
                    60,
                )),
            },
            registry: RegistrySettings {
                stale_timeout: Duration::from_secs(
                    numeric_var::<u64>(&lookup, "FLEET_STALE_TIMEOUT_SECS", 600).max(1),
                ),
                prune_interval: Duration::from_secs(
                    numeric_var::<u64>(&lookup, "FLEET_PRUNE_INTERVAL_SECS", 30).max(5),
                ),
            },
        }
    }

    /// `host:port` string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Whether the in-process store backend was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.store.url.starts_with("memory://")
    }
}

fn string_var(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: String) -> String {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value,
        _ => default,
    }
}

fn numeric_var<T: std::str::FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw = %raw, default = %default, "unparseable setting, using default");
                default
            }
        },
    }
}
