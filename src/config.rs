//! Configuration: TOML file with defaults for every field.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::ManagedService;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: HostConfig,
    pub polling: PollingConfig,
    pub channel: ChannelConfig,
    pub actions: ActionConfig,
    pub logs: LogConfig,
    pub metrics: MetricsConfig,
    /// Managed services keyed by service key. Empty means "ask the host".
    pub services: BTreeMap<String, ManagedService>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            polling: PollingConfig::default(),
            channel: ChannelConfig::default(),
            actions: ActionConfig::default(),
            logs: LogConfig::default(),
            metrics: MetricsConfig::default(),
            services: default_services(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".to_string(),
            ws_url: "ws://127.0.0.1:5000/ws".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub containers_secs: u64,
    pub services_secs: u64,
    pub system_secs: u64,
    pub logs_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            containers_secs: 30,
            services_secs: 30,
            system_secs: 5,
            logs_secs: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Local deadline for one command; the request may still be in flight.
    pub timeout_secs: u64,
    /// How long a pending action may go unconfirmed before it counts as stuck.
    pub grace_secs: u64,
    /// Delay before the forced refresh that follows an accepted command.
    pub settle_delay_ms: u64,
    /// Graceful stop timeout passed to the host for stop/restart.
    pub stop_timeout_secs: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            grace_secs: 10,
            settle_delay_ms: 2500,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub max_lines: usize,
    pub tail_lines: usize,
    pub live_follow: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_lines: 1000,
            tail_lines: 100,
            live_follow: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub history: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { history: 20 }
    }
}

impl Config {
    /// Load from `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.host.base_url.starts_with("http://") || self.host.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "host.base_url",
                reason: format!("expected http(s) URL, got {:?}", self.host.base_url),
            });
        }
        if !(self.host.ws_url.starts_with("ws://") || self.host.ws_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "host.ws_url",
                reason: format!("expected ws(s) URL, got {:?}", self.host.ws_url),
            });
        }
        let intervals = [
            ("polling.containers_secs", self.polling.containers_secs),
            ("polling.services_secs", self.polling.services_secs),
            ("polling.system_secs", self.polling.system_secs),
            ("polling.logs_secs", self.polling.logs_secs),
            ("actions.timeout_secs", self.actions.timeout_secs),
            ("host.request_timeout_secs", self.host.request_timeout_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.logs.max_lines == 0 {
            return Err(ConfigError::Invalid {
                field: "logs.max_lines",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.metrics.history == 0 {
            return Err(ConfigError::Invalid {
                field: "metrics.history",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.channel.initial_backoff_ms == 0 || self.channel.max_backoff_ms < self.channel.initial_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "channel.max_backoff_ms",
                reason: "backoff must be positive and max >= initial".to_string(),
            });
        }
        Ok(())
    }

    /// Service catalog with keys filled in from the table names.
    pub fn service_catalog(&self) -> Vec<ManagedService> {
        self.services
            .iter()
            .map(|(key, svc)| {
                let mut svc = svc.clone();
                svc.key = key.clone();
                svc
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.host.request_timeout_secs)
    }
}

impl PollingConfig {
    pub fn interval_for(&self, domain: crate::model::Domain) -> Duration {
        use crate::model::Domain;
        let secs = match domain {
            Domain::Containers => self.containers_secs,
            Domain::Services => self.services_secs,
            Domain::System => self.system_secs,
            Domain::Logs => self.logs_secs,
        };
        Duration::from_secs(secs)
    }
}

fn service(
    name: &str,
    port: u16,
    category: &str,
    description: &str,
    vpn_required: bool,
    container_name: &str,
) -> ManagedService {
    ManagedService {
        key: String::new(),
        name: name.to_string(),
        category: category.to_string(),
        port: Some(port),
        vpn_required,
        container_name: Some(container_name.to_string()),
        description: Some(description.to_string()),
    }
}

fn default_services() -> BTreeMap<String, ManagedService> {
    let entries = [
        ("sabnzbd", service("SABnzbd", 101, "media", "Usenet downloader", true, "sabnzbd")),
        ("qbittorrent", service("qBittorrent", 102, "media", "Torrent client", true, "qbittorrent")),
        ("sonarr", service("Sonarr", 103, "media", "TV series management", true, "sonarr")),
        ("radarr", service("Radarr", 105, "media", "Movie management", true, "radarr")),
        ("jackett", service("Jackett", 106, "media", "Indexer proxy", true, "jackett")),
        ("plex", service("Plex", 32400, "core", "Media server", false, "plex")),
        ("homarr", service("Homarr", 107, "core", "Backup dashboard", false, "homarr")),
        ("glances", service("Glances", 108, "monitoring", "System monitoring", false, "glances")),
        ("uptime-kuma", service("Uptime Kuma", 109, "monitoring", "Service monitoring", false, "uptime-kuma")),
        ("smokeping", service("Smokeping", 110, "monitoring", "Network monitoring", false, "smokeping")),
        ("icarus", service("Icarus", 2777, "gaming", "Dedicated game server", false, "icarus-server")),
    ];
    entries
        .into_iter()
        .map(|(key, svc)| (key.to_string(), svc))
        .collect()
}
