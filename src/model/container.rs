use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One container as reported by the host control service.
///
/// Value object: a refresh replaces it wholesale. Only push patches touch
/// individual fields, and only for ids the store already knows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,       // "running", "stopped", "stopping", ...
    #[serde(default)]
    pub is_running: bool,
    #[serde(default = "default_healthy")]
    pub is_healthy: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uptime: Option<String>, // human-readable (e.g. "2h 34m")
    #[serde(default)]
    pub ports: Vec<String>,     // e.g. "0.0.0.0:8080->80/tcp"
    #[serde(default)]
    pub stats: Option<ContainerStats>,
}

fn default_healthy() -> bool {
    true
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps; anything else becomes `None`
/// rather than failing the whole container list.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub memory_usage: u64,
    #[serde(default)]
    pub memory_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,
    #[serde(default)]
    pub network_rx: u64,
    #[serde(default)]
    pub network_tx: u64,
}

impl ContainerStats {
    /// Memory usage in bytes. Some hosts only report megabytes.
    pub fn memory_usage_bytes(&self) -> u64 {
        if self.memory_usage > 0 {
            return self.memory_usage;
        }
        self.memory_usage_mb
            .map(|mb| (mb * 1024.0 * 1024.0) as u64)
            .unwrap_or(0)
    }
}

// --- Partial updates ---

/// A narrow update for a single container, as carried by push events.
/// Every `None` field is left untouched when applied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerPatch {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_running: Option<bool>,
    #[serde(default)]
    pub is_healthy: Option<bool>,
    #[serde(default)]
    pub uptime: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    #[serde(default)]
    pub stats: Option<StatsPatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsPatch {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub memory_usage: Option<u64>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub network_rx: Option<u64>,
    #[serde(default)]
    pub network_tx: Option<u64>,
}

impl ContainerPatch {
    /// Write the named fields into `target`. Returns true if anything changed.
    pub fn apply_to(&self, target: &mut ContainerSnapshot) -> bool {
        let before = target.clone();

        if let Some(ref name) = self.name {
            target.name = name.clone();
        }
        if let Some(ref image) = self.image {
            target.image = image.clone();
        }
        if let Some(ref status) = self.status {
            target.status = status.clone();
        }
        if let Some(running) = self.is_running {
            target.is_running = running;
        }
        if let Some(healthy) = self.is_healthy {
            target.is_healthy = healthy;
        }
        if let Some(ref uptime) = self.uptime {
            target.uptime = Some(uptime.clone());
        }
        if let Some(ref ports) = self.ports {
            target.ports = ports.clone();
        }
        if let Some(ref sp) = self.stats {
            let stats = target.stats.get_or_insert_with(ContainerStats::default);
            if let Some(v) = sp.cpu_percent {
                stats.cpu_percent = v;
            }
            if let Some(v) = sp.memory_percent {
                stats.memory_percent = v;
            }
            if let Some(v) = sp.memory_usage {
                stats.memory_usage = v;
            }
            if let Some(v) = sp.memory_limit {
                stats.memory_limit = v;
            }
            if let Some(v) = sp.network_rx {
                stats.network_rx = v;
            }
            if let Some(v) = sp.network_tx {
                stats.network_tx = v;
            }
        }

        *target != before
    }
}

// --- Aggregates ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOverview {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
}

impl ContainerOverview {
    pub fn from_containers(containers: &[ContainerSnapshot]) -> Self {
        let total = containers.len();
        let running = containers.iter().filter(|c| c.is_running).count();
        Self {
            total,
            running,
            stopped: total - running,
        }
    }
}

/// Body of `GET /containers/overview`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OverviewPayload {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub running: usize,
    #[serde(default)]
    pub stopped: usize,
    #[serde(default)]
    pub containers: Vec<ContainerSnapshot>,
}

/// Body of `GET /containers/{id}`: the list entry plus inspect-only fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerDetail {
    #[serde(flatten)]
    pub summary: ContainerSnapshot,
    #[serde(default)]
    pub health_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_policy: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub primary_port: Option<u16>,
    #[serde(default)]
    pub size: Option<String>,
}

/// Body of `GET /containers/{id}/health`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerHealth {
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Docker healthcheck state; absent when the image defines none.
    #[serde(default)]
    pub health_status: Option<String>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default = "default_healthy")]
    pub is_healthy: bool,
    #[serde(default)]
    pub uptime: Option<String>,
}

/// Format a number of seconds the way the dashboard shows uptimes.
pub fn format_uptime(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        format!("{}h {}m", h, m)
    } else {
        let d = secs / 86400;
        let h = (secs % 86400) / 3600;
        format!("{}d {}h", d, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, running: bool) -> ContainerSnapshot {
        ContainerSnapshot {
            id: id.into(),
            name: format!("name-{}", id),
            image: "alpine:3".into(),
            status: if running { "running".into() } else { "stopped".into() },
            is_running: running,
            is_healthy: true,
            created: None,
            uptime: Some("5m".into()),
            ports: vec!["0.0.0.0:8080->80/tcp".into()],
            stats: Some(ContainerStats {
                cpu_percent: 1.5,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut c = container("a", true);
        let patch = ContainerPatch {
            id: "a".into(),
            is_running: Some(false),
            ..Default::default()
        };
        assert!(patch.apply_to(&mut c));
        assert!(!c.is_running);
        assert_eq!(c.image, "alpine:3");
        assert_eq!(c.uptime.as_deref(), Some("5m"));
        assert_eq!(c.ports.len(), 1);
        assert_eq!(c.stats.as_ref().map(|s| s.cpu_percent), Some(1.5));
    }

    #[test]
    fn stats_patch_merges_into_existing_stats() {
        let mut c = container("a", true);
        let patch = ContainerPatch {
            id: "a".into(),
            stats: Some(StatsPatch {
                memory_percent: Some(42.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply_to(&mut c);
        let stats = c.stats.unwrap();
        assert_eq!(stats.cpu_percent, 1.5);
        assert_eq!(stats.memory_percent, 42.0);
    }

    #[test]
    fn patch_without_changes_reports_false() {
        let mut c = container("a", true);
        let patch = ContainerPatch {
            id: "a".into(),
            is_running: Some(true),
            ..Default::default()
        };
        assert!(!patch.apply_to(&mut c));
    }

    #[test]
    fn overview_counts_running_and_stopped() {
        let list = vec![container("a", true), container("b", false), container("c", true)];
        let overview = ContainerOverview::from_containers(&list);
        assert_eq!(overview, ContainerOverview { total: 3, running: 2, stopped: 1 });
    }

    #[test]
    fn host_record_decodes_with_missing_and_odd_fields() {
        let raw = serde_json::json!({
            "id": "abc123",
            "name": "plex",
            "status": "running",
            "is_running": true,
            "created": "2024-03-01T10:00:00.123456",
            "stats": {"cpu_percent": 3.0, "memory_usage_mb": 2.0, "memory_percent": 1.0}
        });
        let c: ContainerSnapshot = serde_json::from_value(raw).unwrap();
        assert!(c.is_healthy);
        assert!(c.created.is_some());
        assert_eq!(c.stats.unwrap().memory_usage_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn unparseable_timestamp_becomes_none() {
        let raw = serde_json::json!({"id": "x", "name": "x", "created": "yesterday"});
        let c: ContainerSnapshot = serde_json::from_value(raw).unwrap();
        assert!(c.created.is_none());
    }

    #[test]
    fn format_uptime_buckets() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(150), "2m");
        assert_eq!(format_uptime(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_uptime(2 * 86400 + 5 * 3600), "2d 5h");
    }
}
