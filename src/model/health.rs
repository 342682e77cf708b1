use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of the host control service's `/health` check.
///
/// Hosts differ in detail: some report a bare `{status, services}` object
/// where each component carries `healthy: bool`, others wrap a richer body
/// in an envelope and give each component a `status` string instead.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostHealth {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub services: BTreeMap<String, ComponentHealth>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        match (self.healthy, self.status.as_deref()) {
            (Some(healthy), _) => healthy,
            (None, Some(status)) => status.eq_ignore_ascii_case("healthy"),
            (None, None) => false,
        }
    }
}

impl HostHealth {
    /// Overall verdict: the host says healthy and so does every component.
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") && self.services.values().all(ComponentHealth::is_healthy)
    }

    pub fn unhealthy_components(&self) -> impl Iterator<Item = (&str, &ComponentHealth)> {
        self.services
            .iter()
            .filter(|(_, c)| !c.is_healthy())
            .map(|(name, c)| (name.as_str(), c))
    }
}
