use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::container::ContainerSnapshot;

/// A statically configured logical service (e.g. "Plex") mapped to a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagedService {
    #[serde(default, alias = "id")]
    pub key: String,
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub vpn_required: bool,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_category() -> String {
    "other".to_string()
}

/// `GET /services` comes either as a flat list or grouped by category.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ServicesPayload {
    Flat(Vec<ManagedService>),
    Grouped(BTreeMap<String, Vec<ManagedService>>),
}

impl ServicesPayload {
    pub fn into_services(self) -> Vec<ManagedService> {
        match self {
            ServicesPayload::Flat(list) => list,
            ServicesPayload::Grouped(groups) => groups
                .into_iter()
                .flat_map(|(category, services)| {
                    services.into_iter().map(move |mut svc| {
                        svc.category = category.clone();
                        svc
                    })
                })
                .collect(),
        }
    }
}

/// Which rule tied a service to its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MatchRule {
    ExactName,
    DeclaredContainerName,
    Substring,
}

/// Derived, transient mapping of a service to at most one container.
/// Recomputed from scratch on every store update, never patched.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceBinding {
    pub service_key: String,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub is_running: bool,
    pub is_healthy: bool,
    pub matched_by: Option<MatchRule>,
}

impl ServiceBinding {
    pub fn is_bound(&self) -> bool {
        self.container_id.is_some()
    }
}

/// Bind each service to a container.
///
/// Precedence: container name equal to the service key, then the service's
/// declared `container_name`, then a container name containing the key.
/// Within a rule the first container in list order wins.
pub fn resolve_bindings(
    services: &[ManagedService],
    containers: &[ContainerSnapshot],
) -> Vec<ServiceBinding> {
    services
        .iter()
        .map(|svc| {
            let found = find_container(svc, containers);
            match found {
                Some((container, rule)) => ServiceBinding {
                    service_key: svc.key.clone(),
                    container_id: Some(container.id.clone()),
                    container_name: Some(container.name.clone()),
                    is_running: container.is_running,
                    is_healthy: container.is_healthy,
                    matched_by: Some(rule),
                },
                None => ServiceBinding {
                    service_key: svc.key.clone(),
                    container_id: None,
                    container_name: None,
                    is_running: false,
                    is_healthy: false,
                    matched_by: None,
                },
            }
        })
        .collect()
}

fn find_container<'a>(
    svc: &ManagedService,
    containers: &'a [ContainerSnapshot],
) -> Option<(&'a ContainerSnapshot, MatchRule)> {
    if let Some(c) = containers.iter().find(|c| c.name == svc.key) {
        return Some((c, MatchRule::ExactName));
    }
    if let Some(ref declared) = svc.container_name {
        if let Some(c) = containers.iter().find(|c| &c.name == declared) {
            return Some((c, MatchRule::DeclaredContainerName));
        }
    }
    if svc.key.is_empty() {
        return None;
    }
    let key = svc.key.to_lowercase();
    containers
        .iter()
        .find(|c| c.name.to_lowercase().contains(&key))
        .map(|c| (c, MatchRule::Substring))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(key: &str, container_name: Option<&str>) -> ManagedService {
        ManagedService {
            key: key.into(),
            name: key.to_uppercase(),
            category: "media".into(),
            port: Some(8989),
            vpn_required: false,
            container_name: container_name.map(Into::into),
            description: None,
        }
    }

    fn container(id: &str, name: &str) -> ContainerSnapshot {
        ContainerSnapshot {
            id: id.into(),
            name: name.into(),
            image: String::new(),
            status: "running".into(),
            is_running: true,
            is_healthy: true,
            created: None,
            uptime: None,
            ports: vec![],
            stats: None,
        }
    }

    #[test]
    fn declared_container_name_binds() {
        let services = vec![svc("tv", Some("sonarr"))];
        let containers = vec![container("1", "plex"), container("2", "sonarr")];
        let bindings = resolve_bindings(&services, &containers);
        assert_eq!(bindings[0].container_id.as_deref(), Some("2"));
        assert_eq!(bindings[0].matched_by, Some(MatchRule::DeclaredContainerName));
    }

    #[test]
    fn first_match_in_list_order_wins() {
        let services = vec![svc("sonarr", Some("sonarr"))];
        let containers = vec![container("1", "sonarr"), container("2", "sonarr-backup")];
        let bindings = resolve_bindings(&services, &containers);
        assert_eq!(bindings[0].container_id.as_deref(), Some("1"));
        assert_eq!(bindings[0].matched_by, Some(MatchRule::ExactName));
    }

    #[test]
    fn exact_name_beats_earlier_substring_match() {
        let services = vec![svc("sonarr", None)];
        let containers = vec![container("1", "sonarr-backup"), container("2", "sonarr")];
        let bindings = resolve_bindings(&services, &containers);
        assert_eq!(bindings[0].container_id.as_deref(), Some("2"));
    }

    #[test]
    fn substring_fallback_is_case_insensitive() {
        let services = vec![svc("icarus", Some("missing"))];
        let containers = vec![container("9", "Icarus-Server")];
        let bindings = resolve_bindings(&services, &containers);
        assert_eq!(bindings[0].matched_by, Some(MatchRule::Substring));
    }

    #[test]
    fn unmatched_service_is_unbound() {
        let services = vec![svc("radarr", None)];
        let bindings = resolve_bindings(&services, &[container("1", "plex")]);
        assert!(!bindings[0].is_bound());
        assert!(!bindings[0].is_running);
    }

    #[test]
    fn grouped_payload_flattens_with_category() {
        let raw = serde_json::json!({
            "media": [{"id": "sonarr", "name": "Sonarr", "port": 103, "vpn_required": true}],
            "core": [{"id": "plex", "name": "Plex", "port": 32400}]
        });
        let payload: ServicesPayload = serde_json::from_value(raw).unwrap();
        let services = payload.into_services();
        assert_eq!(services.len(), 2);
        let sonarr = services.iter().find(|s| s.key == "sonarr").unwrap();
        assert_eq!(sonarr.category, "media");
        assert!(sonarr.vpn_required);
    }
}
