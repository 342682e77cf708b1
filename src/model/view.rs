use std::fmt;

use serde::Serialize;

/// Data domains that are fetched and kept fresh independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Domain {
    Containers,
    Services,
    System,
    Logs,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Containers, Domain::Services, Domain::System, Domain::Logs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Containers => "containers",
            Domain::Services => "services",
            Domain::System => "system",
            Domain::Logs => "logs",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// App-level view state
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Overview,
    Containers,
    Services,
    System,
    Logs(String), // container ID
}

impl View {
    /// Domains this view renders.
    pub fn domains(&self) -> &'static [Domain] {
        match self {
            View::Overview => &[Domain::Containers, Domain::System],
            View::Containers => &[Domain::Containers],
            View::Services => &[Domain::Services],
            View::System => &[Domain::System],
            View::Logs(_) => &[Domain::Logs],
        }
    }

    pub fn consumes(&self, domain: Domain) -> bool {
        self.domains().contains(&domain)
    }

    pub fn log_target(&self) -> Option<&str> {
        match self {
            View::Logs(id) => Some(id),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<View> {
        match s {
            "overview" => Some(View::Overview),
            "containers" => Some(View::Containers),
            "services" => Some(View::Services),
            "system" => Some(View::System),
            other => other.strip_prefix("logs:").map(|id| View::Logs(id.to_string())),
        }
    }
}

/// What the consumer is currently looking at; gates polling and subscriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewState {
    pub view: View,
    pub visible: bool,
    pub live_follow: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            view: View::default(),
            visible: true,
            live_follow: false,
        }
    }
}

impl ViewState {
    /// Whether `domain` should be refreshed at all right now.
    pub fn wants(&self, domain: Domain) -> bool {
        self.visible && self.view.consumes(domain)
    }

    /// Whether `domain` should be refreshed on its periodic schedule.
    /// Logs are on-demand unless live follow is on.
    pub fn wants_periodic(&self, domain: Domain) -> bool {
        self.wants(domain) && (domain != Domain::Logs || self.live_follow)
    }
}
