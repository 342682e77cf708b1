use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::model::{ContainerPatch, ContainerSnapshot, NoticeLevel, SystemInfoPayload, View};

/// Messages pushed by the host over the event channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full container list; authoritative like a poll result.
    ContainerUpdate { containers: Vec<ContainerSnapshot> },
    /// Fields for one known container.
    ContainerPatch { container: ContainerPatch },
    LogAppend { container_id: String, lines: Vec<String> },
    SystemUpdate(SystemInfoPayload),
    Notification {
        #[serde(default = "default_level")]
        level: NoticeLevel,
        message: String,
    },
    Error { message: String },
    /// The host is going away on purpose; do not reconnect.
    Shutdown {
        #[serde(default)]
        reason: Option<String>,
    },
}

fn default_level() -> NoticeLevel {
    NoticeLevel::Info
}

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    RequestContainerUpdate,
    RequestSystemUpdate,
    RequestLogs { container_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    Containers,
    System,
    Logs(String),
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ContainerUpdate { .. } => "container_update",
            ServerMessage::ContainerPatch { .. } => "container_patch",
            ServerMessage::LogAppend { .. } => "log_append",
            ServerMessage::SystemUpdate(_) => "system_update",
            ServerMessage::Notification { .. } => "notification",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Shutdown { .. } => "shutdown",
        }
    }
}

impl ClientMessage {
    pub fn encode(&self) -> String {
        // Plain enums of strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Topics a view needs pushed to it.
pub fn topics_for(view: &View) -> Vec<Topic> {
    match view {
        View::Overview => vec![Topic::Containers, Topic::System],
        View::Containers | View::Services => vec![Topic::Containers],
        View::System => vec![Topic::System],
        View::Logs(id) => vec![Topic::Logs(id.clone())],
    }
}

/// What to ask for right after connecting, so the view starts from a full
/// snapshot instead of whatever it had.
pub fn snapshot_requests(view: &View) -> Vec<ClientMessage> {
    match view {
        View::Overview => vec![ClientMessage::RequestContainerUpdate, ClientMessage::RequestSystemUpdate],
        View::Containers | View::Services => vec![ClientMessage::RequestContainerUpdate],
        View::System => vec![ClientMessage::RequestSystemUpdate],
        View::Logs(id) => vec![ClientMessage::RequestLogs { container_id: id.clone() }],
    }
}
