use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::view::Domain;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum NoticeKind {
    FetchFailed(Domain),
    CommandFailed { target: String },
    NoConfirmation { target: String },
    ServerShutdown,
    Server,
    Action,
}

/// A user-facing, non-blocking message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub kind: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            level,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
