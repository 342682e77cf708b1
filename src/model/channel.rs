use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle of the push channel as seen by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Default)]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up reconnecting; the dashboard runs on polling alone.
    Failed,
    /// The server closed the channel on purpose. No reconnect.
    Closed { reason: String },
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelStatus::Connected)
    }

    /// No further automatic connection attempts will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelStatus::Failed | ChannelStatus::Closed { .. })
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Disconnected => f.write_str("disconnected"),
            ChannelStatus::Connecting => f.write_str("connecting"),
            ChannelStatus::Connected => f.write_str("live"),
            ChannelStatus::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting #{} in {}s", attempt, delay.as_secs())
            }
            ChannelStatus::Failed => f.write_str("poll-only"),
            ChannelStatus::Closed { reason } => write!(f, "closed ({})", reason),
        }
    }
}
