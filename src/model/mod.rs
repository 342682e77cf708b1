// Value types shared by the store, the sync producers and the renderer.

pub use action::{ActionError, ActionId, ActionKind, BulkSummary, PendingAction, PriorState, TargetOutcome};
pub use channel::ChannelStatus;
pub use container::{
    format_uptime, parse_timestamp, ContainerDetail, ContainerHealth, ContainerOverview,
    ContainerPatch, ContainerSnapshot, ContainerStats, OverviewPayload, StatsPatch,
};
pub use health::{ComponentHealth, HostHealth};
pub use logs::{LogBuffer, LogFilter, LogLevel};
pub use notice::{Notice, NoticeKind, NoticeLevel};
pub use service::{resolve_bindings, ManagedService, MatchRule, ServiceBinding, ServicesPayload};
pub use system::{
    MetricDomain, MetricSample, MetricValue, MetricsHistory, NetworkRateTracker, NetworkRates,
    ProcessInfo, RingBuffer, SystemInfoPayload, SystemMetricsSnapshot,
};
pub use view::{Domain, View, ViewState};

mod action;
mod channel;
mod container;
mod health;
mod logs;
mod notice;
mod service;
mod system;
mod view;
