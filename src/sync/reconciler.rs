//! Merge arbitration between the poller, the push channel and the dispatcher.
//!
//! Producers never touch the store directly. They hand an [`Update`] to the
//! reconciler, which turns it into store mutations: full lists replace,
//! patches merge, logs append, failures mark the domain stale.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::{
    ActionId, ChannelStatus, ContainerSnapshot, Domain, ManagedService, NetworkRateTracker, Notice,
    NoticeKind, NoticeLevel, PendingAction, SystemInfoPayload,
};
use crate::store::{Change, Mutation, SnapshotStore, StorePolicy};

use super::protocol::ServerMessage;

/// Result of one successful poll cycle.
#[derive(Debug, Clone)]
pub enum Polled {
    Containers(Vec<ContainerSnapshot>),
    /// Containers for binding, plus the catalog when it had to be fetched.
    Services {
        containers: Vec<ContainerSnapshot>,
        catalog: Option<Vec<ManagedService>>,
    },
    System(SystemInfoPayload),
    Logs { container_id: String, lines: Vec<String> },
}

/// Everything a producer can report.
#[derive(Debug, Clone)]
pub enum Update {
    Polled(Domain, Polled),
    PollFailed { domain: Domain, error: String },
    Push(ServerMessage),
    Channel(ChannelStatus),
    ActionAccepted { target: String, id: ActionId },
    ActionFailed { target: String, id: ActionId, reason: String },
}

pub struct Reconciler {
    store: SnapshotStore,
    rates: NetworkRateTracker,
}

impl Reconciler {
    pub fn new(policy: StorePolicy) -> Self {
        Self::with_store(SnapshotStore::new(policy))
    }

    pub fn with_store(store: SnapshotStore) -> Self {
        Self {
            store,
            rates: NetworkRateTracker::new(),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SnapshotStore {
        &mut self.store
    }

    pub fn apply(&mut self, update: Update) -> Vec<Change> {
        let mutations = match update {
            Update::Polled(domain, polled) => self.polled(domain, polled),
            Update::PollFailed { domain, error } => self.poll_failed(domain, error),
            Update::Push(message) => self.pushed(message),
            Update::Channel(status) => self.channel(status),
            Update::ActionAccepted { target, id } => vec![Mutation::AcceptAction { target, id }],
            Update::ActionFailed { target, id, reason } => {
                warn!(%target, %reason, "action failed");
                vec![Mutation::FailAction { target, id, reason }]
            }
        };
        mutations
            .into_iter()
            .flat_map(|m| self.store.apply(m))
            .collect()
    }

    /// Record pending actions before their commands go out.
    pub fn begin(&mut self, actions: Vec<PendingAction>) -> Vec<Change> {
        actions
            .into_iter()
            .flat_map(|a| self.store.apply(Mutation::BeginAction(a)))
            .collect()
    }

    /// Housekeeping: surface accepted actions that never got confirmed.
    pub fn expire(&mut self, now: Instant) -> Vec<Change> {
        self.store.apply(Mutation::ExpirePending { now })
    }

    pub fn dismiss(&mut self, target: &str) -> Vec<Change> {
        self.store.apply(Mutation::DismissError { target: target.to_string() })
    }

    fn polled(&mut self, domain: Domain, polled: Polled) -> Vec<Mutation> {
        let mut out = Vec::new();
        match polled {
            Polled::Containers(containers) => {
                debug!(count = containers.len(), "container list polled");
                out.push(replace(containers));
            }
            Polled::Services { containers, catalog } => {
                if let Some(services) = catalog {
                    out.push(Mutation::SetServices(services));
                }
                out.push(replace(containers));
                out.push(Mutation::MarkFresh { domain: Domain::Containers });
            }
            Polled::System(payload) => {
                out.push(Mutation::SetSystem(self.rates.snapshot(payload, Instant::now())));
            }
            Polled::Logs { container_id, lines } => {
                out.push(Mutation::AppendLogs { container_id, lines });
            }
        }
        out.push(Mutation::MarkFresh { domain });
        out
    }

    fn poll_failed(&mut self, domain: Domain, error: String) -> Vec<Mutation> {
        warn!(%domain, %error, "fetch failed; keeping last snapshot");
        let mut out = Vec::new();
        // One notice per outage, not one per tick.
        if self.store.state().stale(domain).is_none() {
            out.push(Mutation::PushNotice(Notice::new(
                NoticeLevel::Warning,
                NoticeKind::FetchFailed(domain),
                format!("{} refresh failed: {}", domain, error),
            )));
        }
        out.push(Mutation::MarkStale { domain, reason: error });
        out
    }

    fn pushed(&mut self, message: ServerMessage) -> Vec<Mutation> {
        debug!(kind = message.kind(), "push message");
        match message {
            ServerMessage::ContainerUpdate { containers } => {
                vec![replace(containers), Mutation::MarkFresh { domain: Domain::Containers }]
            }
            ServerMessage::ContainerPatch { container } => vec![Mutation::MergeContainer(container)],
            ServerMessage::LogAppend { container_id, lines } => {
                vec![Mutation::AppendLogs { container_id, lines }]
            }
            ServerMessage::SystemUpdate(payload) => vec![
                Mutation::SetSystem(self.rates.snapshot(payload, Instant::now())),
                Mutation::MarkFresh { domain: Domain::System },
            ],
            ServerMessage::Notification { level, message } => vec![Mutation::PushNotice(Notice::new(
                level,
                NoticeKind::Server,
                message,
            ))],
            ServerMessage::Error { message } => {
                warn!(%message, "host reported an error");
                vec![Mutation::PushNotice(Notice::new(NoticeLevel::Error, NoticeKind::Server, message))]
            }
            ServerMessage::Shutdown { reason } => {
                // The channel follows up with `Closed`, which carries the notice.
                info!(reason = reason.as_deref().unwrap_or("none given"), "host announced shutdown");
                Vec::new()
            }
        }
    }

    fn channel(&mut self, status: ChannelStatus) -> Vec<Mutation> {
        let mut out = Vec::new();
        match &status {
            ChannelStatus::Failed => warn!("event channel gave up; continuing on polling only"),
            ChannelStatus::Closed { reason } => {
                info!(%reason, "event channel closed by host");
                out.push(Mutation::PushNotice(Notice::new(
                    NoticeLevel::Warning,
                    NoticeKind::ServerShutdown,
                    format!("live updates ended: {}", reason),
                )));
            }
            other => debug!(status = %other, "event channel"),
        }
        out.push(Mutation::SetChannel(status));
        out
    }
}

fn replace(containers: Vec<ContainerSnapshot>) -> Mutation {
    Mutation::ReplaceContainers {
        containers,
        now: Instant::now(),
    }
}
