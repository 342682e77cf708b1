use tokio::time::Instant;

use crate::model::{
    ActionId, ChannelStatus, ContainerPatch, ContainerSnapshot, Domain, ManagedService,
    MetricDomain, MetricSample, Notice, PendingAction, SystemMetricsSnapshot,
};

/// Every way the store can be changed. All producers go through this.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// Authoritative full list. Overwrites optimistic state and settles
    /// pending actions.
    ReplaceContainers {
        containers: Vec<ContainerSnapshot>,
        now: Instant,
    },
    /// Narrow update for a known container id.
    MergeContainer(ContainerPatch),
    AppendMetricSample {
        domain: MetricDomain,
        sample: MetricSample,
    },
    /// New system snapshot; also appends one sample per metric domain.
    SetSystem(SystemMetricsSnapshot),
    SetServices(Vec<ManagedService>),
    AppendLogs {
        container_id: String,
        lines: Vec<String>,
    },
    ClearLogs {
        container_id: String,
    },
    /// Record a pending action and flip the target optimistically.
    BeginAction(PendingAction),
    /// The host accepted the command for `target`.
    AcceptAction {
        target: String,
        id: ActionId,
    },
    /// The command failed or timed out; roll back and flag the target.
    FailAction {
        target: String,
        id: ActionId,
        reason: String,
    },
    /// Surface accepted actions that never got confirmed.
    ExpirePending {
        now: Instant,
    },
    MarkStale {
        domain: Domain,
        reason: String,
    },
    MarkFresh {
        domain: Domain,
    },
    PushNotice(Notice),
    SetChannel(ChannelStatus),
    DismissError {
        target: String,
    },
}

/// What a mutation changed; handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Containers,
    ContainerPatched { id: String },
    Metrics(MetricDomain),
    System,
    Services,
    Logs { container_id: String },
    Pending { target: String },
    /// Accepted actions that went unconfirmed past the grace window.
    Expired { targets: Vec<String> },
    Stale(Domain),
    Notice,
    Channel,
    Errors { target: String },
}

/// Mutations requested from inside a subscriber. Applied after the current
/// notification round finishes.
#[derive(Debug, Default)]
pub struct Deferred {
    queue: Vec<Mutation>,
}

impl Deferred {
    pub fn push(&mut self, mutation: Mutation) {
        self.queue.push(mutation);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<Mutation> {
        self.queue
    }
}
