//! Single source of truth for everything the dashboard shows.
//!
//! All producers (poller, push channel, dispatcher) reach the store through
//! [`Mutation`]s applied by one owner. After each mutation every subscriber
//! is called once, synchronously, in registration order. A subscriber that
//! panics is logged and skipped; the rest still run. Mutations a subscriber
//! wants to make are queued in [`Deferred`] and applied after the current
//! round, so no subscriber ever observes a half-applied change.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::time::Instant;
use tracing::{error, warn};

use crate::model::{ContainerPatch, ContainerSnapshot, MetricDomain, MetricSample};

pub use mutation::{Change, Deferred, Mutation};
pub use state::{StaleMark, StorePolicy, StoreState};

mod mutation;
mod state;

/// Rounds of subscriber-requested mutations applied per top-level mutation.
const MAX_DEFERRED_ROUNDS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Subscriber = Box<dyn FnMut(&Change, &StoreState, &mut Deferred) + Send>;

pub struct SnapshotStore {
    state: StoreState,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

impl SnapshotStore {
    pub fn new(policy: StorePolicy) -> Self {
        Self {
            state: StoreState::new(policy),
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&Change, &StoreState, &mut Deferred) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(f)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Apply `mutation`, notify, then drain whatever subscribers deferred.
    /// Returns every change that was applied, in order.
    pub fn apply(&mut self, mutation: Mutation) -> Vec<Change> {
        let mut applied = Vec::new();
        let mut queue = vec![mutation];

        for round in 0..=MAX_DEFERRED_ROUNDS {
            if queue.is_empty() {
                break;
            }
            if round == MAX_DEFERRED_ROUNDS {
                warn!(dropped = queue.len(), "deferred mutation chain too long; dropping the rest");
                break;
            }
            let mut next = Vec::new();
            for mutation in queue {
                let Some(change) = self.state.apply(mutation) else {
                    continue;
                };
                let mut deferred = Deferred::default();
                self.notify(&change, &mut deferred);
                next.extend(deferred.into_inner());
                applied.push(change);
            }
            queue = next;
        }
        applied
    }

    fn notify(&mut self, change: &Change, deferred: &mut Deferred) {
        let state = &self.state;
        for (id, subscriber) in self.subscribers.iter_mut() {
            let result = catch_unwind(AssertUnwindSafe(|| subscriber(change, state, deferred)));
            if result.is_err() {
                error!(subscriber = id.0, ?change, "subscriber panicked");
            }
        }
    }

    // --- Convenience wrappers ---

    pub fn replace_containers(&mut self, containers: Vec<ContainerSnapshot>) -> Vec<Change> {
        self.apply(Mutation::ReplaceContainers {
            containers,
            now: Instant::now(),
        })
    }

    pub fn merge_container(&mut self, patch: ContainerPatch) -> Vec<Change> {
        self.apply(Mutation::MergeContainer(patch))
    }

    pub fn append_metric_sample(&mut self, domain: MetricDomain, sample: MetricSample) -> Vec<Change> {
        self.apply(Mutation::AppendMetricSample { domain, sample })
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(StorePolicy::default())
    }
}
