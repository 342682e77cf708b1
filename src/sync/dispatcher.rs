//! User-triggered start/stop/restart, single or bulk.
//!
//! Dispatch happens in two steps. [`Dispatcher::prepare`] runs on the engine:
//! it rejects busy targets and records a pending action (with its optimistic
//! flip) for every other one. [`Dispatcher::execute`] then sends the commands
//! concurrently off the engine and reports each result back as an
//! [`Update`]. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ActionConfig;
use crate::error::DispatchError;
use crate::host::HostApi;
use crate::model::{ActionId, ActionKind, BulkSummary, Domain, PendingAction, TargetOutcome};

use super::reconciler::{Reconciler, Update};

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// Local deadline per command.
    pub timeout: Duration,
    /// Graceful stop timeout passed to the host for stop and restart.
    pub stop_timeout: Option<Duration>,
    /// Delay before the forced refresh after an accepted command.
    pub settle_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&ActionConfig::default())
    }
}

impl From<&ActionConfig> for DispatchSettings {
    fn from(config: &ActionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            stop_timeout: Some(Duration::from_secs(config.stop_timeout_secs)),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }
}

/// One command about to be sent. `target` is what the caller wrote, `key`
/// the container id the store tracks it under.
#[derive(Debug)]
struct Issued {
    target: String,
    key: String,
    id: ActionId,
}

/// Targets that passed the busy check, plus the ones that did not.
#[derive(Debug)]
pub struct Prepared {
    pub kind: ActionKind,
    order: Vec<String>,
    issued: Vec<Issued>,
    rejected: Vec<TargetOutcome>,
}

impl Prepared {
    pub fn issued(&self) -> impl Iterator<Item = &str> {
        self.issued.iter().map(|i| i.target.as_str())
    }

    pub fn rejected(&self) -> &[TargetOutcome] {
        &self.rejected
    }
}

pub struct Dispatcher {
    api: Arc<dyn HostApi>,
    updates: mpsc::Sender<Update>,
    refresh: mpsc::Sender<Domain>,
    settings: DispatchSettings,
    next_id: u64,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn HostApi>,
        updates: mpsc::Sender<Update>,
        refresh: mpsc::Sender<Domain>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            api,
            updates,
            refresh,
            settings,
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Busy check and optimistic flip. Must run where the store lives.
    pub fn prepare(
        &mut self,
        reconciler: &mut Reconciler,
        kind: ActionKind,
        targets: Vec<String>,
    ) -> Result<Prepared, DispatchError> {
        // Pending actions are keyed by container id, whichever form the
        // caller used. Unknown targets keep their raw string.
        let state = reconciler.store().state();
        let mut order: Vec<String> = Vec::with_capacity(targets.len());
        let mut keys: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            let key = state
                .resolve_target(&target)
                .map(str::to_string)
                .unwrap_or_else(|| target.clone());
            if !keys.contains(&key) {
                keys.push(key);
                order.push(target);
            }
        }
        if order.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        let now = Instant::now();
        let mut issued = Vec::new();
        let mut rejected = Vec::new();
        let mut pending = Vec::new();

        for (target, key) in order.iter().zip(keys) {
            if let Some(existing) = reconciler.store().state().pending(&key) {
                if kind.rejects_when_busy() {
                    let err = DispatchError::Busy {
                        target: target.clone(),
                        pending: existing.kind.to_string(),
                    };
                    debug!(%target, %key, %kind, "rejected locally: {}", err);
                    rejected.push(TargetOutcome {
                        target: target.clone(),
                        success: false,
                        message: err.to_string(),
                    });
                    continue;
                }
            }
            let id = ActionId(self.next_id);
            self.next_id += 1;
            issued.push(Issued { target: target.clone(), key: key.clone(), id });
            pending.push(PendingAction {
                id,
                target: key,
                kind,
                issued_at: now,
                accepted: false,
                prior: None,
            });
        }
        reconciler.begin(pending);

        Ok(Prepared {
            kind,
            order,
            issued,
            rejected,
        })
    }

    /// Send the prepared commands. The returned task resolves to the summary
    /// once every target has either answered or timed out.
    pub fn execute(&self, prepared: Prepared) -> JoinHandle<BulkSummary> {
        let api = self.api.clone();
        let updates = self.updates.clone();
        let refresh = self.refresh.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let Prepared { kind, order, issued, mut rejected } = prepared;
            let commands = issued
                .into_iter()
                .map(|issued| run_one(api.clone(), updates.clone(), &settings, kind, issued));
            let mut outcomes = join_all(commands).await;
            outcomes.append(&mut rejected);

            // Report in the order the caller gave.
            let mut results = Vec::with_capacity(order.len());
            for target in &order {
                if let Some(i) = outcomes.iter().position(|o| &o.target == target) {
                    results.push(outcomes.swap_remove(i));
                }
            }
            let summary = BulkSummary::from_outcomes(kind, results);
            info!(
                action = %kind,
                successful = summary.successful,
                total = summary.total,
                "dispatch finished"
            );

            if summary.successful > 0 {
                let delay = settings.settle_delay;
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = refresh.send(Domain::Containers).await;
                });
            }
            summary
        })
    }
}

async fn run_one(
    api: Arc<dyn HostApi>,
    updates: mpsc::Sender<Update>,
    settings: &DispatchSettings,
    kind: ActionKind,
    issued: Issued,
) -> TargetOutcome {
    let Issued { target, key, id } = issued;
    let call = api.container_action(&key, kind, settings.stop_timeout);
    let (update, outcome) = match timeout(settings.timeout, call).await {
        Ok(Ok(message)) => (
            Update::ActionAccepted { target: key, id },
            TargetOutcome { target, success: true, message },
        ),
        Ok(Err(e)) => {
            let reason = e.to_string();
            let err = DispatchError::CommandFailed {
                target: target.clone(),
                action: kind.to_string(),
                reason: reason.clone(),
            };
            warn!(%target, action = %kind, error = %e, "command failed");
            (
                Update::ActionFailed { target: key, id, reason },
                TargetOutcome { target, success: false, message: err.to_string() },
            )
        }
        Err(_) => {
            let err = DispatchError::TimedOut {
                target: target.clone(),
                action: kind.to_string(),
                after: settings.timeout,
            };
            warn!(%target, action = %kind, "command timed out locally");
            (
                Update::ActionFailed {
                    target: key,
                    id,
                    reason: format!("no answer within {}s", settings.timeout.as_secs()),
                },
                TargetOutcome { target, success: false, message: err.to_string() },
            )
        }
    };
    if updates.send(update).await.is_err() {
        debug!(target = %outcome.target, "engine gone before action result");
    }
    outcome
}
