mod event_loop;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant};

use crate::config::Config;
use crate::error::DispatchError;
use crate::host::HostApi;
use crate::model::{ActionKind, BulkSummary, Domain, View, ViewState};
use crate::store::{Change, Deferred, Mutation, SnapshotStore, StorePolicy, StoreState, SubscriptionId};
use crate::sync::{Connector, DispatchSettings, Dispatcher, Poller, ReconnectPolicy, Reconciler, Update};

/// Capacity of the producer -> engine queue.
const UPDATE_QUEUE: usize = 256;

/// How often [`DashboardHandle::refresh_and_wait`] looks at the store.
const REFRESH_POLL: Duration = Duration::from_millis(50);

/// Requests from a [`DashboardHandle`] to the running engine.
enum Command {
    Dispatch {
        kind: ActionKind,
        targets: Vec<String>,
        reply: oneshot::Sender<Result<BulkSummary, DispatchError>>,
    },
    SetView(View),
    SetVisible(bool),
    SetLiveFollow(bool),
    Refresh(Domain),
    Dismiss(String),
    Snapshot(oneshot::Sender<StoreState>),
    Shutdown,
}

/// The application context: owns the store (through the reconciler), the
/// poller, the dispatcher and the event channel. Built once, then driven by
/// [`Dashboard::run`] as a single engine task.
pub struct Dashboard {
    reconciler: Reconciler,
    poller: Poller,
    dispatcher: Dispatcher,
    connector: Option<Arc<dyn Connector>>,
    reconnect: ReconnectPolicy,
    config: Config,
    view_tx: watch::Sender<ViewState>,
    updates_tx: mpsc::Sender<Update>,
    updates_rx: mpsc::Receiver<Update>,
    refresh_rx: mpsc::Receiver<Domain>,
    commands_rx: mpsc::Receiver<Command>,
}

/// Cloneable front door to a running [`Dashboard`].
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
}

impl Dashboard {
    /// `connector` is `None` when push updates are disabled.
    pub fn new(
        config: Config,
        api: Arc<dyn HostApi>,
        connector: Option<Arc<dyn Connector>>,
        initial_view: ViewState,
    ) -> (Self, DashboardHandle) {
        let policy = StorePolicy {
            grace: Duration::from_secs(config.actions.grace_secs),
            max_log_lines: config.logs.max_lines,
            metrics_history: config.metrics.history,
            ..StorePolicy::default()
        };
        let mut reconciler = Reconciler::with_store(SnapshotStore::new(policy));
        let catalog = config.service_catalog();
        let catalog_loaded = !catalog.is_empty();
        if catalog_loaded {
            reconciler.store_mut().apply(Mutation::SetServices(catalog));
        }

        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE);
        let (refresh_tx, refresh_rx) = mpsc::channel(16);
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (view_tx, view_rx) = watch::channel(initial_view);

        let poller = Poller::new(
            api.clone(),
            updates_tx.clone(),
            view_rx,
            config.logs.tail_lines,
            catalog_loaded,
        );
        let dispatcher = Dispatcher::new(
            api,
            updates_tx.clone(),
            refresh_tx,
            DispatchSettings::from(&config.actions),
        );

        let dashboard = Self {
            reconciler,
            poller,
            dispatcher,
            connector: if config.channel.enabled { connector } else { None },
            reconnect: ReconnectPolicy::from(&config.channel),
            config,
            view_tx,
            updates_tx,
            updates_rx,
            refresh_rx,
            commands_rx,
        };
        (dashboard, DashboardHandle { commands: commands_tx })
    }

    /// Register a store subscriber before the engine starts. Renderers hook
    /// in here.
    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&Change, &StoreState, &mut Deferred) + Send + 'static,
    {
        self.reconciler.store_mut().subscribe(f)
    }

    pub fn state(&self) -> &StoreState {
        self.reconciler.store().state()
    }
}

impl DashboardHandle {
    async fn send(&self, command: Command) -> Result<(), DispatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DispatchError::EngineStopped)
    }

    /// Run `kind` against every target. Resolves once each target answered
    /// or timed out.
    pub async fn dispatch(&self, kind: ActionKind, targets: Vec<String>) -> Result<BulkSummary, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dispatch { kind, targets, reply }).await?;
        rx.await.map_err(|_| DispatchError::EngineStopped)?
    }

    pub async fn set_view(&self, view: View) -> Result<(), DispatchError> {
        self.send(Command::SetView(view)).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), DispatchError> {
        self.send(Command::SetVisible(visible)).await
    }

    pub async fn set_live_follow(&self, on: bool) -> Result<(), DispatchError> {
        self.send(Command::SetLiveFollow(on)).await
    }

    pub async fn refresh(&self, domain: Domain) -> Result<(), DispatchError> {
        self.send(Command::Refresh(domain)).await
    }

    /// Force a fetch of `domain` and wait for it to land, either as fresh
    /// data or as a stale mark. `Ok(false)` means neither happened within
    /// `within`.
    pub async fn refresh_and_wait(&self, domain: Domain, within: Duration) -> Result<bool, DispatchError> {
        let before = self.snapshot().await?.last_refreshed(domain);
        self.refresh(domain).await?;
        let deadline = Instant::now() + within;
        loop {
            let state = self.snapshot().await?;
            if state.last_refreshed(domain) != before || state.stale(domain).is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(REFRESH_POLL).await;
        }
    }

    pub async fn dismiss_error(&self, target: impl Into<String>) -> Result<(), DispatchError> {
        self.send(Command::Dismiss(target.into())).await
    }

    /// Copy of the current store state.
    pub async fn snapshot(&self) -> Result<StoreState, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| DispatchError::EngineStopped)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}
