//! Periodic refresh, one task per domain.
//!
//! Each domain ticks on its own interval. A cycle that overruns the next tick
//! is cut off at one interval and the missed tick is skipped, so a domain
//! never has two fetches in flight. Ticks are gated on the current
//! [`ViewState`]; when a domain's view becomes active again it is fetched
//! right away instead of waiting for the next tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::host::HostApi;
use crate::model::{Domain, ViewState};

use super::reconciler::{Polled, Update};

struct PollContext {
    api: Arc<dyn HostApi>,
    updates: mpsc::Sender<Update>,
    view: watch::Receiver<ViewState>,
    tail_lines: usize,
    /// Once true, the services domain stops asking the host for its catalog.
    catalog_loaded: AtomicBool,
}

struct DomainTask {
    handle: JoinHandle<()>,
    refresh: Arc<Notify>,
    period: Duration,
}

pub struct Poller {
    ctx: Arc<PollContext>,
    tasks: HashMap<Domain, DomainTask>,
}

impl Poller {
    pub fn new(
        api: Arc<dyn HostApi>,
        updates: mpsc::Sender<Update>,
        view: watch::Receiver<ViewState>,
        tail_lines: usize,
        catalog_loaded: bool,
    ) -> Self {
        Self {
            ctx: Arc::new(PollContext {
                api,
                updates,
                view,
                tail_lines,
                catalog_loaded: AtomicBool::new(catalog_loaded),
            }),
            tasks: HashMap::new(),
        }
    }

    /// Start polling `domain` every `period`. Restarts with the new period if
    /// the domain is already running.
    pub fn start(&mut self, domain: Domain, period: Duration) {
        if let Some(old) = self.tasks.remove(&domain) {
            old.handle.abort();
            debug!(%domain, "poller restarted");
        }
        let refresh = Arc::new(Notify::new());
        let handle = tokio::spawn(run_domain(self.ctx.clone(), domain, period, refresh.clone()));
        info!(%domain, period_secs = period.as_secs_f64(), "polling started");
        self.tasks.insert(domain, DomainTask { handle, refresh, period });
    }

    /// Returns false if the domain was not running.
    pub fn stop(&mut self, domain: Domain) -> bool {
        match self.tasks.remove(&domain) {
            Some(task) => {
                task.handle.abort();
                info!(%domain, "polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }

    /// Fetch `domain` now, outside its schedule and regardless of view.
    pub fn refresh(&self, domain: Domain) -> bool {
        match self.tasks.get(&domain) {
            Some(task) => {
                task.refresh.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, domain: Domain) -> bool {
        self.tasks.get(&domain).is_some_and(|t| !t.handle.is_finished())
    }

    pub fn period(&self, domain: Domain) -> Option<Duration> {
        self.tasks.get(&domain).map(|t| t.period)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Activity key for a domain: whether it is wanted, and for logs, which
/// container. A change to an active key triggers an immediate fetch.
fn activity(view: &ViewState, domain: Domain) -> Option<Option<String>> {
    view.wants(domain)
        .then(|| view.view.log_target().map(str::to_string))
}

#[derive(Clone, Copy, Debug)]
enum Trigger {
    Tick,
    /// First tick, or the view just started consuming this domain.
    Resume,
    /// Explicit refresh request; ignores the view.
    Forced,
}

async fn run_domain(ctx: Arc<PollContext>, domain: Domain, period: Duration, refresh: Arc<Notify>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut view = ctx.view.clone();
    let mut last = activity(&view.borrow_and_update(), domain);
    let mut first = true;

    loop {
        let trigger = tokio::select! {
            _ = ticker.tick() => {
                if std::mem::take(&mut first) { Trigger::Resume } else { Trigger::Tick }
            }
            _ = refresh.notified() => Trigger::Forced,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = activity(&view.borrow_and_update(), domain);
                let resumed = now.is_some() && now != last;
                last = now;
                if !resumed {
                    continue;
                }
                debug!(%domain, "view active again; fetching now");
                Trigger::Resume
            }
        };

        let state = view.borrow().clone();
        let due = match trigger {
            Trigger::Tick => state.wants_periodic(domain),
            Trigger::Resume => state.wants(domain),
            Trigger::Forced => true,
        };
        if !due {
            continue;
        }

        let update = match timeout(period, fetch(&ctx, domain, &state)).await {
            Ok(Ok(Some(polled))) => Update::Polled(domain, polled),
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => Update::PollFailed { domain, error: e.to_string() },
            Err(_) => Update::PollFailed {
                domain,
                error: ApiError::Timeout { path: domain.to_string(), after: period }.to_string(),
            },
        };
        if ctx.updates.send(update).await.is_err() {
            debug!(%domain, "engine gone; poller exiting");
            break;
        }
    }
}

async fn fetch(ctx: &PollContext, domain: Domain, view: &ViewState) -> Result<Option<Polled>, ApiError> {
    match domain {
        Domain::Containers => {
            let overview = ctx.api.containers_overview().await?;
            Ok(Some(Polled::Containers(overview.containers)))
        }
        Domain::Services => {
            let catalog = if ctx.catalog_loaded.load(Ordering::Relaxed) {
                None
            } else {
                Some(ctx.api.services().await?)
            };
            let containers = ctx.api.list_containers().await?;
            if catalog.is_some() {
                ctx.catalog_loaded.store(true, Ordering::Relaxed);
            }
            Ok(Some(Polled::Services { containers, catalog }))
        }
        Domain::System => Ok(Some(Polled::System(ctx.api.system_metrics().await?))),
        Domain::Logs => {
            let Some(id) = view.view.log_target() else {
                return Ok(None);
            };
            let lines = ctx.api.container_logs(id, ctx.tail_lines).await?;
            Ok(Some(Polled::Logs { container_id: id.to_string(), lines }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::model::{
        ActionKind, BulkSummary, ContainerDetail, ContainerHealth, ContainerSnapshot, ContainerStats,
        HostHealth, ManagedService, OverviewPayload, ProcessInfo, SystemInfoPayload, View,
    };

    #[derive(Default)]
    struct CountingApi {
        services: AtomicUsize,
        containers: AtomicUsize,
        logs: AtomicUsize,
        overview_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Decrements the in-flight count even when the fetch is cut off.
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HostApi for CountingApi {
        async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, ApiError> {
            self.containers.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn containers_overview(&self) -> Result<OverviewPayload, ApiError> {
            self.containers.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);
            if !self.overview_delay.is_zero() {
                tokio::time::sleep(self.overview_delay).await;
            }
            Ok(OverviewPayload { total: 0, running: 0, stopped: 0, containers: Vec::new() })
        }
        async fn container_logs(&self, _id: &str, _lines: usize) -> Result<Vec<String>, ApiError> {
            self.logs.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["line".to_string()])
        }
        async fn container_action(
            &self,
            _id: &str,
            _kind: ActionKind,
            _graceful_timeout: Option<Duration>,
        ) -> Result<String, ApiError> {
            unreachable!("poller never issues actions")
        }
        async fn bulk_action(
            &self,
            _kind: ActionKind,
            _targets: &[String],
            _graceful_timeout: Option<Duration>,
        ) -> Result<BulkSummary, ApiError> {
            unreachable!("poller never issues actions")
        }
        async fn system_info(&self) -> Result<SystemInfoPayload, ApiError> {
            Ok(SystemInfoPayload::default())
        }
        async fn system_metrics(&self) -> Result<SystemInfoPayload, ApiError> {
            Ok(SystemInfoPayload::default())
        }
        async fn system_processes(&self) -> Result<Vec<ProcessInfo>, ApiError> {
            Ok(Vec::new())
        }
        async fn services(&self) -> Result<Vec<ManagedService>, ApiError> {
            self.services.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn container_detail(&self, _id: &str) -> Result<ContainerDetail, ApiError> {
            unreachable!("poller never inspects containers")
        }
        async fn container_stats(&self, _id: &str) -> Result<ContainerStats, ApiError> {
            unreachable!("poller never inspects containers")
        }
        async fn container_health(&self, _id: &str) -> Result<ContainerHealth, ApiError> {
            unreachable!("poller never inspects containers")
        }
        async fn health(&self) -> Result<HostHealth, ApiError> {
            unreachable!("poller never checks host health")
        }
    }

    fn logs_view(id: &str, live_follow: bool) -> ViewState {
        ViewState { view: View::Logs(id.to_string()), visible: true, live_follow }
    }

    #[test]
    fn activity_tracks_the_log_target() {
        let a = activity(&logs_view("a", false), Domain::Logs);
        let b = activity(&logs_view("b", false), Domain::Logs);
        assert_eq!(a, Some(Some("a".to_string())));
        assert_ne!(a, b);
        assert_eq!(activity(&ViewState::default(), Domain::Logs), None);
        assert_eq!(activity(&ViewState::default(), Domain::System), Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn services_catalog_is_fetched_once() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::channel(16);
        let view = ViewState { view: View::Services, ..Default::default() };
        let (_view_tx, view_rx) = watch::channel(view);
        let mut poller = Poller::new(api.clone(), tx, view_rx, 100, false);
        poller.start(Domain::Services, Duration::from_secs(30));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Update::Polled(Domain::Services, Polled::Services { catalog: Some(_), .. })));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Update::Polled(Domain::Services, Polled::Services { catalog: None, .. })));
        assert_eq!(api.services.load(Ordering::SeqCst), 1);
        assert_eq!(api.containers.load(Ordering::SeqCst), 2);
        poller.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn logs_fetch_on_open_and_follow_only_when_live() {
        let api = Arc::new(CountingApi::default());
        let (tx, mut rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(logs_view("a", false));
        let mut poller = Poller::new(api.clone(), tx, view_rx, 100, true);
        poller.start(Domain::Logs, Duration::from_secs(5));

        let opened = rx.recv().await.unwrap();
        assert!(matches!(opened, Update::Polled(Domain::Logs, Polled::Logs { .. })));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(api.logs.load(Ordering::SeqCst), 1);

        view_tx.send_modify(|v| v.live_follow = true);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(api.logs.load(Ordering::SeqCst) >= 3);

        // Switching containers fetches the new one straight away.
        view_tx.send_modify(|v| {
            v.live_follow = false;
            v.view = View::Logs("b".to_string());
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut switched = false;
        while let Ok(update) = rx.try_recv() {
            if let Update::Polled(_, Polled::Logs { container_id, .. }) = update {
                switched |= container_id == "b";
            }
        }
        assert!(switched);
        poller.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_never_overlaps_the_next_one() {
        let api = Arc::new(CountingApi {
            overview_delay: Duration::from_secs(45),
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(16);
        let view = ViewState { view: View::Containers, ..Default::default() };
        let (_view_tx, view_rx) = watch::channel(view);
        let mut poller = Poller::new(api.clone(), tx, view_rx, 100, true);
        poller.start(Domain::Containers, Duration::from_secs(30));

        // A forced refresh while the first fetch hangs waits its turn.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(poller.refresh(Domain::Containers));
        tokio::time::sleep(Duration::from_secs(190)).await;
        poller.stop_all();

        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(api.containers.load(Ordering::SeqCst) >= 3);
        let mut timed_out = 0;
        while let Ok(update) = rx.try_recv() {
            match update {
                Update::PollFailed { domain: Domain::Containers, .. } => timed_out += 1,
                other => panic!("unexpected update: {other:?}"),
            }
        }
        assert!(timed_out >= 3);
    }

    #[tokio::test]
    async fn refresh_reports_unknown_domains() {
        let api = Arc::new(CountingApi::default());
        let (tx, _rx) = mpsc::channel(16);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        let mut poller = Poller::new(api, tx, view_rx, 100, true);
        assert!(!poller.refresh(Domain::System));
        poller.start(Domain::System, Duration::from_secs(5));
        assert!(poller.refresh(Domain::System));
        assert_eq!(poller.period(Domain::System), Some(Duration::from_secs(5)));
        assert!(poller.stop(Domain::System));
        assert!(!poller.is_running(Domain::System));
    }
}
