//! In-memory stand-ins for the host control service and the push channel.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use harborview::error::{ApiError, ChannelError};
use harborview::host::HostApi;
use harborview::model::{
    ActionKind, BulkSummary, ContainerDetail, ContainerHealth, ContainerSnapshot, ContainerStats,
    HostHealth, ManagedService, OverviewPayload, ProcessInfo, SystemInfoPayload, TargetOutcome,
};
use harborview::store::StoreState;
use harborview::sync::{Connector, Inbound, Transport};
use harborview::app::DashboardHandle;

pub fn container(id: &str, name: &str, running: bool) -> ContainerSnapshot {
    ContainerSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        image: format!("lscr.io/{}:latest", name),
        status: if running { "running" } else { "exited" }.to_string(),
        is_running: running,
        is_healthy: true,
        created: None,
        uptime: Some("3h 12m".to_string()),
        ports: vec!["8080/tcp".to_string()],
        stats: None,
    }
}

#[derive(Default)]
pub struct FakeState {
    pub containers: Vec<ContainerSnapshot>,
    /// Targets whose commands fail.
    pub failing: HashSet<String>,
    /// Accept commands but leave the containers as they are.
    pub ignore_actions: bool,
    /// Fetches fail while set.
    pub fetch_error: Option<String>,
    pub action_delay: Duration,
    pub logs: Vec<String>,
}

/// Host that keeps containers in memory and applies actions to them.
#[derive(Default)]
pub struct FakeHost {
    pub state: Mutex<FakeState>,
    pub overview_calls: AtomicUsize,
    pub action_calls: AtomicUsize,
    pub log_calls: AtomicUsize,
}

impl FakeHost {
    pub fn with_containers(containers: Vec<ContainerSnapshot>) -> Arc<Self> {
        let host = FakeHost::default();
        host.state.lock().unwrap().containers = containers;
        Arc::new(host)
    }

    pub fn overview_calls(&self) -> usize {
        self.overview_calls.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    fn find(&self, id: &str) -> Result<ContainerSnapshot, ApiError> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id || c.name == id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                path: format!("/containers/{}", id),
                status: 404,
                body: format!("Container {} not found", id),
            })
    }

    fn fetch_error(&self, path: &str) -> Result<(), ApiError> {
        match &self.state.lock().unwrap().fetch_error {
            Some(message) => Err(ApiError::Application {
                path: path.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HostApi for FakeHost {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, ApiError> {
        self.fetch_error("/containers")?;
        Ok(self.state.lock().unwrap().containers.clone())
    }

    async fn containers_overview(&self) -> Result<OverviewPayload, ApiError> {
        self.overview_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_error("/containers/overview")?;
        let containers = self.state.lock().unwrap().containers.clone();
        let running = containers.iter().filter(|c| c.is_running).count();
        Ok(OverviewPayload {
            total: containers.len(),
            running,
            stopped: containers.len() - running,
            containers,
        })
    }

    async fn container_logs(&self, _id: &str, lines: usize) -> Result<Vec<String>, ApiError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_error("/logs")?;
        let logs = self.state.lock().unwrap().logs.clone();
        let skip = logs.len().saturating_sub(lines);
        Ok(logs.into_iter().skip(skip).collect())
    }

    async fn container_action(
        &self,
        id: &str,
        kind: ActionKind,
        _graceful_timeout: Option<Duration>,
    ) -> Result<String, ApiError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().action_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(id) {
            return Err(ApiError::Application {
                path: format!("/containers/{}/{}", id, kind),
                message: "permission denied".to_string(),
            });
        }
        if !state.ignore_actions {
            if let Some(c) = state.containers.iter_mut().find(|c| c.id == id || c.name == id) {
                c.is_running = kind != ActionKind::Stop;
                c.status = if c.is_running { "running" } else { "exited" }.to_string();
            }
        }
        Ok(format!("Container {} {}ed", id, kind))
    }

    async fn bulk_action(
        &self,
        kind: ActionKind,
        targets: &[String],
        graceful_timeout: Option<Duration>,
    ) -> Result<BulkSummary, ApiError> {
        let mut results = Vec::new();
        for target in targets {
            let outcome = self.container_action(target, kind, graceful_timeout).await;
            results.push(TargetOutcome {
                target: target.clone(),
                success: outcome.is_ok(),
                message: outcome.unwrap_or_else(|e| e.to_string()),
            });
        }
        Ok(BulkSummary::from_outcomes(kind, results))
    }

    async fn system_info(&self) -> Result<SystemInfoPayload, ApiError> {
        self.system_metrics().await
    }

    async fn system_metrics(&self) -> Result<SystemInfoPayload, ApiError> {
        self.fetch_error("/system/metrics")?;
        Ok(SystemInfoPayload {
            hostname: "nas".to_string(),
            platform: "Linux".to_string(),
            ..Default::default()
        })
    }

    async fn system_processes(&self) -> Result<Vec<ProcessInfo>, ApiError> {
        Ok(Vec::new())
    }

    async fn services(&self) -> Result<Vec<ManagedService>, ApiError> {
        Ok(Vec::new())
    }

    async fn container_detail(&self, id: &str) -> Result<ContainerDetail, ApiError> {
        Ok(ContainerDetail {
            summary: self.find(id)?,
            health_status: None,
            started: None,
            restart_policy: Some("unless-stopped".to_string()),
            command: None,
            networks: vec!["bridge".to_string()],
            primary_port: Some(8080),
            size: None,
        })
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, ApiError> {
        Ok(self.find(id)?.stats.unwrap_or_default())
    }

    async fn container_health(&self, id: &str) -> Result<ContainerHealth, ApiError> {
        let c = self.find(id)?;
        Ok(ContainerHealth {
            name: c.name,
            status: c.status,
            health_status: None,
            is_running: c.is_running,
            is_healthy: c.is_healthy,
            uptime: c.uptime,
        })
    }

    async fn health(&self) -> Result<HostHealth, ApiError> {
        self.fetch_error("/health")?;
        Ok(HostHealth {
            status: "healthy".to_string(),
            ..Default::default()
        })
    }
}

// --- Push channel ---

/// Each connect pops one scripted session; an empty script refuses.
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<Vec<(Duration, Inbound)>>>,
    pub attempts: AtomicUsize,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<Vec<(Duration, Inbound)>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            attempts: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

struct ScriptedTransport {
    frames: VecDeque<(Duration, Inbound)>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<Inbound, ChannelError>> {
        match self.frames.pop_front() {
            Some((delay, frame)) => {
                tokio::time::sleep(delay).await;
                Some(Ok(frame))
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(frames) => Ok(Box::new(ScriptedTransport {
                frames: frames.into(),
                sent: self.sent.clone(),
            })),
            None => Err(ChannelError::Connect {
                url: "ws://fake".to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Poll the engine until `check` holds, advancing (paused) time in small steps.
pub async fn wait_for(handle: &DashboardHandle, mut check: impl FnMut(&StoreState) -> bool) -> StoreState {
    for _ in 0..600 {
        let state = handle.snapshot().await.expect("engine running");
        if check(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 60s of engine time");
}
