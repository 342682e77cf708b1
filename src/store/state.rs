use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::{
    resolve_bindings, ActionError, ActionId, ActionKind, ChannelStatus, ContainerOverview, ContainerSnapshot, Domain,
    LogBuffer, ManagedService, MetricsHistory, Notice, NoticeKind, NoticeLevel, PendingAction,
    PriorState, ServiceBinding, SystemMetricsSnapshot,
};

use super::mutation::{Change, Mutation};

/// Limits and windows the store enforces.
#[derive(Clone, Debug)]
pub struct StorePolicy {
    /// Accepted actions unconfirmed for this long are reported as stuck.
    pub grace: Duration,
    pub max_log_lines: usize,
    pub metrics_history: usize,
    pub max_notices: usize,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            max_log_lines: 1000,
            metrics_history: 20,
            max_notices: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaleMark {
    pub since: DateTime<Utc>,
    pub reason: String,
}

/// All dashboard state. Subscribers only ever see it between mutations.
#[derive(Clone, Debug)]
pub struct StoreState {
    containers: Vec<ContainerSnapshot>,
    overview: ContainerOverview,
    services: Vec<ManagedService>,
    bindings: Vec<ServiceBinding>,
    system: Option<SystemMetricsSnapshot>,
    metrics: MetricsHistory,
    logs: HashMap<String, LogBuffer>,
    pending: HashMap<String, PendingAction>,
    action_errors: HashMap<String, ActionError>,
    /// Most recent action issued per target, kept after the pending entry
    /// settles so a late failure can still be matched.
    last_issued: HashMap<String, (ActionId, ActionKind)>,
    stale: BTreeMap<Domain, StaleMark>,
    refreshed: BTreeMap<Domain, DateTime<Utc>>,
    notices: VecDeque<Notice>,
    channel: ChannelStatus,
    policy: StorePolicy,
}

impl StoreState {
    pub fn new(policy: StorePolicy) -> Self {
        Self {
            containers: Vec::new(),
            overview: ContainerOverview::default(),
            services: Vec::new(),
            bindings: Vec::new(),
            system: None,
            metrics: MetricsHistory::new(policy.metrics_history),
            logs: HashMap::new(),
            pending: HashMap::new(),
            action_errors: HashMap::new(),
            last_issued: HashMap::new(),
            stale: BTreeMap::new(),
            refreshed: BTreeMap::new(),
            notices: VecDeque::new(),
            channel: ChannelStatus::default(),
            policy,
        }
    }

    // --- Read access ---

    pub fn containers(&self) -> &[ContainerSnapshot] {
        &self.containers
    }

    pub fn container(&self, id_or_name: &str) -> Option<&ContainerSnapshot> {
        self.find_target(id_or_name).map(|i| &self.containers[i])
    }

    pub fn overview(&self) -> ContainerOverview {
        self.overview
    }

    pub fn services(&self) -> &[ManagedService] {
        &self.services
    }

    pub fn bindings(&self) -> &[ServiceBinding] {
        &self.bindings
    }

    pub fn binding(&self, service_key: &str) -> Option<&ServiceBinding> {
        self.bindings.iter().find(|b| b.service_key == service_key)
    }

    pub fn system(&self) -> Option<&SystemMetricsSnapshot> {
        self.system.as_ref()
    }

    pub fn metrics(&self) -> &MetricsHistory {
        &self.metrics
    }

    pub fn logs(&self, container_id: &str) -> Option<&LogBuffer> {
        self.logs.get(container_id)
    }

    pub fn pending(&self, target: &str) -> Option<&PendingAction> {
        self.pending.get(target)
    }

    pub fn pending_actions(&self) -> impl Iterator<Item = &PendingAction> {
        self.pending.values()
    }

    pub fn action_error(&self, target: &str) -> Option<&ActionError> {
        self.action_errors.get(target)
    }

    pub fn action_errors(&self) -> impl Iterator<Item = &ActionError> {
        self.action_errors.values()
    }

    pub fn stale(&self, domain: Domain) -> Option<&StaleMark> {
        self.stale.get(&domain)
    }

    pub fn stale_domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.stale.keys().copied()
    }

    pub fn last_refreshed(&self, domain: Domain) -> Option<DateTime<Utc>> {
        self.refreshed.get(&domain).copied()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.back()
    }

    pub fn channel(&self) -> &ChannelStatus {
        &self.channel
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Canonical container id for an id or a name, if the container is known.
    pub fn resolve_target(&self, target: &str) -> Option<&str> {
        self.find_target(target).map(|i| self.containers[i].id.as_str())
    }

    fn find_target(&self, target: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == target)
            .or_else(|| self.containers.iter().position(|c| c.name == target))
    }

    // --- Mutation ---

    /// Apply one mutation. `None` means nothing changed and nobody should be
    /// notified.
    pub(crate) fn apply(&mut self, mutation: Mutation) -> Option<Change> {
        match mutation {
            Mutation::ReplaceContainers { containers, now } => {
                self.replace_containers(containers, now);
                Some(Change::Containers)
            }
            Mutation::MergeContainer(patch) => {
                let Some(idx) = self.containers.iter().position(|c| c.id == patch.id) else {
                    debug!(id = %patch.id, "patch for unknown container ignored");
                    return None;
                };
                if !patch.apply_to(&mut self.containers[idx]) {
                    return None;
                }
                self.derive();
                Some(Change::ContainerPatched { id: patch.id })
            }
            Mutation::AppendMetricSample { domain, sample } => {
                self.metrics.push(domain, sample);
                Some(Change::Metrics(domain))
            }
            Mutation::SetSystem(snapshot) => {
                self.metrics.record(&snapshot);
                self.system = Some(snapshot);
                Some(Change::System)
            }
            Mutation::SetServices(services) => {
                self.services = services;
                self.bindings = resolve_bindings(&self.services, &self.containers);
                Some(Change::Services)
            }
            Mutation::AppendLogs { container_id, lines } => {
                let max = self.policy.max_log_lines;
                self.logs
                    .entry(container_id.clone())
                    .or_insert_with(|| LogBuffer::new(container_id.clone(), max))
                    .extend(lines);
                Some(Change::Logs { container_id })
            }
            Mutation::ClearLogs { container_id } => {
                self.logs.remove(&container_id)?;
                Some(Change::Logs { container_id })
            }
            Mutation::BeginAction(action) => Some(self.begin_action(action)),
            Mutation::AcceptAction { target, id } => {
                let pending = self.pending.get_mut(&target)?;
                if pending.id != id {
                    debug!(%target, "accept for superseded action ignored");
                    return None;
                }
                pending.accepted = true;
                Some(Change::Pending { target })
            }
            Mutation::FailAction { target, id, reason } => self.fail_action(target, id, reason),
            Mutation::ExpirePending { now } => {
                let stuck = self.expire_stuck(now);
                if stuck.is_empty() {
                    return None;
                }
                Some(Change::Expired { targets: stuck })
            }
            Mutation::MarkStale { domain, reason } => {
                let since = self.stale.get(&domain).map(|m| m.since).unwrap_or_else(Utc::now);
                self.stale.insert(domain, StaleMark { since, reason });
                Some(Change::Stale(domain))
            }
            Mutation::MarkFresh { domain } => {
                self.refreshed.insert(domain, Utc::now());
                self.stale.remove(&domain)?;
                Some(Change::Stale(domain))
            }
            Mutation::PushNotice(notice) => {
                self.push_notice(notice);
                Some(Change::Notice)
            }
            Mutation::SetChannel(status) => {
                if self.channel == status {
                    return None;
                }
                self.channel = status;
                Some(Change::Channel)
            }
            Mutation::DismissError { target } => {
                self.action_errors.remove(&target)?;
                Some(Change::Errors { target })
            }
        }
    }

    fn replace_containers(&mut self, containers: Vec<ContainerSnapshot>, now: Instant) {
        // One entry per id; a repeated id keeps its first position and the
        // last record's fields.
        let mut unique: Vec<ContainerSnapshot> = Vec::with_capacity(containers.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for c in containers {
            match index.get(&c.id) {
                Some(&i) => {
                    warn!(id = %c.id, "duplicate container id in list");
                    unique[i] = c;
                }
                None => {
                    index.insert(c.id.clone(), unique.len());
                    unique.push(c);
                }
            }
        }
        self.containers = unique;
        self.settle_pending(now);
        self.derive();
    }

    /// Clear pending actions the new authoritative list confirms; report
    /// accepted ones past the grace window as stuck.
    fn settle_pending(&mut self, now: Instant) {
        let mut fulfilled = Vec::new();
        for (target, pending) in &self.pending {
            if let Some(c) = self.find_target(target).map(|i| &self.containers[i]) {
                if pending.is_fulfilled_by(c.is_running) {
                    fulfilled.push(target.clone());
                }
            }
        }
        for target in fulfilled {
            if let Some(p) = self.pending.remove(&target) {
                info!(%target, action = %p.kind, "action confirmed");
            }
        }
        self.expire_stuck(now);
    }

    fn expire_stuck(&mut self, now: Instant) -> Vec<String> {
        let grace = self.policy.grace;
        let stuck: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.accepted && now.saturating_duration_since(p.issued_at) >= grace)
            .map(|(t, _)| t.clone())
            .collect();

        for target in &stuck {
            let Some(p) = self.pending.remove(target) else { continue };
            warn!(%target, action = %p.kind, "no confirmation within grace window");
            let reason = format!(
                "no confirmation received {}s after {}",
                grace.as_secs(),
                p.kind
            );
            self.action_errors.insert(
                target.clone(),
                ActionError {
                    target: target.clone(),
                    kind: p.kind,
                    reason: reason.clone(),
                    stuck: true,
                    at: Utc::now(),
                },
            );
            self.push_notice(Notice::new(
                NoticeLevel::Warning,
                NoticeKind::NoConfirmation { target: target.clone() },
                format!("{}: {}", target, reason),
            ));
        }
        stuck
    }

    fn begin_action(&mut self, mut action: PendingAction) -> Change {
        let target = action.target.clone();
        if let Some(idx) = self.find_target(&target) {
            let c = &mut self.containers[idx];
            // A superseded action keeps the original pre-action state.
            action.prior = self
                .pending
                .get(&target)
                .and_then(|p| p.prior.clone())
                .or_else(|| {
                    Some(PriorState {
                        is_running: c.is_running,
                        status: c.status.clone(),
                    })
                });
            match action.kind {
                ActionKind::Start => c.is_running = true,
                ActionKind::Stop => c.is_running = false,
                ActionKind::Restart => {}
            }
            c.status = action.kind.transition_status().to_string();
        }
        self.action_errors.remove(&target);
        self.last_issued.insert(target.clone(), (action.id, action.kind));
        if let Some(prev) = self.pending.insert(target.clone(), action) {
            debug!(%target, superseded = %prev.kind, "pending action replaced");
        }
        self.derive();
        Change::Pending { target }
    }

    fn fail_action(&mut self, target: String, id: ActionId, reason: String) -> Option<Change> {
        let kind = match self.pending.get(&target) {
            Some(p) if p.id != id => {
                debug!(%target, "failure for superseded action ignored");
                return None;
            }
            Some(_) => {
                let Some(p) = self.pending.remove(&target) else { return None };
                if let (Some(prior), Some(idx)) = (p.prior.as_ref(), self.find_target(&target)) {
                    let c = &mut self.containers[idx];
                    // Only undo our own flip; an authoritative list may
                    // already have replaced it.
                    if c.status == p.kind.transition_status() {
                        c.is_running = prior.is_running;
                        c.status = prior.status.clone();
                    }
                }
                p.kind
            }
            None => match self.last_issued.get(&target) {
                // A snapshot already settled it; nothing to roll back.
                Some(&(last, kind)) if last == id => {
                    debug!(%target, "failure for settled action; flagging only");
                    kind
                }
                _ => {
                    debug!(%target, "failure for unknown action ignored");
                    return None;
                }
            },
        };

        self.action_errors.insert(
            target.clone(),
            ActionError {
                target: target.clone(),
                kind,
                reason: reason.clone(),
                stuck: false,
                at: Utc::now(),
            },
        );
        self.push_notice(Notice::new(
            NoticeLevel::Error,
            NoticeKind::CommandFailed { target: target.clone() },
            format!("{} {} failed: {}", kind, target, reason),
        ));
        self.derive();
        Some(Change::Errors { target })
    }

    fn push_notice(&mut self, notice: Notice) {
        while self.notices.len() >= self.policy.max_notices.max(1) {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    /// Recompute everything derived from the container list.
    fn derive(&mut self) {
        self.overview = ContainerOverview::from_containers(&self.containers);
        self.bindings = resolve_bindings(&self.services, &self.containers);
    }
}
