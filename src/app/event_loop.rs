use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::model::{Domain, Notice, NoticeKind, NoticeLevel, ViewState};
use crate::store::Mutation;
use crate::sync::{ChannelHandle, EventChannel};

use super::{Command, Dashboard};

/// How often pending actions are checked against the grace window.
const HOUSEKEEPING: Duration = Duration::from_secs(1);

impl Dashboard {
    /// Drive the engine until `cancel` fires, a shutdown command arrives, or
    /// every handle is dropped. All store mutation happens on this task.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.start_polling();
        let mut channel = self.start_channel();

        let mut housekeeping = interval(HOUSEKEEPING);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Producer results go first so a caller that just got an answer
            // back always sees its effect in the next snapshot.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(update) = self.updates_rx.recv() => {
                    self.reconciler.apply(update);
                }
                Some(domain) = self.refresh_rx.recv() => {
                    debug!(%domain, "settle refresh");
                    self.poller.refresh(domain);
                }
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = housekeeping.tick() => {
                    self.reconciler.expire(Instant::now());
                }
            }
        }

        self.poller.stop_all();
        if let Some(channel) = channel.take() {
            channel.shutdown().await;
        }
        info!("dashboard stopped");
    }

    fn start_polling(&mut self) {
        for domain in Domain::ALL {
            let period = self.config.polling.interval_for(domain);
            self.poller.start(domain, period);
        }
    }

    fn start_channel(&mut self) -> Option<ChannelHandle> {
        let connector = self.connector.clone()?;
        let channel = EventChannel::new(
            connector,
            self.reconnect.clone(),
            self.updates_tx.clone(),
            self.view_tx.subscribe(),
        );
        Some(channel.spawn())
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Dispatch { kind, targets, reply } => {
                let prepared = match self.dispatcher.prepare(&mut self.reconciler, kind, targets) {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                for rejected in prepared.rejected() {
                    self.reconciler.store_mut().apply(Mutation::PushNotice(Notice::new(
                        NoticeLevel::Warning,
                        NoticeKind::Action,
                        rejected.message.clone(),
                    )));
                }
                let task = self.dispatcher.execute(prepared);
                tokio::spawn(async move {
                    let summary = task.await.map_err(|_| DispatchError::EngineStopped);
                    let _ = reply.send(summary);
                });
            }
            Command::SetView(view) => self.update_view(|v| {
                let changed = v.view != view;
                v.view = view;
                changed
            }),
            Command::SetVisible(visible) => self.update_view(|v| {
                let changed = v.visible != visible;
                v.visible = visible;
                changed
            }),
            Command::SetLiveFollow(on) => self.update_view(|v| {
                let changed = v.live_follow != on;
                v.live_follow = on;
                changed
            }),
            Command::Refresh(domain) => {
                if !self.poller.refresh(domain) {
                    debug!(%domain, "refresh requested for a domain that is not polled");
                }
            }
            Command::Dismiss(target) => {
                self.reconciler.dismiss(&target);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.reconciler.store().state().clone());
            }
            Command::Shutdown => {}
        }
    }

    fn update_view(&mut self, f: impl FnOnce(&mut ViewState) -> bool) {
        if self.view_tx.send_if_modified(f) {
            let view = self.view_tx.borrow();
            debug!(view = ?view.view, visible = view.visible, live_follow = view.live_follow, "view changed");
        }
    }
}
