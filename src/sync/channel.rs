//! Event channel client: push updates over a WebSocket, with reconnects.
//!
//! States move `Disconnected -> Connecting -> Connected`, and on an
//! unexpected drop through `Reconnecting { attempt, delay }` back to
//! `Connected` or, once the attempts run out, to `Failed`. A shutdown
//! message or a normal close frame ends in `Closed` with no reconnect.
//! Polling keeps running underneath either way.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::model::{ChannelStatus, ViewState};

use super::backoff::ReconnectPolicy;
use super::protocol::{snapshot_requests, topics_for, ClientMessage, ServerMessage, Topic};
use super::reconciler::Update;

/// Close codes that mean the host closed on purpose.
const DELIBERATE_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// A frame read from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Close { code: Option<u16>, reason: String },
    /// Pings, pongs, binary frames; nothing to route.
    Other,
}

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// `None` when the stream ended without a close frame.
    async fn next(&mut self) -> Option<Result<Inbound, ChannelError>>;

    async fn close(&mut self);
}

/// Opens connections; swapped out in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError>;
}

// --- WebSocket implementation ---

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn next(&mut self) -> Option<Result<Inbound, ChannelError>> {
        let frame = match self.stream.next().await? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
        };
        Some(Ok(match frame {
            Message::Text(text) => Inbound::Text(text),
            Message::Close(frame) => Inbound::Close {
                code: frame.as_ref().map(|f| u16::from(f.code)),
                reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
            },
            _ => Inbound::Other,
        }))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close");
        }
    }
}

// --- Client state machine ---

/// Running channel task.
pub struct ChannelHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Stop the channel; no reconnect timers survive this.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "event channel task failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct EventChannel {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    updates: mpsc::Sender<Update>,
    view: watch::Receiver<ViewState>,
    cancel: CancellationToken,
}

enum SessionEnd {
    Cancelled,
    Deliberate(String),
    Lost(String),
}

impl EventChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        updates: mpsc::Sender<Update>,
        view: watch::Receiver<ViewState>,
    ) -> Self {
        Self {
            connector,
            policy,
            updates,
            view,
            cancel: CancellationToken::new(),
        }
    }

    pub fn spawn(self) -> ChannelHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ChannelHandle { cancel, task }
    }

    async fn report(&self, status: ChannelStatus) {
        if self.updates.send(Update::Channel(status)).await.is_err() {
            self.cancel.cancel();
        }
    }

    async fn run(self) {
        let mut attempt = 0u32;
        self.report(ChannelStatus::Connecting).await;

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(transport) => {
                    attempt = 0;
                    info!("event channel connected");
                    self.report(ChannelStatus::Connected).await;
                    match self.session(transport).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Deliberate(reason) => {
                            self.report(ChannelStatus::Closed { reason }).await;
                            return;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, "event channel lost");
                            self.report(ChannelStatus::Disconnected).await;
                        }
                    }
                }
                Err(e) => warn!(error = %e, attempt, "event channel connect failed"),
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                self.report(ChannelStatus::Failed).await;
                return;
            };
            self.report(ChannelStatus::Reconnecting { attempt, delay }).await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("event channel stopped");
        // Best effort; the engine may already be gone.
        let _ = self.updates.try_send(Update::Channel(ChannelStatus::Disconnected));
    }

    async fn session(&self, mut transport: Box<dyn Transport>) -> SessionEnd {
        let mut view = self.view.clone();
        let state = view.borrow_and_update().clone();

        // A fresh connection knows nothing; ask for a full picture.
        for request in snapshot_requests(&state.view) {
            if let Err(e) = transport.send(request.encode()).await {
                return SessionEnd::Lost(e.to_string());
            }
        }
        let mut subscribed: Vec<Topic> = Vec::new();
        if let Err(e) = sync_topics(transport.as_mut(), &mut subscribed, &state).await {
            return SessionEnd::Lost(e.to_string());
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    transport.close().await;
                    return SessionEnd::Cancelled;
                }
                changed = view.changed() => {
                    if changed.is_err() {
                        transport.close().await;
                        return SessionEnd::Cancelled;
                    }
                    let state = view.borrow_and_update().clone();
                    if let Err(e) = sync_topics(transport.as_mut(), &mut subscribed, &state).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                inbound = transport.next() => match inbound {
                    None => return SessionEnd::Lost("stream ended".to_string()),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(Inbound::Close { code, reason })) => {
                        if code.is_some_and(|c| DELIBERATE_CLOSE_CODES.contains(&c)) {
                            let reason = if reason.is_empty() { "closed by host".to_string() } else { reason };
                            return SessionEnd::Deliberate(reason);
                        }
                        return SessionEnd::Lost(format!("closed with code {:?}: {}", code, reason));
                    }
                    Some(Ok(Inbound::Other)) => {}
                    Some(Ok(Inbound::Text(text))) => match ServerMessage::decode(&text) {
                        Ok(message) => {
                            let shutdown = match &message {
                                ServerMessage::Shutdown { reason } => {
                                    Some(reason.clone().unwrap_or_else(|| "host shutdown".to_string()))
                                }
                                _ => None,
                            };
                            if self.updates.send(Update::Push(message)).await.is_err() {
                                return SessionEnd::Cancelled;
                            }
                            if let Some(reason) = shutdown {
                                transport.close().await;
                                return SessionEnd::Deliberate(reason);
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping push message"),
                    },
                },
            }
        }
    }
}

/// Bring the server-side subscriptions in line with what the view needs.
/// While hidden, nothing is sent; the connection stays up.
async fn sync_topics(
    transport: &mut dyn Transport,
    subscribed: &mut Vec<Topic>,
    state: &ViewState,
) -> Result<(), ChannelError> {
    if !state.visible {
        return Ok(());
    }
    let wanted = topics_for(&state.view);
    for topic in subscribed.iter().filter(|t| !wanted.contains(t)) {
        transport.send(ClientMessage::Unsubscribe { topic: topic.clone() }.encode()).await?;
    }
    for topic in wanted.iter().filter(|t| !subscribed.contains(t)) {
        transport.send(ClientMessage::Subscribe { topic: topic.clone() }.encode()).await?;
    }
    *subscribed = wanted;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::model::View;

    /// Scripted transport: yields queued frames, then stays open forever.
    struct ScriptedTransport {
        frames: VecDeque<Inbound>,
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
                Some(frame) => Some(Ok(frame)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    struct ScriptedConnector {
        sessions: Mutex<VecDeque<Vec<Inbound>>>,
        sent: Arc<Mutex<Vec<String>>>,
        attempts: Mutex<u32>,
    }

    impl ScriptedConnector {
        fn new(sessions: Vec<Vec<Inbound>>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into()),
                sent: Arc::new(Mutex::new(Vec::new())),
                attempts: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
            *self.attempts.lock().unwrap() += 1;
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(frames) => Ok(Box::new(ScriptedTransport {
                    frames: frames.into(),
                    sent: self.sent.clone(),
                })),
                None => Err(ChannelError::Connect {
                    url: "ws://test".into(),
                    message: "refused".into(),
                }),
            }
        }
    }

    async fn statuses_until_terminal(rx: &mut mpsc::Receiver<Update>) -> (Vec<ChannelStatus>, Vec<ServerMessage>) {
        let mut statuses = Vec::new();
        let mut pushes = Vec::new();
        while let Some(update) = rx.recv().await {
            match update {
                Update::Channel(status) => {
                    let done = status.is_terminal();
                    statuses.push(status);
                    if done {
                        break;
                    }
                }
                Update::Push(msg) => pushes.push(msg),
                _ => {}
            }
        }
        (statuses, pushes)
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_drop_backs_off_then_fails() {
        // One session that ends abruptly, then every reconnect is refused.
        let connector = ScriptedConnector::new(vec![vec![Inbound::Close {
            code: Some(1006),
            reason: String::new(),
        }]]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        let handle = EventChannel::new(connector.clone(), ReconnectPolicy::default(), tx, view_rx).spawn();

        let (statuses, _) = statuses_until_terminal(&mut rx).await;
        let delays: Vec<u64> = statuses
            .iter()
            .filter_map(|s| match s {
                ChannelStatus::Reconnecting { delay, .. } => Some(delay.as_secs()),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(
            statuses[..4],
            [
                ChannelStatus::Connecting,
                ChannelStatus::Connected,
                ChannelStatus::Disconnected,
                ChannelStatus::Reconnecting { attempt: 1, delay: Duration::from_secs(1) },
            ]
        );
        assert_eq!(statuses.last(), Some(&ChannelStatus::Failed));
        assert_eq!(*connector.attempts.lock().unwrap(), 6);

        // No further attempts after failing.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(*connector.attempts.lock().unwrap(), 6);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_message_closes_without_reconnect() {
        let connector = ScriptedConnector::new(vec![vec![
            Inbound::Text(r#"{"type":"notification","message":"bye soon"}"#.into()),
            Inbound::Text(r#"{"type":"shutdown","reason":"maintenance"}"#.into()),
        ]]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        EventChannel::new(connector.clone(), ReconnectPolicy::default(), tx, view_rx).spawn();

        let (statuses, pushes) = statuses_until_terminal(&mut rx).await;
        assert_eq!(statuses.last(), Some(&ChannelStatus::Closed { reason: "maintenance".into() }));
        assert_eq!(pushes.len(), 2);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*connector.attempts.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_frame_is_deliberate() {
        let connector = ScriptedConnector::new(vec![vec![Inbound::Close {
            code: Some(1001),
            reason: "going away".into(),
        }]]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        EventChannel::new(connector, ReconnectPolicy::default(), tx, view_rx).spawn();

        let (statuses, _) = statuses_until_terminal(&mut rx).await;
        assert_eq!(statuses.last(), Some(&ChannelStatus::Closed { reason: "going away".into() }));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_does_not_stop_routing() {
        let connector = ScriptedConnector::new(vec![vec![
            Inbound::Text("{garbage".into()),
            Inbound::Text(r#"{"type":"mystery"}"#.into()),
            Inbound::Text(r#"{"type":"log_append","container_id":"a","lines":["x"]}"#.into()),
            Inbound::Text(r#"{"type":"shutdown"}"#.into()),
        ]]);
        let (tx, mut rx) = mpsc::channel(64);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        EventChannel::new(connector, ReconnectPolicy::default(), tx, view_rx).spawn();

        let (_, pushes) = statuses_until_terminal(&mut rx).await;
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].kind(), "log_append");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_requests_snapshot_and_hidden_view_suppresses_subscriptions() {
        let connector = ScriptedConnector::new(vec![vec![]]);
        let (tx, mut rx) = mpsc::channel(64);
        let (view_tx, view_rx) = watch::channel(ViewState {
            view: View::Containers,
            visible: false,
            live_follow: false,
        });
        let handle = EventChannel::new(connector.clone(), ReconnectPolicy::default(), tx, view_rx).spawn();

        // Wait for Connected.
        loop {
            if let Some(Update::Channel(ChannelStatus::Connected)) = rx.recv().await {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            *connector.sent.lock().unwrap(),
            vec![r#"{"type":"request_container_update"}"#.to_string()]
        );

        view_tx.send_modify(|v| v.visible = true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = connector.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains(r#""type":"subscribe""#));

        handle.shutdown().await;
        assert_eq!(*connector.attempts.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_backing_off_stops_connecting() {
        let connector = ScriptedConnector::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(64);
        let (_view_tx, view_rx) = watch::channel(ViewState::default());
        let handle = EventChannel::new(connector.clone(), ReconnectPolicy::default(), tx, view_rx).spawn();

        loop {
            if let Some(Update::Channel(ChannelStatus::Reconnecting { .. })) = rx.recv().await {
                break;
            }
        }
        let attempts = *connector.attempts.lock().unwrap();
        assert_eq!(attempts, 1);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(*connector.attempts.lock().unwrap(), attempts);

        let mut last = None;
        while let Ok(Update::Channel(status)) = rx.try_recv() {
            last = Some(status);
        }
        assert_eq!(last, Some(ChannelStatus::Disconnected));
    }
}
