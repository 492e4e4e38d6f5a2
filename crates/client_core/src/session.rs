//! The chat session driver. One task owns the identity, the live channel,
//! the transcript and every timer; the UI talks to it through
//! [`SessionHandle`].

use std::{collections::VecDeque, sync::Arc};

use shared::{
    domain::{Peer, UserId},
    protocol::{InboundFrame, OutboundFrame},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::{
    api::BackendApi,
    channel::{classify_frame, ChannelEvent, ChannelResource, ChannelStatus, FrameDisposition, PresenceState},
    config::ClientSettings,
    connector::ChannelConnector,
    error::{SendRejection, SessionError},
    history::{load_history, now_display_time},
    identity::resolve_identity,
    transcript::{AppendOutcome, DeliveryStatus, Message, ScrollAction, ScrollState, SnapshotOutcome, Transcript},
    typing::TypingDebouncer,
};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    ResolvingIdentity,
    /// Terminal; the view offers "log out and reset".
    IdentityFailed(SessionError),
    AwaitingPeer,
    LoadingHistory,
    /// Transient; the view offers a retry. Distinct from an empty transcript.
    HistoryFailed(SessionError),
    Ready,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub local_id: Option<UserId>,
    pub channel: ChannelStatus,
    pub channel_error: Option<SessionError>,
    pub peer: Option<Peer>,
    pub presence: PresenceState,
    pub messages: Vec<Message>,
    pub scroll: ScrollState,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            phase: SessionPhase::ResolvingIdentity,
            local_id: None,
            channel: ChannelStatus::Idle,
            channel_error: None,
            peer: None,
            presence: PresenceState::default(),
            messages: Vec::new(),
            scroll: ScrollState::default(),
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.channel.is_reconnecting()
    }

    /// Loaded successfully and nothing has been said yet.
    pub fn is_empty_conversation(&self) -> bool {
        self.phase == SessionPhase::Ready && self.messages.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    IdentityResolved(UserId),
    IdentityFailed(SessionError),
    HistoryLoaded { peer_id: UserId, count: usize },
    HistoryFailed { peer_id: UserId, error: SessionError },
    ChannelStatusChanged(ChannelStatus),
    PresenceChanged(PresenceState),
    MessageAppended(Message),
    MessageDelivered { seq: u64 },
    ScrollToBottom,
    Terminated,
}

enum SessionCommand {
    SelectPeer(Peer),
    ClearPeer,
    InputChanged(String),
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Scrolled(f64),
    ScrollToBottom,
    RetryHistory,
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    IdentityResolved(Result<UserId, SessionError>),
    HistoryLoaded {
        generation: u64,
        peer_id: UserId,
        result: Result<Vec<Message>, SessionError>,
    },
}

pub struct ChatSession {
    settings: ClientSettings,
    backend: Arc<dyn BackendApi>,
    connector: Arc<dyn ChannelConnector>,
    credentials: SessionCredentials,
}

impl ChatSession {
    pub fn new(
        settings: ClientSettings,
        backend: Arc<dyn BackendApi>,
        connector: Arc<dyn ChannelConnector>,
        credentials: SessionCredentials,
    ) -> Self {
        Self {
            settings,
            backend,
            connector,
            credentials,
        }
    }

    /// Mounts the session: spawns the driver, which resolves the identity
    /// before anything else touches the network.
    pub fn start(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial());
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let driver = SessionDriver {
            transcript: Transcript::new(self.settings.near_bottom_threshold),
            typing: TypingDebouncer::new(self.settings.typing_idle),
            settings: self.settings,
            backend: self.backend,
            connector: self.connector,
            credentials: self.credentials,
            commands: commands_rx,
            snapshot: snapshot_tx,
            events: events.clone(),
            internal_tx,
            internal_rx,
            local_id: None,
            phase: SessionPhase::ResolvingIdentity,
            peer: None,
            generation: 0,
            presence: PresenceState::default(),
            channel: None,
            deliveries: VecDeque::new(),
            identity_task: None,
            history_task: None,
        };
        tokio::spawn(driver.run());

        SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events,
        }
    }
}

/// Cloneable front of a running session. Dropping the last handle tears the
/// session down exactly like [`SessionHandle::shutdown`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Terminated)
    }

    pub async fn select_peer(&self, peer: Peer) -> Result<(), SessionError> {
        self.command(SessionCommand::SelectPeer(peer)).await
    }

    pub async fn clear_peer(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::ClearPeer).await
    }

    /// Reports the composer's current text after every keystroke.
    pub async fn input_changed(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::InputChanged(text.into())).await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::SendMessage {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Terminated)?
    }

    /// Reports how far (in view units) the viewport is from the bottom.
    pub async fn scrolled(&self, distance_from_bottom: f64) -> Result<(), SessionError> {
        self.command(SessionCommand::Scrolled(distance_from_bottom))
            .await
    }

    pub async fn scroll_to_bottom(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::ScrollToBottom).await
    }

    pub async fn retry_history(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::RetryHistory).await
    }

    /// Unmounts the session and waits for the teardown to finish.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.command(SessionCommand::Shutdown(ack)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.events.subscribe())
    }
}

struct SessionDriver {
    settings: ClientSettings,
    backend: Arc<dyn BackendApi>,
    connector: Arc<dyn ChannelConnector>,
    credentials: SessionCredentials,
    commands: mpsc::Receiver<SessionCommand>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    local_id: Option<UserId>,
    phase: SessionPhase,
    peer: Option<Peer>,
    /// Bumped on every peer change; async results carry the value they were
    /// started under and are dropped on mismatch.
    generation: u64,
    transcript: Transcript,
    presence: PresenceState,
    channel: Option<ChannelResource>,
    typing: TypingDebouncer,
    deliveries: VecDeque<(Instant, u64)>,
    identity_task: Option<JoinHandle<()>>,
    history_task: Option<JoinHandle<()>>,
}

async fn next_channel_event(channel: &mut Option<ChannelResource>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    async fn run(mut self) {
        self.spawn_identity_resolution();
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown(ack)) => {
                        self.terminate().await;
                        let _ = ack.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("all session handles dropped");
                        self.terminate().await;
                        return;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                event = next_channel_event(&mut self.channel) => self.handle_channel_event(event),
                _ = sleep_until_opt(self.typing.deadline()) => self.on_typing_idle().await,
                _ = sleep_until_opt(self.deliveries.front().map(|(at, _)| *at)) => self.on_delivery_due(),
            }
            self.publish();
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            phase: self.phase.clone(),
            local_id: self.local_id,
            channel: self
                .channel
                .as_ref()
                .map_or(ChannelStatus::Idle, ChannelResource::status),
            channel_error: self
                .channel
                .as_ref()
                .and_then(|channel| channel.last_error().cloned()),
            peer: self.peer.clone(),
            presence: self.presence,
            messages: self.transcript.messages().to_vec(),
            scroll: self.transcript.scroll(),
        };
        self.snapshot.send_replace(snapshot);
    }

    fn spawn_identity_resolution(&mut self) {
        let backend = Arc::clone(&self.backend);
        let username = self.credentials.username.clone();
        let tx = self.internal_tx.clone();
        self.identity_task = Some(tokio::spawn(async move {
            let result = resolve_identity(backend.as_ref(), &username).await;
            let _ = tx.send(Internal::IdentityResolved(result));
        }));
    }

    fn spawn_history_load(&mut self) {
        let (Some(local_id), Some(peer)) = (self.local_id, self.peer.clone()) else {
            return;
        };
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        self.phase = SessionPhase::LoadingHistory;

        let generation = self.generation;
        let backend = Arc::clone(&self.backend);
        let tx = self.internal_tx.clone();
        debug!(generation, peer_id = peer.id.0, "history load started");
        self.history_task = Some(tokio::spawn(async move {
            let result = load_history(backend.as_ref(), local_id, &peer).await;
            let _ = tx.send(Internal::HistoryLoaded {
                generation,
                peer_id: peer.id,
                result,
            });
        }));
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectPeer(peer) => {
                if self.peer.as_ref().map(|current| current.id) != Some(peer.id) {
                    self.switch_peer(Some(peer));
                }
            }
            SessionCommand::ClearPeer => self.switch_peer(None),
            SessionCommand::InputChanged(text) => {
                let Some(peer_id) = self.peer.as_ref().map(|peer| peer.id) else {
                    return;
                };
                let is_typing = self.typing.on_input(&text, Instant::now());
                self.send_typing(peer_id, is_typing).await;
            }
            SessionCommand::SendMessage { text, reply } => {
                let result = self.send_chat(text).await;
                let _ = reply.send(result);
            }
            SessionCommand::Scrolled(distance) => self.transcript.on_scroll(distance),
            SessionCommand::ScrollToBottom => self.transcript.scroll_to_bottom(),
            SessionCommand::RetryHistory => {
                if matches!(self.phase, SessionPhase::HistoryFailed(_)) {
                    self.spawn_history_load();
                }
            }
            SessionCommand::Shutdown(_) => {}
        }
    }

    /// Scopes everything peer-bound to the new selection. The live channel is
    /// kept: frames are addressed per message.
    fn switch_peer(&mut self, peer: Option<Peer>) {
        self.generation += 1;
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        self.typing.cancel();
        self.deliveries.clear();
        self.presence = PresenceState::default();
        self.transcript
            .reset(self.generation, peer.as_ref().map(|peer| peer.id));
        info!(
            generation = self.generation,
            peer_id = peer.as_ref().map(|peer| peer.id.0),
            "peer selection changed"
        );
        self.peer = peer;

        if self.local_id.is_none() {
            return;
        }
        if self.peer.is_some() {
            self.spawn_history_load();
        } else {
            self.phase = SessionPhase::AwaitingPeer;
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::IdentityResolved(result) => {
                self.identity_task = None;
                match result {
                    Ok(local_id) => {
                        self.local_id = Some(local_id);
                        self.emit(SessionEvent::IdentityResolved(local_id));
                        let channel = ChannelResource::open(
                            Arc::clone(&self.connector),
                            self.credentials.token.clone(),
                            self.settings.reconnect_delay,
                        );
                        self.emit(SessionEvent::ChannelStatusChanged(channel.status()));
                        self.channel = Some(channel);
                        if self.peer.is_some() {
                            self.spawn_history_load();
                        } else {
                            self.phase = SessionPhase::AwaitingPeer;
                        }
                    }
                    Err(error) => {
                        self.phase = SessionPhase::IdentityFailed(error.clone());
                        self.emit(SessionEvent::IdentityFailed(error));
                    }
                }
            }
            Internal::HistoryLoaded {
                generation,
                peer_id,
                result,
            } => {
                if generation != self.generation {
                    debug!(
                        generation,
                        current = self.generation,
                        "dropping history result for a previous selection"
                    );
                    return;
                }
                self.history_task = None;
                match result {
                    Ok(messages) => {
                        let count = messages.len();
                        match self.transcript.apply_snapshot(generation, peer_id, messages) {
                            SnapshotOutcome::Applied { replayed } => {
                                debug!(count, replayed, "history snapshot applied");
                                self.phase = SessionPhase::Ready;
                                self.emit(SessionEvent::HistoryLoaded { peer_id, count });
                                self.emit_revealed(replayed);
                                self.emit(SessionEvent::ScrollToBottom);
                            }
                            SnapshotOutcome::Stale | SnapshotOutcome::AlreadyApplied => {}
                        }
                    }
                    Err(error) => {
                        let flushed = self.transcript.history_failed(generation, peer_id);
                        self.phase = SessionPhase::HistoryFailed(error.clone());
                        self.emit(SessionEvent::HistoryFailed { peer_id, error });
                        self.emit_revealed(flushed);
                    }
                }
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        if let ChannelEvent::Frame(text) = event {
            self.on_frame(&text);
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if let Some(status) = channel.apply(event) {
            self.emit(SessionEvent::ChannelStatusChanged(status));
        }
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                return;
            }
        };
        let (Some(peer), Some(local_id)) = (self.peer.as_ref(), self.local_id) else {
            return;
        };

        match classify_frame(&frame, peer, local_id) {
            FrameDisposition::Presence { online } => {
                self.presence.online = online;
                self.emit(SessionEvent::PresenceChanged(self.presence));
            }
            FrameDisposition::Typing { is_typing } => {
                self.presence.typing = is_typing;
                self.emit(SessionEvent::PresenceChanged(self.presence));
            }
            FrameDisposition::Append(message) => {
                self.append(message);
            }
            FrameDisposition::Dropped => {
                debug!(?frame, "frame not addressed to the current conversation");
            }
        }
    }

    fn append(&mut self, message: Message) -> u64 {
        let outcome = self.transcript.append(message);
        if let AppendOutcome::Shown { scroll, .. } = outcome {
            self.emit_revealed(1);
            if scroll == ScrollAction::ScrollToBottom {
                self.emit(SessionEvent::ScrollToBottom);
            }
        }
        outcome.seq()
    }

    /// Announces the last `count` messages, which just became visible.
    fn emit_revealed(&self, count: usize) {
        let messages = self.transcript.messages();
        for message in &messages[messages.len().saturating_sub(count)..] {
            self.emit(SessionEvent::MessageAppended(message.clone()));
        }
    }

    fn channel_is_open(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.status() == ChannelStatus::Open)
    }

    async fn channel_send(&mut self, frame: OutboundFrame) -> Result<(), SessionError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::SendRejected(SendRejection::ChannelNotOpen));
        };
        let result = channel.send(&frame).await;
        if let Err(SessionError::ChannelDropped(_)) = &result {
            let status = channel.status();
            self.emit(SessionEvent::ChannelStatusChanged(status));
        }
        result
    }

    /// Typing frames are best effort: dropped unless the channel is open.
    async fn send_typing(&mut self, receiver: UserId, is_typing: bool) {
        if !self.channel_is_open() {
            return;
        }
        if let Err(err) = self
            .channel_send(OutboundFrame::typing(receiver, is_typing))
            .await
        {
            debug!(error = %err, "typing frame not sent");
        }
    }

    async fn send_chat(&mut self, text: String) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::SendRejected(SendRejection::EmptyText));
        }
        let Some(peer_id) = self.peer.as_ref().map(|peer| peer.id) else {
            return Err(SessionError::SendRejected(SendRejection::NoPeerSelected));
        };
        if self.local_id.is_none() {
            return Err(SessionError::SendRejected(SendRejection::IdentityUnresolved));
        }
        if !self.channel_is_open() {
            return Err(SessionError::SendRejected(SendRejection::ChannelNotOpen));
        }

        self.typing.cancel();
        self.channel_send(OutboundFrame::typing(peer_id, false))
            .await?;
        self.channel_send(OutboundFrame::chat(peer_id, text.clone()))
            .await?;

        let seq = self.append(Message::outgoing(
            text,
            now_display_time(),
            DeliveryStatus::Sent,
        ));
        self.deliveries
            .push_back((Instant::now() + self.settings.delivery_delay, seq));
        Ok(())
    }

    async fn on_typing_idle(&mut self) {
        if !self.typing.on_deadline(Instant::now()) {
            return;
        }
        if let Some(peer_id) = self.peer.as_ref().map(|peer| peer.id) {
            self.send_typing(peer_id, false).await;
        }
    }

    fn on_delivery_due(&mut self) {
        let now = Instant::now();
        while let Some(&(at, seq)) = self.deliveries.front() {
            if at > now {
                break;
            }
            self.deliveries.pop_front();
            if self.transcript.mark_delivered(seq) {
                self.emit(SessionEvent::MessageDelivered { seq });
            }
        }
    }

    async fn terminate(&mut self) {
        if let Some(task) = self.identity_task.take() {
            task.abort();
        }
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        self.typing.cancel();
        self.deliveries.clear();
        if let Some(channel) = self.channel.as_mut() {
            channel.terminate().await;
            self.emit(SessionEvent::ChannelStatusChanged(ChannelStatus::Terminated));
        }
        self.phase = SessionPhase::Terminated;
        self.emit(SessionEvent::Terminated);
        self.publish();
        info!(username = %self.credentials.username, "chat session terminated");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
