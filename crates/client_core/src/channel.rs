//! Live channel: the session's single real-time connection, its reconnect
//! state machine, and inbound frame classification.

use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{Peer, UserId},
    protocol::{InboundFrame, OutboundFrame},
};
use tokio::{
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    connector::{ChannelConnection, ChannelConnector},
    error::{SendRejection, SessionError},
    history::now_display_time,
    transcript::{DeliveryStatus, Message},
};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Identity not resolved yet; no connection has been attempted.
    Idle,
    Connecting,
    Open,
    ReconnectPending,
    Terminated,
}

impl ChannelStatus {
    pub fn is_reconnecting(self) -> bool {
        self == ChannelStatus::ReconnectPending
    }
}

/// Presence of the current peer only. Each relevant frame overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceState {
    pub online: bool,
    pub typing: bool,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            online: true,
            typing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDisposition {
    Presence { online: bool },
    Typing { is_typing: bool },
    Append(Message),
    Dropped,
}

/// First matching rule wins: presence of the peer, typing from the peer,
/// chat to or from the peer. Everything else is dropped.
pub fn classify_frame(frame: &InboundFrame, peer: &Peer, local_id: UserId) -> FrameDisposition {
    match frame {
        InboundFrame::Presence { user_id, status } if *user_id == peer.id => {
            FrameDisposition::Presence {
                online: status.is_online(),
            }
        }
        InboundFrame::Typing {
            sender_id,
            is_typing,
        } if *sender_id == peer.id => FrameDisposition::Typing {
            is_typing: *is_typing,
        },
        InboundFrame::Chat {
            sender_id,
            receiver_id,
            text,
        } if *sender_id == Some(peer.id) || *receiver_id == Some(peer.id) => {
            FrameDisposition::Append(Message::from_sender(
                *sender_id,
                local_id,
                &peer.username,
                text.clone(),
                now_display_time(),
                DeliveryStatus::Sent,
            ))
        }
        _ => FrameDisposition::Dropped,
    }
}

pub enum ChannelEvent {
    Connected(ChannelConnection),
    HandshakeFailed(anyhow::Error),
    Frame(String),
    Dropped(anyhow::Error),
    ReconnectDue,
}

/// Owns the connection and every timer attached to it. Dropping the resource
/// aborts an in-flight handshake and closes the socket.
pub struct ChannelResource {
    connector: Arc<dyn ChannelConnector>,
    token: String,
    reconnect_delay: Duration,
    status: ChannelStatus,
    attempt: u64,
    connect_task: Option<JoinHandle<anyhow::Result<ChannelConnection>>>,
    connection: Option<ChannelConnection>,
    reconnect_at: Option<Instant>,
    last_error: Option<SessionError>,
}

impl ChannelResource {
    /// Creates the resource and issues the first connection attempt.
    pub fn open(
        connector: Arc<dyn ChannelConnector>,
        token: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let mut resource = Self {
            connector,
            token: token.into(),
            reconnect_delay,
            status: ChannelStatus::Idle,
            attempt: 0,
            connect_task: None,
            connection: None,
            reconnect_at: None,
            last_error: None,
        };
        resource.begin_connect();
        resource
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn attempts(&self) -> u64 {
        self.attempt
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Why the channel last left `Open` (or never reached it).
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    fn begin_connect(&mut self) {
        self.attempt += 1;
        self.status = ChannelStatus::Connecting;
        self.reconnect_at = None;
        info!(attempt = self.attempt, "live channel connecting");

        let connector = Arc::clone(&self.connector);
        let token = self.token.clone();
        self.connect_task = Some(tokio::spawn(
            async move { connector.connect(&token).await },
        ));
    }

    fn schedule_reconnect(&mut self, failure: SessionError) {
        self.connection = None;
        self.connect_task = None;
        self.status = ChannelStatus::ReconnectPending;
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        warn!(
            attempt = self.attempt,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            error = %failure,
            "live channel closed; reconnect scheduled"
        );
        self.last_error = Some(failure);
    }

    /// Waits for whatever the current state can produce. Cancel safe; never
    /// resolves once terminated.
    pub async fn next_event(&mut self) -> ChannelEvent {
        match self.status {
            ChannelStatus::Connecting => {
                let Some(task) = self.connect_task.as_mut() else {
                    return std::future::pending().await;
                };
                match task.await {
                    Ok(Ok(connection)) => ChannelEvent::Connected(connection),
                    Ok(Err(err)) => ChannelEvent::HandshakeFailed(err),
                    Err(join_err) => {
                        ChannelEvent::HandshakeFailed(anyhow!("connect task failed: {join_err}"))
                    }
                }
            }
            ChannelStatus::Open => {
                let Some(connection) = self.connection.as_mut() else {
                    return std::future::pending().await;
                };
                match connection.stream.next().await {
                    Some(Ok(text)) => ChannelEvent::Frame(text),
                    Some(Err(err)) => ChannelEvent::Dropped(err),
                    None => ChannelEvent::Dropped(anyhow!("channel stream ended")),
                }
            }
            ChannelStatus::ReconnectPending => match self.reconnect_at {
                Some(at) => {
                    sleep_until(at).await;
                    ChannelEvent::ReconnectDue
                }
                None => std::future::pending().await,
            },
            ChannelStatus::Idle | ChannelStatus::Terminated => std::future::pending().await,
        }
    }

    /// Applies a state transition and returns the new status. Frames are
    /// not transitions.
    pub fn apply(&mut self, event: ChannelEvent) -> Option<ChannelStatus> {
        if self.status == ChannelStatus::Terminated {
            return None;
        }
        match event {
            ChannelEvent::Connected(connection) => {
                self.connect_task = None;
                self.connection = Some(connection);
                self.status = ChannelStatus::Open;
                self.last_error = None;
                info!(attempt = self.attempt, "live channel open");
            }
            ChannelEvent::HandshakeFailed(err) => {
                self.schedule_reconnect(SessionError::ChannelHandshakeFailed(format!("{err:#}")));
            }
            ChannelEvent::Dropped(err) => {
                self.schedule_reconnect(SessionError::ChannelDropped(format!("{err:#}")));
            }
            ChannelEvent::ReconnectDue => self.begin_connect(),
            ChannelEvent::Frame(_) => return None,
        }
        Some(self.status)
    }

    /// Writes one frame. A write failure force-closes the connection and
    /// takes the normal reconnect path.
    pub async fn send(&mut self, frame: &OutboundFrame) -> Result<(), SessionError> {
        if self.status != ChannelStatus::Open {
            return Err(SessionError::SendRejected(SendRejection::ChannelNotOpen));
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(SessionError::SendRejected(SendRejection::ChannelNotOpen));
        };
        let encoded = frame
            .encode()
            .map_err(|err| SessionError::ChannelDropped(format!("frame encoding failed: {err}")))?;
        if let Err(err) = connection.sink.send(encoded).await {
            let failure = SessionError::ChannelDropped(format!("{err:#}"));
            self.schedule_reconnect(failure.clone());
            return Err(failure);
        }
        Ok(())
    }

    /// Leaves the state machine before closing, so the close can never
    /// schedule a reconnect; any pending timer or handshake is cancelled.
    pub async fn terminate(&mut self) {
        if self.status == ChannelStatus::Terminated {
            return;
        }
        self.status = ChannelStatus::Terminated;
        self.reconnect_at = None;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(mut connection) = self.connection.take() {
            if tokio::time::timeout(CLOSE_GRACE, connection.sink.close())
                .await
                .is_err()
            {
                debug!("live channel close timed out");
            }
        }
        info!(attempts = self.attempt, "live channel terminated");
    }
}

impl Drop for ChannelResource {
    fn drop(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
