//! In-process fakes for the backend and the live channel transport.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{channel::mpsc as fmpsc, SinkExt, StreamExt};
use serde_json::Value;
use shared::{
    domain::{Peer, UserId},
    protocol::{HistoryRecord, RegisterRequest, TokenResponse, UserSummary},
};
use tokio::sync::mpsc;

use crate::{
    api::BackendApi,
    config::ClientSettings,
    connector::{ChannelConnection, ChannelConnector},
};

pub(crate) fn user(id: i64, username: &str) -> UserSummary {
    UserSummary {
        id: UserId(id),
        username: username.to_string(),
    }
}

pub(crate) fn peer(id: i64, username: &str) -> Peer {
    Peer::new(UserId(id), username)
}

pub(crate) fn record(sender: i64, receiver: i64, content: &str, timestamp: &str) -> HistoryRecord {
    HistoryRecord {
        sender_id: UserId(sender),
        receiver_id: Some(UserId(receiver)),
        content: content.to_string(),
        timestamp: timestamp.to_string(),
    }
}

/// Short timers so state-machine tests finish quickly.
pub(crate) fn fast_settings() -> ClientSettings {
    ClientSettings {
        reconnect_delay: Duration::from_millis(100),
        typing_idle: Duration::from_millis(150),
        delivery_delay: Duration::from_millis(80),
        ..ClientSettings::default()
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    users: Mutex<Vec<UserSummary>>,
    chat_users: Mutex<Vec<UserSummary>>,
    history: Mutex<HashMap<(i64, i64), Vec<HistoryRecord>>>,
    history_delays: Mutex<HashMap<i64, Duration>>,
    fail_with: Mutex<Option<String>>,
    history_fail_with: Mutex<Option<String>>,
    unhealthy: AtomicBool,
    lookups: Mutex<Vec<String>>,
    history_calls: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn with_users(users: Vec<UserSummary>) -> Self {
        let backend = Self::default();
        *backend.users.lock().unwrap() = users;
        backend
    }

    pub(crate) fn set_chat_users(&self, users: Vec<UserSummary>) {
        *self.chat_users.lock().unwrap() = users;
    }

    pub(crate) fn set_history(&self, user: i64, contact: i64, records: Vec<HistoryRecord>) {
        self.history.lock().unwrap().insert((user, contact), records);
    }

    pub(crate) fn delay_history(&self, contact: i64, delay: Duration) {
        self.history_delays.lock().unwrap().insert(contact, delay);
    }

    pub(crate) fn fail_all(&self, err: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(err.into());
    }

    pub(crate) fn fail_history(&self, err: Option<&str>) {
        *self.history_fail_with.lock().unwrap() = err.map(str::to_string);
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub(crate) fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub(crate) fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn list_all_users(&self, filter: &str) -> Result<Vec<UserSummary>> {
        self.check()?;
        self.lookups.lock().unwrap().push(filter.to_string());
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|user| user.username != filter)
            .cloned()
            .collect())
    }

    async fn list_chat_users(&self, _username: &str) -> Result<Vec<UserSummary>> {
        self.check()?;
        Ok(self.chat_users.lock().unwrap().clone())
    }

    async fn fetch_history(
        &self,
        user_id: UserId,
        contact_id: UserId,
    ) -> Result<Vec<HistoryRecord>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .history_delays
            .lock()
            .unwrap()
            .get(&contact_id.0)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        if let Some(err) = self.history_fail_with.lock().unwrap().clone() {
            return Err(anyhow!(err));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&(user_id.0, contact_id.0))
            .cloned()
            .unwrap_or_default())
    }

    async fn login(&self, username: &str, _password: &str) -> Result<TokenResponse> {
        self.check()?;
        Ok(TokenResponse {
            access_token: format!("token-{username}"),
            token_type: Some("bearer".into()),
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<UserSummary> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let created = user(users.len() as i64 + 1, &request.username);
        users.push(created.clone());
        Ok(created)
    }

    async fn health(&self) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(anyhow!("health endpoint unreachable"));
        }
        Ok(())
    }
}

/// Server half of one fake connection.
pub(crate) struct FakeServerEnd {
    pub(crate) token: String,
    inbound: fmpsc::UnboundedSender<Result<String>>,
    outbound: fmpsc::UnboundedReceiver<String>,
}

impl FakeServerEnd {
    pub(crate) fn push(&self, frame: Value) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    pub(crate) fn push_raw(&self, frame: &str) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    /// Simulates the server dropping the connection.
    pub(crate) fn close(self) {
        let _ = self
            .inbound
            .unbounded_send(Err(anyhow!("connection reset by peer")));
    }

    pub(crate) async fn next_frame(&mut self) -> Option<Value> {
        let text = tokio::time::timeout(Duration::from_secs(2), self.outbound.next())
            .await
            .ok()??;
        serde_json::from_str(&text).ok()
    }

    /// Frames already written by the client, without waiting.
    pub(crate) fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                frames.push(value);
            }
        }
        frames
    }

    pub(crate) async fn closed_by_client(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.outbound.next().await.is_some() {}
            })
            .await,
            Ok(())
        )
    }
}

pub(crate) struct FakeConnector {
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    accepted: mpsc::UnboundedSender<FakeServerEnd>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            connect_delay: Mutex::new(None),
            accepted,
        });
        (connector, rx)
    }

    pub(crate) fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub(crate) fn delay_connect(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self, token: &str) -> Result<ChannelConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("handshake refused"));
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<String>>();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded::<String>();
        self.accepted
            .send(FakeServerEnd {
                token: token.to_string(),
                inbound: inbound_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| anyhow!("test dropped the server side"))?;

        Ok(ChannelConnection {
            sink: Box::pin(outbound_tx.sink_map_err(anyhow::Error::from)),
            stream: Box::pin(inbound_rx),
        })
    }
}
