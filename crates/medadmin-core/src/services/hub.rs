//! Push channels over a JSON hub protocol (SignalR JSON, WebSockets transport).
//!
//! Records are JSON objects terminated by `0x1E`. A connection starts with a
//! handshake record and then carries invocations (`type` 1), pings (6) and
//! close messages (7). Negotiation is skipped; the token travels in the
//! `access_token` query parameter.
//!
//! The connection owns reconnection: after a drop it retries with the delays
//! in `RECONNECT_DELAYS` and reports each step as a `ConnectionStatus` event
//! on the same stream the store consumes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::{ChatChannel, NotificationChannel, ServiceResult};
use crate::auth::AuthContext;
use crate::constants::{hub_targets, RECONNECT_DELAYS};
use crate::error::SyncError;
use crate::events::{ChatEvent, NotificationEvent};
use crate::models::{ChatMessage, ConnectionStatus, NotificationDraft};

const RECORD_SEPARATOR: char = '\u{1e}';
const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";
const PING_RECORD: &str = "{\"type\":6}\u{1e}";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HubFrame {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String> },
    /// Completions, stream items and anything else a client without
    /// outstanding invocations can ignore
    Other,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: Option<u8>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

pub(crate) fn parse_record(record: &str) -> ServiceResult<HubFrame> {
    let raw: RawRecord = serde_json::from_str(record)?;
    Ok(match raw.kind {
        Some(1) => match raw.target {
            Some(target) => HubFrame::Invocation {
                target,
                arguments: raw.arguments,
            },
            None => return Err(SyncError::Decode("invocation without target".to_string())),
        },
        Some(6) => HubFrame::Ping,
        Some(7) => HubFrame::Close { error: raw.error },
        _ => HubFrame::Other,
    })
}

fn invocation_record(target: &str, arguments: Vec<Value>) -> String {
    let mut record = json!({ "type": 1, "target": target, "arguments": arguments }).to_string();
    record.push(RECORD_SEPARATOR);
    record
}

/// Maps hub invocations onto a channel's event enum.
pub trait HubEvent: Send + 'static {
    fn from_invocation(target: &str, arguments: &[Value]) -> Option<Self>
    where
        Self: Sized;

    fn connection_status(status: ConnectionStatus) -> Self
    where
        Self: Sized;
}

fn first_arg<T: serde::de::DeserializeOwned>(arguments: &[Value]) -> Option<T> {
    arguments
        .first()
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

impl HubEvent for NotificationEvent {
    fn from_invocation(target: &str, arguments: &[Value]) -> Option<Self> {
        match target {
            hub_targets::RECEIVE_NOTIFICATION => {
                first_arg::<NotificationDraft>(arguments).map(NotificationEvent::NotificationAdded)
            }
            hub_targets::UNREAD_COUNT_CHANGED => first_arg::<u64>(arguments)
                .map(|count| NotificationEvent::UnreadCountChanged(count as usize)),
            _ => None,
        }
    }

    fn connection_status(status: ConnectionStatus) -> Self {
        NotificationEvent::ConnectionStatus(status)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: i64,
    user_id: String,
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadPayload {
    conversation_id: i64,
    user_id: String,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
}

impl HubEvent for ChatEvent {
    fn from_invocation(target: &str, arguments: &[Value]) -> Option<Self> {
        match target {
            hub_targets::RECEIVE_MESSAGE => first_arg::<ChatMessage>(arguments).map(ChatEvent::Message),
            hub_targets::USER_TYPING => {
                // Either one payload object or positional (conversationId, userId, isTyping)
                let payload = first_arg::<TypingPayload>(arguments).or_else(|| {
                    Some(TypingPayload {
                        conversation_id: arguments.first()?.as_i64()?,
                        user_id: arguments.get(1)?.as_str()?.to_string(),
                        is_typing: arguments.get(2)?.as_bool()?,
                    })
                })?;
                Some(ChatEvent::Typing {
                    conversation_id: payload.conversation_id,
                    user_id: payload.user_id,
                    is_typing: payload.is_typing,
                })
            }
            hub_targets::MESSAGES_READ => {
                let payload = first_arg::<ReadPayload>(arguments)?;
                Some(ChatEvent::MessagesRead {
                    conversation_id: payload.conversation_id,
                    reader_id: payload.user_id,
                    read_at: payload.read_at,
                })
            }
            _ => None,
        }
    }

    fn connection_status(status: ConnectionStatus) -> Self {
        ChatEvent::ConnectionStatus(status)
    }
}

/// Where and how to (re)open the socket.
#[derive(Clone)]
struct Endpoint {
    url: String,
    auth: Arc<dyn AuthContext>,
}

impl Endpoint {
    fn address(&self) -> ServiceResult<String> {
        let token = self.auth.token().ok_or(SyncError::MissingToken)?;
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| SyncError::InvalidInput(format!("hub url {}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair("access_token", &token);
        Ok(url.into())
    }

    /// Connects and completes the handshake. Records the server sent in the
    /// same frame as its handshake reply are returned for dispatch.
    async fn open(&self) -> ServiceResult<(WsStream, Vec<String>)> {
        let address = self.address()?;
        let (mut ws, _) = connect_async(address.as_str()).await?;
        ws.send(Message::Text(HANDSHAKE.to_string())).await?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let mut records = split_records(&text);
                    let reply: RawRecord = serde_json::from_str(records.next().unwrap_or("{}"))?;
                    if let Some(error) = reply.error {
                        return Err(SyncError::Channel(format!("handshake rejected: {}", error)));
                    }
                    let pending = records.map(str::to_string).collect();
                    return Ok((ws, pending));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::Channel("closed during handshake".to_string()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

enum PumpOutcome {
    Shutdown,
    Lost(String),
}

/// Shared state of a running connection task.
struct Link<E> {
    endpoint: Endpoint,
    max_reconnect_attempts: u32,
    events: UnboundedSender<E>,
    replay: Arc<Mutex<BTreeMap<String, String>>>,
}

impl<E: HubEvent> Link<E> {
    fn emit(&self, status: ConnectionStatus) -> bool {
        self.events.send(E::connection_status(status)).is_ok()
    }

    async fn run(
        self,
        mut ws: WsStream,
        mut pending: Vec<String>,
        mut outbound: UnboundedReceiver<String>,
    ) {
        loop {
            let outcome = match pending.iter().find_map(|record| self.dispatch(record)) {
                Some(outcome) => outcome,
                None => self.pump(&mut ws, &mut outbound).await,
            };
            match outcome {
                PumpOutcome::Shutdown => {
                    let _ = ws.close(None).await;
                    debug!(url = %self.endpoint.url, "hub connection closed");
                    return;
                }
                PumpOutcome::Lost(reason) => {
                    warn!(url = %self.endpoint.url, %reason, "hub connection lost");
                }
            }

            match self.reconnect(&mut outbound).await {
                Some((new_ws, new_pending)) => {
                    ws = new_ws;
                    pending = new_pending;
                }
                None => return,
            }
        }
    }

    async fn pump(
        &self,
        ws: &mut WsStream,
        outbound: &mut UnboundedReceiver<String>,
    ) -> PumpOutcome {
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.tick().await;

        loop {
            tokio::select! {
                record = outbound.recv() => match record {
                    Some(record) => {
                        if let Err(e) = ws.send(Message::Text(record)).await {
                            return PumpOutcome::Lost(e.to_string());
                        }
                    }
                    None => return PumpOutcome::Shutdown,
                },
                _ = keep_alive.tick() => {
                    if let Err(e) = ws.send(Message::Text(PING_RECORD.to_string())).await {
                        return PumpOutcome::Lost(e.to_string());
                    }
                }
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(outcome) = self.dispatch(&text) {
                            return outcome;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpOutcome::Lost("socket closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
                }
            }
        }
    }

    fn dispatch(&self, text: &str) -> Option<PumpOutcome> {
        for record in split_records(text) {
            match parse_record(record) {
                Ok(HubFrame::Invocation { target, arguments }) => {
                    match E::from_invocation(&target, &arguments) {
                        Some(event) => {
                            if self.events.send(event).is_err() {
                                return Some(PumpOutcome::Shutdown);
                            }
                        }
                        None => trace!(%target, "ignoring hub invocation"),
                    }
                }
                Ok(HubFrame::Close { error }) => {
                    return Some(PumpOutcome::Lost(
                        error.unwrap_or_else(|| "server closed the connection".to_string()),
                    ));
                }
                Ok(HubFrame::Ping) | Ok(HubFrame::Other) => {}
                Err(e) => warn!(error = %e, "undecodable hub record"),
            }
        }
        None
    }

    /// Returns the new socket and any records that came with the handshake
    /// reply, or `None` when attempts ran out or the owner shut down.
    async fn reconnect(
        &self,
        outbound: &mut UnboundedReceiver<String>,
    ) -> Option<(WsStream, Vec<String>)> {
        for attempt in 1..=self.max_reconnect_attempts {
            if !self.emit(ConnectionStatus::reconnecting(attempt)) {
                return None;
            }

            let index = (attempt as usize - 1).min(RECONNECT_DELAYS.len() - 1);
            let delay = tokio::time::sleep(RECONNECT_DELAYS[index]);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    record = outbound.recv() => match record {
                        Some(_) => debug!("dropping outbound hub call while reconnecting"),
                        None => return None,
                    },
                }
            }

            match self.endpoint.open().await {
                Ok((mut ws, pending)) => {
                    let replay: Vec<String> = self.replay.lock().values().cloned().collect();
                    for record in replay {
                        if let Err(e) = ws.send(Message::Text(record)).await {
                            warn!(error = %e, "failed to replay subscription");
                        }
                    }
                    info!(url = %self.endpoint.url, attempt, "hub reconnected");
                    self.emit(ConnectionStatus::connected());
                    return Some((ws, pending));
                }
                Err(e) => warn!(url = %self.endpoint.url, attempt, error = %e, "hub reconnect failed"),
            }
        }

        self.emit(ConnectionStatus::disconnected());
        None
    }
}

/// One hub connection with an explicit start/stop lifecycle.
pub struct HubConnection {
    endpoint: Endpoint,
    max_reconnect_attempts: u32,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Invocations re-sent after every reconnect, keyed for removal
    replay: Arc<Mutex<BTreeMap<String, String>>>,
}

impl HubConnection {
    pub fn new(
        url: impl Into<String>,
        auth: Arc<dyn AuthContext>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            endpoint: Endpoint {
                url: url.into(),
                auth,
            },
            max_reconnect_attempts,
            outbound: Mutex::new(None),
            task: Mutex::new(None),
            replay: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Open the socket, complete the handshake and start the receive loop.
    /// A previous connection is shut down first.
    pub async fn start<E: HubEvent>(&self) -> ServiceResult<UnboundedReceiver<E>> {
        self.stop().await;

        let (ws, pending) = self.endpoint.open().await?;
        info!(url = %self.endpoint.url, "hub connected");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(E::connection_status(ConnectionStatus::connected()));

        let link = Link {
            endpoint: self.endpoint.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            events: event_tx,
            replay: self.replay.clone(),
        };
        let task = tokio::spawn(link.run(ws, pending, outbound_rx));

        *self.outbound.lock() = Some(outbound_tx);
        *self.task.lock() = Some(task);
        Ok(event_rx)
    }

    /// Close the socket. Safe to call when not running.
    pub async fn stop(&self) {
        self.outbound.lock().take();
        self.replay.lock().clear();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(STOP_GRACE_PERIOD, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    pub fn invoke(&self, target: &str, arguments: Vec<Value>) -> ServiceResult<()> {
        let record = invocation_record(target, arguments);
        let guard = self.outbound.lock();
        let sender = guard.as_ref().ok_or(SyncError::NotConnected)?;
        sender.send(record).map_err(|_| SyncError::NotConnected)
    }

    /// Invoke now and again after each reconnect until `forget` is called.
    pub fn invoke_sticky(&self, key: &str, target: &str, arguments: Vec<Value>) -> ServiceResult<()> {
        self.invoke(target, arguments.clone())?;
        self.replay
            .lock()
            .insert(key.to_string(), invocation_record(target, arguments));
        Ok(())
    }

    pub fn forget(&self, key: &str) {
        self.replay.lock().remove(key);
    }
}

pub struct NotificationHub {
    connection: HubConnection,
}

impl NotificationHub {
    pub fn new(url: impl Into<String>, auth: Arc<dyn AuthContext>, max_reconnect_attempts: u32) -> Self {
        Self {
            connection: HubConnection::new(url, auth, max_reconnect_attempts),
        }
    }
}

#[async_trait]
impl NotificationChannel for NotificationHub {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<NotificationEvent>> {
        self.connection.start::<NotificationEvent>().await
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        self.connection.stop().await;
        Ok(())
    }
}

pub struct ChatHub {
    connection: HubConnection,
}

impl ChatHub {
    pub fn new(url: impl Into<String>, auth: Arc<dyn AuthContext>, max_reconnect_attempts: u32) -> Self {
        Self {
            connection: HubConnection::new(url, auth, max_reconnect_attempts),
        }
    }

    fn membership_key(conversation_id: i64) -> String {
        format!("join:{}", conversation_id)
    }
}

#[async_trait]
impl ChatChannel for ChatHub {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<ChatEvent>> {
        self.connection.start::<ChatEvent>().await
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        self.connection.stop().await;
        Ok(())
    }

    async fn join_conversation(&self, conversation_id: i64) -> ServiceResult<()> {
        self.connection.invoke_sticky(
            &Self::membership_key(conversation_id),
            hub_targets::JOIN_CONVERSATION,
            vec![json!(conversation_id)],
        )
    }

    async fn leave_conversation(&self, conversation_id: i64) -> ServiceResult<()> {
        self.connection.forget(&Self::membership_key(conversation_id));
        self.connection
            .invoke(hub_targets::LEAVE_CONVERSATION, vec![json!(conversation_id)])
    }

    async fn send_typing_indicator(&self, conversation_id: i64, is_typing: bool) -> ServiceResult<()> {
        self.connection.invoke(
            hub_targets::SEND_TYPING_INDICATOR,
            vec![json!(conversation_id), json!(is_typing)],
        )
    }
}
