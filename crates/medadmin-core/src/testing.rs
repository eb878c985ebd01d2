//! In-memory collaborators shared by the store and command tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::{ChatEvent, NotificationEvent};
use crate::models::{
    ChatConversation, ChatMessage, MessagePage, MessageType, Notification, NotificationDraft,
    NotificationKind, StatisticsSnapshot, VoiceClip,
};
use crate::services::{
    ChatApi, ChatChannel, NotificationApi, NotificationChannel, ServiceResult, StatisticsService,
    ToastSink,
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Minutes after `base_time`, for readable message timestamps.
pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::minutes(minutes)
}

// ===== Clock =====

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(base_time()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ===== Statistics =====

pub fn sample_statistics(n: u64) -> StatisticsSnapshot {
    let mut snapshot = StatisticsSnapshot {
        total_users: n * 10,
        active_users: n * 8,
        inactive_users: n * 2,
        total_roles: 3,
        total_departments: n,
        ..Default::default()
    };
    snapshot.users_by_role.insert("admin".to_string(), n);
    snapshot.users_by_role.insert("doctor".to_string(), n * 9);
    snapshot
        .users_by_department
        .insert("Cardiology".to_string(), n * 10);
    snapshot
}

pub struct MockStatisticsService {
    calls: AtomicUsize,
    result: Mutex<ServiceResult<StatisticsSnapshot>>,
    gate: Semaphore,
}

impl MockStatisticsService {
    pub fn returning(result: ServiceResult<StatisticsSnapshot>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            result: Mutex::new(result),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    /// Calls block until `release` is called.
    pub fn gated(result: ServiceResult<StatisticsSnapshot>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            result: Mutex::new(result),
            gate: Semaphore::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_result(&self, result: ServiceResult<StatisticsSnapshot>) {
        *self.result.lock() = result;
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl StatisticsService for MockStatisticsService {
    async fn fetch_statistics(&self, _token: &str) -> ServiceResult<StatisticsSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        self.result.lock().clone()
    }
}

// ===== Notifications =====

pub fn server_notification(id: &str, minutes: i64, is_read: bool) -> Notification {
    let mut draft = NotificationDraft::new(NotificationKind::Info, format!("Server {}", id))
        .persistent(true);
    draft.is_read = is_read;
    draft.into_notification(id.to_string(), at(minutes))
}

/// Server entry that is not persistent, so it expires after `duration`.
pub fn transient_server_notification(id: &str, minutes: i64, duration: Duration) -> Notification {
    NotificationDraft::new(NotificationKind::Warning, format!("Server {}", id))
        .with_duration(duration)
        .with_roles(vec!["admin".to_string()])
        .into_notification(id.to_string(), at(minutes))
}

#[derive(Default)]
pub struct MockNotificationApi {
    notifications: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
    marked: Mutex<Vec<String>>,
    marked_all: AtomicUsize,
}

impl MockNotificationApi {
    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        *self.notifications.lock() = notifications;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().clone()
    }

    pub fn marked_all(&self) -> usize {
        self.marked_all.load(Ordering::SeqCst)
    }

    fn check(&self) -> ServiceResult<()> {
        if *self.failing.lock() {
            return Err(SyncError::Api {
                status: 500,
                message: "Internal error".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for MockNotificationApi {
    async fn get_notifications(&self) -> ServiceResult<Vec<Notification>> {
        self.check()?;
        Ok(self.notifications.lock().clone())
    }

    async fn mark_as_read(&self, id: &str) -> ServiceResult<()> {
        self.check()?;
        self.marked.lock().push(id.to_string());
        Ok(())
    }

    async fn mark_all_as_read(&self) -> ServiceResult<()> {
        self.check()?;
        self.marked_all.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingToast {
    shown: Mutex<Vec<(NotificationKind, String)>>,
    failing: Mutex<bool>,
}

impl RecordingToast {
    pub fn shown(&self) -> Vec<(NotificationKind, String)> {
        self.shown.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl ToastSink for RecordingToast {
    fn show(&self, kind: NotificationKind, text: &str) -> ServiceResult<()> {
        if *self.failing.lock() {
            return Err(SyncError::Channel("toast renderer unavailable".to_string()));
        }
        self.shown.lock().push((kind, text.to_string()));
        Ok(())
    }
}

// ===== Chat =====

pub const ME: &str = "user-me";
pub const PEER: &str = "user-peer";

pub fn conversation(id: i64, minutes: Option<i64>, unread: u32) -> ChatConversation {
    ChatConversation {
        participant_id: Some(PEER.to_string()),
        participant_name: Some(format!("Participant {}", id)),
        last_message_at: minutes.map(at),
        unread_count: unread,
        ..ChatConversation::new(id)
    }
}

pub fn message(id: i64, conversation_id: i64, sender: &str, minutes: i64) -> ChatMessage {
    ChatMessage::text(
        id,
        conversation_id,
        sender,
        format!("message {}", id),
        at(minutes),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    Send(i64, String),
    SendVoice(i64, u32),
    MarkRead(i64),
    LoadPage(i64, u32),
}

#[derive(Default)]
pub struct MockChatApi {
    conversations: Mutex<Vec<ChatConversation>>,
    pages: Mutex<HashMap<(i64, u32), MessagePage>>,
    failing: Mutex<bool>,
    next_id: AtomicUsize,
    calls: Mutex<Vec<ChatCall>>,
    mark_read_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockChatApi {
    pub fn set_conversations(&self, conversations: Vec<ChatConversation>) {
        *self.conversations.lock() = conversations;
    }

    pub fn set_page(&self, conversation_id: i64, page: u32, messages: Vec<ChatMessage>, has_more: bool) {
        self.pages
            .lock()
            .insert((conversation_id, page), MessagePage { messages, has_more });
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().clone()
    }

    /// Mark-read calls block until `release_mark_read`.
    pub fn gate_mark_read(&self) {
        *self.mark_read_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_mark_read(&self) {
        if let Some(gate) = self.mark_read_gate.lock().as_ref() {
            gate.add_permits(1);
        }
    }

    fn check(&self) -> ServiceResult<()> {
        if *self.failing.lock() {
            return Err(SyncError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn sent_message(&self, conversation_id: i64) -> ChatMessage {
        let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        ChatMessage::text(id, conversation_id, ME, "", at(60 + id - 1000))
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn get_conversations(&self) -> ServiceResult<Vec<ChatConversation>> {
        self.check()?;
        Ok(self.conversations.lock().clone())
    }

    async fn get_messages(&self, conversation_id: i64, page: u32) -> ServiceResult<MessagePage> {
        self.calls.lock().push(ChatCall::LoadPage(conversation_id, page));
        self.check()?;
        Ok(self
            .pages
            .lock()
            .get(&(conversation_id, page))
            .cloned()
            .unwrap_or_default())
    }

    async fn send_text_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> ServiceResult<ChatMessage> {
        self.calls
            .lock()
            .push(ChatCall::Send(conversation_id, content.to_string()));
        self.check()?;
        let mut message = self.sent_message(conversation_id);
        message.content = content.to_string();
        Ok(message)
    }

    async fn send_voice_message(
        &self,
        conversation_id: i64,
        _clip: &VoiceClip,
        duration_seconds: u32,
    ) -> ServiceResult<ChatMessage> {
        self.calls
            .lock()
            .push(ChatCall::SendVoice(conversation_id, duration_seconds));
        self.check()?;
        let mut message = self.sent_message(conversation_id);
        message.message_type = MessageType::Voice;
        message.voice_url = Some(format!("/voice/{}.webm", message.id));
        message.duration_seconds = Some(duration_seconds);
        Ok(message)
    }

    async fn mark_messages_as_read(&self, conversation_id: i64) -> ServiceResult<()> {
        self.calls.lock().push(ChatCall::MarkRead(conversation_id));
        let gate = self.mark_read_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?;
        }
        self.check()
    }
}

// ===== Push channels =====

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    Join(i64),
    Leave(i64),
    Typing(i64, bool),
}

pub struct MockChannel<E> {
    sender: Mutex<Option<UnboundedSender<E>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_connect: Mutex<bool>,
    fail_invoke: Mutex<bool>,
    calls: Mutex<Vec<ChannelCall>>,
}

impl<E> Default for MockChannel<E> {
    fn default() -> Self {
        Self {
            sender: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            fail_connect: Mutex::new(false),
            fail_invoke: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Send + 'static> MockChannel<E> {
    pub fn push(&self, event: E) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(event);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock() = fail;
    }

    pub fn set_fail_invoke(&self, fail: bool) {
        *self.fail_invoke.lock() = fail;
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().clone()
    }

    fn open(&self) -> ServiceResult<UnboundedReceiver<E>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if *self.fail_connect.lock() {
            return Err(SyncError::Channel("handshake rejected".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    fn close(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
    }

    fn record(&self, call: ChannelCall) -> ServiceResult<()> {
        self.calls.lock().push(call);
        if *self.fail_invoke.lock() {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for MockChannel<NotificationEvent> {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<NotificationEvent>> {
        self.open()
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        self.close();
        Ok(())
    }
}

#[async_trait]
impl ChatChannel for MockChannel<ChatEvent> {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<ChatEvent>> {
        self.open()
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        self.close();
        Ok(())
    }

    async fn join_conversation(&self, conversation_id: i64) -> ServiceResult<()> {
        self.record(ChannelCall::Join(conversation_id))
    }

    async fn leave_conversation(&self, conversation_id: i64) -> ServiceResult<()> {
        self.record(ChannelCall::Leave(conversation_id))
    }

    async fn send_typing_indicator(
        &self,
        conversation_id: i64,
        is_typing: bool,
    ) -> ServiceResult<()> {
        self.record(ChannelCall::Typing(conversation_id, is_typing))
    }
}
