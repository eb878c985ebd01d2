//! Conversation summaries and per-conversation message logs.
//!
//! Logs are kept sorted by `(created_at, id)` and never hold two messages
//! with the same id, whichever mix of REST pages and pushed messages built
//! them. Sent messages enter the log only once the server has confirmed them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::ChatEvent;
use crate::models::{ChatConversation, ChatMessage, ConnectionStatus, VoiceClip};
use crate::services::{ChatApi, ChatChannel};

/// Persisted subset: the conversation list and the selection. Messages are
/// always reloaded from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedChat {
    pub conversations: Vec<ChatConversation>,
    pub current_conversation_id: Option<i64>,
}

#[derive(Default)]
struct ChatState {
    conversations: Vec<ChatConversation>,
    current: Option<i64>,
    /// Conversation currently joined on the live channel
    joined: Option<i64>,
    messages: HashMap<i64, Vec<ChatMessage>>,
    has_more: HashMap<i64, bool>,
    typing: HashMap<i64, BTreeSet<String>>,
    connection: ConnectionStatus,
    is_loading: bool,
    error: Option<String>,
}

impl ChatState {
    fn conversation_mut(&mut self, conversation_id: i64) -> &mut ChatConversation {
        let pos = match self
            .conversations
            .iter()
            .position(|c| c.id == conversation_id)
        {
            Some(pos) => pos,
            None => {
                self.conversations.push(ChatConversation::new(conversation_id));
                self.conversations.len() - 1
            }
        };
        &mut self.conversations[pos]
    }

    /// Most recent activity first; conversations without messages last.
    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }

    fn insert_message(&mut self, conversation_id: i64, message: ChatMessage) -> bool {
        let log = self.messages.entry(conversation_id).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return false;
        }
        let key = (message.created_at, message.id);
        let pos = log.partition_point(|m| (m.created_at, m.id) <= key);
        log.insert(pos, message);
        true
    }

    /// Mark everything not authored by `me` as read and zero the badge.
    fn apply_local_read(&mut self, conversation_id: i64, me: Option<&str>, read_at: DateTime<Utc>) {
        if let Some(log) = self.messages.get_mut(&conversation_id) {
            for message in log
                .iter_mut()
                .filter(|m| !m.is_read && !is_mine(m, me))
            {
                message.is_read = true;
                message.read_at = Some(read_at);
            }
        }
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.unread_count = 0;
        }
    }

    /// Unread incoming message ids and the badge, as a mark-read request
    /// will acknowledge them.
    fn unread_snapshot(&self, conversation_id: i64, me: Option<&str>) -> (HashSet<i64>, u32) {
        let ids = self
            .messages
            .get(&conversation_id)
            .map(|log| {
                log.iter()
                    .filter(|m| !m.is_read && !is_mine(m, me))
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default();
        let unread = self
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map_or(0, |c| c.unread_count);
        (ids, unread)
    }

    /// Applies a mark-read the server accepted. Only what was unread when the
    /// request went out is marked; anything that arrived since stays unread.
    fn apply_acknowledged_read(
        &mut self,
        conversation_id: i64,
        ids: &HashSet<i64>,
        acknowledged: u32,
        read_at: DateTime<Utc>,
    ) {
        if let Some(log) = self.messages.get_mut(&conversation_id) {
            for message in log.iter_mut().filter(|m| !m.is_read && ids.contains(&m.id)) {
                message.is_read = true;
                message.read_at = Some(read_at);
            }
        }
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.unread_count = conversation.unread_count.saturating_sub(acknowledged);
        }
    }

    /// The other participant read our messages.
    fn apply_peer_read(&mut self, conversation_id: i64, me: Option<&str>, read_at: DateTime<Utc>) {
        let Some(log) = self.messages.get_mut(&conversation_id) else {
            return;
        };
        for message in log.iter_mut().filter(|m| !m.is_read && is_mine(m, me)) {
            message.is_read = true;
            message.read_at = Some(read_at);
        }
    }
}

/// With no known local user every message counts as someone else's.
fn is_mine(message: &ChatMessage, me: Option<&str>) -> bool {
    me.is_some_and(|me| message.sender_id == me)
}

struct Inner {
    api: Arc<dyn ChatApi>,
    channel: Arc<dyn ChatChannel>,
    auth: Arc<dyn AuthContext>,
    clock: Arc<dyn Clock>,
    state: Mutex<ChatState>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    revision: watch::Sender<u64>,
}

impl Inner {
    fn changed(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Inner>,
}

impl ChatStore {
    pub fn new(
        api: Arc<dyn ChatApi>,
        channel: Arc<dyn ChatChannel>,
        auth: Arc<dyn AuthContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                api,
                channel,
                auth,
                clock,
                state: Mutex::new(ChatState::default()),
                listener: tokio::sync::Mutex::new(None),
                revision,
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn me(&self) -> Option<String> {
        self.inner.auth.current_user_id()
    }

    // ===== Getters =====

    pub fn conversations(&self) -> Vec<ChatConversation> {
        self.inner.state.lock().conversations.clone()
    }

    pub fn conversation(&self, conversation_id: i64) -> Option<ChatConversation> {
        self.inner
            .state
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    pub fn current_conversation_id(&self) -> Option<i64> {
        self.inner.state.lock().current
    }

    pub fn current_conversation(&self) -> Option<ChatConversation> {
        let id = self.current_conversation_id()?;
        self.conversation(id)
    }

    pub fn messages(&self, conversation_id: i64) -> Vec<ChatMessage> {
        self.inner
            .state
            .lock()
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the last loaded page said older history exists.
    /// False until a page has been loaded.
    pub fn has_more_messages(&self, conversation_id: i64) -> bool {
        self.inner
            .state
            .lock()
            .has_more
            .get(&conversation_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn typing_users(&self, conversation_id: i64) -> Vec<String> {
        self.inner
            .state
            .lock()
            .typing
            .get(&conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_unread(&self) -> u32 {
        self.inner
            .state
            .lock()
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.lock().connection.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    // ===== Loading =====

    pub async fn load_conversations(&self) {
        self.begin_loading();
        let result = self.inner.api.get_conversations().await;
        {
            let mut state = self.inner.state.lock();
            state.is_loading = false;
            match result {
                Ok(conversations) => {
                    debug!(count = conversations.len(), "conversations loaded");
                    state.conversations = conversations;
                    state.sort_conversations();
                }
                Err(e) => {
                    warn!(error = %e, "failed to load conversations");
                    state.error = Some(e.to_string());
                }
            }
        }
        self.inner.changed();
    }

    /// Fetch one page of history and merge it into the log by id.
    pub async fn load_messages(&self, conversation_id: i64, page: u32) {
        self.begin_loading();
        let result = self.inner.api.get_messages(conversation_id, page.max(1)).await;
        {
            let mut state = self.inner.state.lock();
            state.is_loading = false;
            match result {
                Ok(fetched) => {
                    let mut added = 0;
                    for message in fetched.messages {
                        if state.insert_message(conversation_id, message) {
                            added += 1;
                        }
                    }
                    state.has_more.insert(conversation_id, fetched.has_more);
                    debug!(conversation_id, page, added, "message page merged");
                }
                Err(e) => {
                    warn!(conversation_id, page, error = %e, "failed to load messages");
                    state.error = Some(e.to_string());
                }
            }
        }
        self.inner.changed();
    }

    fn begin_loading(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_loading = true;
            state.error = None;
        }
        self.inner.changed();
    }

    // ===== Messages =====

    /// Append a confirmed or pushed message. Returns false for a duplicate id.
    pub fn add_message(&self, conversation_id: i64, message: ChatMessage) -> bool {
        let me = self.me();
        let from_other = !is_mine(&message, me.as_deref());
        let created_at = message.created_at;
        let preview = message.preview();
        let message_id = message.id;

        {
            let mut state = self.inner.state.lock();
            if !state.insert_message(conversation_id, message) {
                debug!(conversation_id, message_id, "duplicate message ignored");
                return false;
            }

            let conversation = state.conversation_mut(conversation_id);
            if conversation
                .last_message_at
                .map_or(true, |last| created_at >= last)
            {
                conversation.last_message_at = Some(created_at);
                conversation.last_message_preview = Some(preview);
            }
            if from_other {
                conversation.unread_count += 1;
            }
            state.sort_conversations();
        }
        self.inner.changed();
        true
    }

    pub async fn send_text_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> Result<ChatMessage, SyncError> {
        if content.trim().is_empty() {
            return Err(self.record_error(SyncError::InvalidInput(
                "message content is empty".to_string(),
            )));
        }
        let result = self
            .inner
            .api
            .send_text_message(conversation_id, content)
            .await;
        self.accept_sent(conversation_id, result)
    }

    pub async fn send_voice_message(
        &self,
        conversation_id: i64,
        clip: &VoiceClip,
        duration_seconds: u32,
    ) -> Result<ChatMessage, SyncError> {
        if clip.bytes.is_empty() {
            return Err(self.record_error(SyncError::InvalidInput(
                "voice recording is empty".to_string(),
            )));
        }
        let result = self
            .inner
            .api
            .send_voice_message(conversation_id, clip, duration_seconds)
            .await;
        self.accept_sent(conversation_id, result)
    }

    fn accept_sent(
        &self,
        conversation_id: i64,
        result: Result<ChatMessage, SyncError>,
    ) -> Result<ChatMessage, SyncError> {
        match result {
            Ok(message) => {
                self.add_message(conversation_id, message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!(conversation_id, error = %e, "send failed");
                Err(self.record_error(e))
            }
        }
    }

    /// Server-side mark-read first; local messages and the badge change only
    /// after the server accepted it.
    pub async fn mark_messages_as_read(&self, conversation_id: i64) -> Result<(), SyncError> {
        let me = self.me();
        let (ids, acknowledged) = self
            .inner
            .state
            .lock()
            .unread_snapshot(conversation_id, me.as_deref());

        if let Err(e) = self.inner.api.mark_messages_as_read(conversation_id).await {
            warn!(conversation_id, error = %e, "mark as read rejected");
            return Err(self.record_error(e));
        }

        let now = self.inner.clock.now();
        self.inner
            .state
            .lock()
            .apply_acknowledged_read(conversation_id, &ids, acknowledged, now);
        self.inner.changed();
        Ok(())
    }

    fn record_error(&self, e: SyncError) -> SyncError {
        self.inner.state.lock().error = Some(e.to_string());
        self.inner.changed();
        e
    }

    // ===== Selection and typing =====

    /// Make `conversation` current, leaving the previously joined live
    /// conversation and joining the new one.
    pub async fn select_conversation(&self, conversation: Option<ChatConversation>) {
        let target = conversation.as_ref().map(|c| c.id);
        let previous = {
            let mut state = self.inner.state.lock();
            if let Some(conversation) = conversation {
                if !state.conversations.iter().any(|c| c.id == conversation.id) {
                    state.conversations.push(conversation);
                    state.sort_conversations();
                }
            }
            state.current = target;
            std::mem::replace(&mut state.joined, target)
        };
        self.inner.changed();

        if previous == target {
            return;
        }
        if let Some(id) = previous {
            if let Err(e) = self.inner.channel.leave_conversation(id).await {
                warn!(conversation_id = id, error = %e, "leave conversation failed");
            }
        }
        if let Some(id) = target {
            if let Err(e) = self.inner.channel.join_conversation(id).await {
                warn!(conversation_id = id, error = %e, "join conversation failed");
            }
        }
    }

    pub fn set_typing_user(&self, conversation_id: i64, user_id: &str, is_typing: bool) {
        let changed = {
            let mut state = self.inner.state.lock();
            if is_typing {
                state
                    .typing
                    .entry(conversation_id)
                    .or_default()
                    .insert(user_id.to_string())
            } else {
                let removed = state
                    .typing
                    .get_mut(&conversation_id)
                    .is_some_and(|users| users.remove(user_id));
                if state.typing.get(&conversation_id).is_some_and(BTreeSet::is_empty) {
                    state.typing.remove(&conversation_id);
                }
                removed
            }
        };
        if changed {
            self.inner.changed();
        }
    }

    pub async fn send_typing_indicator(
        &self,
        conversation_id: i64,
        is_typing: bool,
    ) -> Result<(), SyncError> {
        self.inner
            .channel
            .send_typing_indicator(conversation_id, is_typing)
            .await
            .map_err(|e| {
                warn!(conversation_id, error = %e, "typing indicator failed");
                self.record_error(e)
            })
    }

    // ===== Live channel =====

    pub fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(message) => {
                self.add_message(message.conversation_id, message);
            }
            ChatEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if self.me().as_deref() == Some(user_id.as_str()) {
                    return;
                }
                self.set_typing_user(conversation_id, &user_id, is_typing);
            }
            ChatEvent::MessagesRead {
                conversation_id,
                reader_id,
                read_at,
            } => {
                let me = self.me();
                let read_at = read_at.unwrap_or_else(|| self.inner.clock.now());
                {
                    let mut state = self.inner.state.lock();
                    if me.as_deref() == Some(reader_id.as_str()) {
                        state.apply_local_read(conversation_id, me.as_deref(), read_at);
                    } else {
                        state.apply_peer_read(conversation_id, me.as_deref(), read_at);
                    }
                }
                self.inner.changed();
            }
            ChatEvent::ConnectionStatus(status) => {
                self.inner.state.lock().connection = status;
                self.inner.changed();
            }
        }
    }

    /// Connect the chat channel, start dispatching its events and rejoin the
    /// current conversation. Idempotent while the listener is alive.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        let mut listener = self.inner.listener.lock().await;
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("chat channel already initialized");
            return Ok(());
        }

        let mut events = match self.inner.channel.connect().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "chat channel connect failed");
                return Err(e);
            }
        };

        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(store) = ChatStore::from_weak(&weak) else {
                    break;
                };
                store.handle_event(event);
            }
        }));

        let rejoin = {
            let mut state = self.inner.state.lock();
            state.joined = state.current;
            state.current
        };
        if let Some(id) = rejoin {
            if let Err(e) = self.inner.channel.join_conversation(id).await {
                warn!(conversation_id = id, error = %e, "rejoin conversation failed");
            }
        }
        info!("chat channel initialized");
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut listener = self.inner.listener.lock().await;
        if let Some(task) = listener.take() {
            task.abort();
        }
        if let Err(e) = self.inner.channel.disconnect().await {
            warn!(error = %e, "chat channel disconnect failed");
        }
        {
            let mut state = self.inner.state.lock();
            state.typing.clear();
            state.joined = None;
            state.connection = ConnectionStatus::disconnected();
        }
        self.inner.changed();
        info!("chat channel disconnected");
    }

    /// Back to the empty state (logout).
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            let connection = state.connection.clone();
            *state = ChatState {
                connection,
                ..ChatState::default()
            };
        }
        self.inner.changed();
    }

    // ===== Persistence =====

    pub fn snapshot(&self) -> PersistedChat {
        let state = self.inner.state.lock();
        PersistedChat {
            conversations: state.conversations.clone(),
            current_conversation_id: state.current,
        }
    }

    /// Seed an empty store. Ignored once conversations have been loaded.
    pub fn restore(&self, persisted: PersistedChat) {
        {
            let mut state = self.inner.state.lock();
            if !state.conversations.is_empty() {
                return;
            }
            state.conversations = persisted.conversations;
            state.sort_conversations();
            if state.current.is_none() {
                let current = persisted
                    .current_conversation_id
                    .filter(|id| state.conversations.iter().any(|c| c.id == *id));
                state.current = current;
            }
        }
        self.inner.changed();
    }
}
