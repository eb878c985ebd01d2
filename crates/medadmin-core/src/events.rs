use chrono::{DateTime, Utc};

use crate::models::{ChatMessage, ConnectionStatus, NotificationDraft};

/// Everything the notifications push channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    NotificationAdded(NotificationDraft),
    /// Authoritative unread counter from the server
    UnreadCountChanged(usize),
    ConnectionStatus(ConnectionStatus),
}

/// Everything the chat push channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ChatMessage),
    Typing {
        conversation_id: i64,
        user_id: String,
        is_typing: bool,
    },
    /// `reader_id` has read the conversation up to now. Without a server
    /// timestamp the store stamps it with its own clock.
    MessagesRead {
        conversation_id: i64,
        reader_id: String,
        read_at: Option<DateTime<Utc>>,
    },
    ConnectionStatus(ConnectionStatus),
}
