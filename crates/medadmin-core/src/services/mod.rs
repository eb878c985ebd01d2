//! Collaborator contracts the stores depend on, plus the HTTP and hub
//! implementations used in production.

pub mod http;
pub mod hub;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::SyncError;
use crate::events::{ChatEvent, NotificationEvent};
use crate::models::{
    ChatConversation, ChatMessage, MessagePage, Notification, NotificationKind,
    StatisticsSnapshot, VoiceClip,
};

pub use http::HttpApiClient;
pub use hub::{ChatHub, HubConnection, NotificationHub};

pub type ServiceResult<T> = Result<T, SyncError>;

#[async_trait]
pub trait StatisticsService: Send + Sync {
    async fn fetch_statistics(&self, token: &str) -> ServiceResult<StatisticsSnapshot>;
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn get_notifications(&self) -> ServiceResult<Vec<Notification>>;
    async fn mark_as_read(&self, id: &str) -> ServiceResult<()>;
    async fn mark_all_as_read(&self) -> ServiceResult<()>;
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn get_conversations(&self) -> ServiceResult<Vec<ChatConversation>>;
    async fn get_messages(&self, conversation_id: i64, page: u32) -> ServiceResult<MessagePage>;
    async fn send_text_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> ServiceResult<ChatMessage>;
    async fn send_voice_message(
        &self,
        conversation_id: i64,
        clip: &VoiceClip,
        duration_seconds: u32,
    ) -> ServiceResult<ChatMessage>;
    async fn mark_messages_as_read(&self, conversation_id: i64) -> ServiceResult<()>;
}

/// Server-to-client notification stream.
///
/// `connect` hands back the receiving end of the event stream; the channel
/// owns reconnection and reports it through `ConnectionStatus` events.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<NotificationEvent>>;
    async fn disconnect(&self) -> ServiceResult<()>;
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    async fn connect(&self) -> ServiceResult<UnboundedReceiver<ChatEvent>>;
    async fn disconnect(&self) -> ServiceResult<()>;
    async fn join_conversation(&self, conversation_id: i64) -> ServiceResult<()>;
    async fn leave_conversation(&self, conversation_id: i64) -> ServiceResult<()>;
    async fn send_typing_indicator(&self, conversation_id: i64, is_typing: bool)
        -> ServiceResult<()>;
}

/// Fire-and-forget rendering of transient notices.
pub trait ToastSink: Send + Sync {
    fn show(&self, kind: NotificationKind, text: &str) -> ServiceResult<()>;
}

/// Toast sink that drops everything; used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopToast;

impl ToastSink for NoopToast {
    fn show(&self, _kind: NotificationKind, _text: &str) -> ServiceResult<()> {
        Ok(())
    }
}
