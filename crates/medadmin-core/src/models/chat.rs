use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConversation {
    pub id: i64,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub participant_name: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ChatConversation {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            participant_id: None,
            participant_name: None,
            last_message_at: None,
            last_message_preview: None,
            unread_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Download location of the audio for voice messages
    #[serde(default)]
    pub voice_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

impl ChatMessage {
    pub fn text(
        id: i64,
        conversation_id: i64,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id: sender_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            created_at,
            is_read: false,
            read_at: None,
            voice_url: None,
            duration_seconds: None,
        }
    }

    pub fn preview(&self) -> String {
        match self.message_type {
            MessageType::Text => self.content.clone(),
            MessageType::Voice => crate::constants::VOICE_MESSAGE_PREVIEW.to_string(),
        }
    }
}

/// One page of conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_more: bool,
}

/// Recorded audio to upload as a voice message.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceClip {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}
