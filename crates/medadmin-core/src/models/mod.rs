pub mod chat;
pub mod connection;
pub mod notification;
pub mod statistics;

pub use chat::{ChatConversation, ChatMessage, MessagePage, MessageType, VoiceClip};
pub use connection::ConnectionStatus;
pub use notification::{Notification, NotificationDraft, NotificationKind, NotifyOptions};
pub use statistics::StatisticsSnapshot;

/// Serde helper for `Option<Duration>` carried as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
