//! Application-wide constants
//!
//! Defaults shared by the stores, the HTTP client and the hub client.

use std::time::Duration;

/// Statistics snapshot validity window (5 minutes)
pub const STATISTICS_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a non-persistent notification stays before auto-removal
pub const NOTIFICATION_DURATION: Duration = Duration::from_millis(5000);

/// Messages requested per page when loading chat history
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Reconnect attempts before a hub connection gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delays between hub reconnect attempts. The last entry repeats.
pub const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Preview shown in the conversation list for voice messages
pub const VOICE_MESSAGE_PREVIEW: &str = "Voice message";

/// Error text recorded when a fetch is attempted without a token
pub const MISSING_TOKEN_MESSAGE: &str = "Authentication token is missing";

// REST endpoints, relative to the configured API base URL
pub mod endpoints {
    pub const STATISTICS: &str = "/api/statistics";
    pub const NOTIFICATIONS: &str = "/api/notifications";
    pub const NOTIFICATIONS_READ_ALL: &str = "/api/notifications/read-all";
    pub const CONVERSATIONS: &str = "/api/chat/conversations";
}

// Hub method names
pub mod hub_targets {
    /// Server -> client: a notification was pushed
    pub const RECEIVE_NOTIFICATION: &str = "ReceiveNotification";
    /// Server -> client: authoritative unread counter
    pub const UNREAD_COUNT_CHANGED: &str = "UnreadCountChanged";
    /// Server -> client: new chat message
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    /// Server -> client: typing indicator
    pub const USER_TYPING: &str = "UserTyping";
    /// Server -> client: read receipt
    pub const MESSAGES_READ: &str = "MessagesRead";
    /// Client -> server
    pub const JOIN_CONVERSATION: &str = "JoinConversation";
    /// Client -> server
    pub const LEAVE_CONVERSATION: &str = "LeaveConversation";
    /// Client -> server
    pub const SEND_TYPING_INDICATOR: &str = "SendTypingIndicator";
}
