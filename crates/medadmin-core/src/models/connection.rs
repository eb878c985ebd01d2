use serde::{Deserialize, Serialize};

/// Live connection state as reported by a push channel.
///
/// Stores mirror this verbatim; retry policy lives in the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            is_connected: true,
            is_reconnecting: false,
            reconnect_attempts: 0,
        }
    }

    pub fn reconnecting(attempt: u32) -> Self {
        Self {
            is_connected: false,
            is_reconnecting: true,
            reconnect_attempts: attempt,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}
