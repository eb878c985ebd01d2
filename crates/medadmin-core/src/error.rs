/// Errors surfaced by stores and collaborators.
///
/// The `Display` text is what ends up in a store's `error` field, so it is
/// written for the person looking at the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Authentication token is missing")]
    MissingToken,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Request failed ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Live connection error: {0}")]
    Channel(String),
    #[error("Live connection is not established")]
    NotConnected,
    #[error("Failed to persist state: {0}")]
    Persist(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Channel(err.to_string())
    }
}
