use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub persistent: bool,
    /// Only meaningful when not persistent
    #[serde(default, with = "super::duration_ms")]
    pub duration: Option<Duration>,
    pub timestamp: DateTime<Utc>,
    /// Audience restriction; `None` means everyone
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl Notification {
    /// Audience check. Unrestricted notifications match every role.
    pub fn is_visible_to(&self, role: &str) -> bool {
        match &self.roles {
            Some(roles) => roles.iter().any(|r| r == role),
            None => true,
        }
    }

    /// Text handed to the toast side-channel
    pub fn toast_text(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => format!("{}: {}", self.title, message),
            _ => self.title.clone(),
        }
    }
}

/// A notification before the store assigns its id and timestamp.
///
/// Also the payload shape of a pushed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, with = "super::duration_ms")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl NotificationDraft {
    pub fn new(kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: None,
            is_read: false,
            persistent: false,
            duration: None,
            roles: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub(crate) fn into_notification(self, id: String, timestamp: DateTime<Utc>) -> Notification {
        Notification {
            id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            is_read: self.is_read,
            persistent: self.persistent,
            duration: self.duration,
            timestamp,
            roles: self.roles,
        }
    }
}

/// Optional knobs for the `success`/`error`/`warning`/`info` shortcuts.
/// `None` keeps the per-kind default.
#[derive(Debug, Clone, Default)]
pub struct NotifyOptions {
    pub persistent: Option<bool>,
    pub duration: Option<Duration>,
    pub roles: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_from_push_payload() {
        let json = r#"{"type":"warning","title":"Maintenance","message":"Tonight 22:00","duration":8000}"#;
        let draft: NotificationDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.kind, NotificationKind::Warning);
        assert_eq!(draft.message.as_deref(), Some("Tonight 22:00"));
        assert_eq!(draft.duration, Some(Duration::from_millis(8000)));
        assert!(!draft.is_read);
        assert!(!draft.persistent);
        assert!(draft.roles.is_none());
    }

    #[test]
    fn test_role_visibility() {
        let mut n = NotificationDraft::new(NotificationKind::Info, "Report ready")
            .into_notification("n1".to_string(), Utc::now());
        assert!(n.is_visible_to("doctor"));

        n.roles = Some(vec!["admin".to_string(), "nurse".to_string()]);
        assert!(n.is_visible_to("nurse"));
        assert!(!n.is_visible_to("doctor"));
    }

    #[test]
    fn test_toast_text() {
        let n = NotificationDraft::new(NotificationKind::Error, "Failed")
            .with_message("disk full")
            .into_notification("n1".to_string(), Utc::now());
        assert_eq!(n.toast_text(), "Failed: disk full");
    }
}
