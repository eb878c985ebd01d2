use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize a command result for stdout.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(value).context("Failed to serialize output")
    } else {
        serde_json::to_string(value).context("Failed to serialize output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_compact() {
        let out = render(&json!({"conversationId": 3, "read": true}), false).unwrap();
        assert_eq!(out, r#"{"conversationId":3,"read":true}"#);
    }

    #[test]
    fn test_render_pretty() {
        let out = render(&json!({"unread": 2}), true).unwrap();
        assert_eq!(out, "{\n  \"unread\": 2\n}");
    }
}
