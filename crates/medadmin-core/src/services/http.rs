//! REST collaborator over `reqwest`.
//!
//! Every endpoint answers with a `{ "data": ... }` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ChatApi, NotificationApi, ServiceResult, StatisticsService};
use crate::auth::AuthContext;
use crate::constants::endpoints;
use crate::error::SyncError;
use crate::models::{
    ChatConversation, ChatMessage, MessagePage, MessageType, Notification, StatisticsSnapshot,
    VoiceClip,
};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct HttpApiClient {
    base_url: String,
    page_size: u32,
    auth: Arc<dyn AuthContext>,
    client: Client,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, page_size: u32, auth: Arc<dyn AuthContext>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            page_size,
            auth,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn conversation_url(&self, conversation_id: i64, suffix: &str) -> String {
        format!(
            "{}{}/{}{}",
            self.base_url,
            endpoints::CONVERSATIONS,
            conversation_id,
            suffix
        )
    }

    fn bearer(&self) -> ServiceResult<String> {
        self.auth.token().ok_or(SyncError::MissingToken)
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> ServiceResult<Response> {
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            });
        tracing::warn!(status = status.as_u16(), %message, "api request failed");
        Err(SyncError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn data<T: DeserializeOwned>(&self, request: RequestBuilder) -> ServiceResult<T> {
        let token = self.bearer()?;
        let response = self.send(request, &token).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    async fn empty(&self, request: RequestBuilder) -> ServiceResult<()> {
        let token = self.bearer()?;
        self.send(request, &token).await?;
        Ok(())
    }
}

#[async_trait]
impl StatisticsService for HttpApiClient {
    async fn fetch_statistics(&self, token: &str) -> ServiceResult<StatisticsSnapshot> {
        if token.trim().is_empty() {
            return Err(SyncError::MissingToken);
        }
        let request = self.client.get(self.url(endpoints::STATISTICS));
        let response = self.send(request, token).await?;
        let envelope: Envelope<StatisticsSnapshot> = response.json().await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl NotificationApi for HttpApiClient {
    async fn get_notifications(&self) -> ServiceResult<Vec<Notification>> {
        self.data(self.client.get(self.url(endpoints::NOTIFICATIONS)))
            .await
    }

    async fn mark_as_read(&self, id: &str) -> ServiceResult<()> {
        let url = format!("{}{}/{}/read", self.base_url, endpoints::NOTIFICATIONS, id);
        self.empty(self.client.put(url)).await
    }

    async fn mark_all_as_read(&self) -> ServiceResult<()> {
        self.empty(self.client.put(self.url(endpoints::NOTIFICATIONS_READ_ALL)))
            .await
    }
}

#[async_trait]
impl ChatApi for HttpApiClient {
    async fn get_conversations(&self) -> ServiceResult<Vec<ChatConversation>> {
        self.data(self.client.get(self.url(endpoints::CONVERSATIONS)))
            .await
    }

    async fn get_messages(&self, conversation_id: i64, page: u32) -> ServiceResult<MessagePage> {
        let request = self
            .client
            .get(self.conversation_url(conversation_id, "/messages"))
            .query(&[("page", page), ("pageSize", self.page_size)]);
        self.data(request).await
    }

    async fn send_text_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> ServiceResult<ChatMessage> {
        let body = serde_json::json!({
            "content": content,
            "messageType": MessageType::Text,
        });
        let request = self
            .client
            .post(self.conversation_url(conversation_id, "/messages"))
            .json(&body);
        self.data(request).await
    }

    async fn send_voice_message(
        &self,
        conversation_id: i64,
        clip: &VoiceClip,
        duration_seconds: u32,
    ) -> ServiceResult<ChatMessage> {
        let part = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(&clip.mime_type)
            .map_err(|e| SyncError::InvalidInput(format!("bad mime type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("durationSeconds", duration_seconds.to_string());
        let request = self
            .client
            .post(self.conversation_url(conversation_id, "/voice"))
            .multipart(form);
        self.data(request).await
    }

    async fn mark_messages_as_read(&self, conversation_id: i64) -> ServiceResult<()> {
        self.empty(self.client.post(self.conversation_url(conversation_id, "/read")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionAuth;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpApiClient {
        let auth = Arc::new(SessionAuth::with_credentials("admin-1", "tok"));
        HttpApiClient::new(format!("{}/", server.uri()), 20, auth)
    }

    #[tokio::test]
    async fn test_fetch_statistics_unwraps_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/statistics"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "totalUsers": 12, "activeUsers": 9, "usersByRole": { "doctor": 4 } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stats = client_for(&server).fetch_statistics("abc").await.unwrap();
        assert_eq!(stats.total_users, 12);
        assert_eq!(stats.active_users, 9);
        assert_eq!(stats.users_by_role.get("doctor"), Some(&4));
    }

    #[tokio::test]
    async fn test_error_body_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/conversations"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "message": "Access denied" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_conversations().await.unwrap_err();
        assert_eq!(
            err,
            SyncError::Api {
                status: 403,
                message: "Access denied".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_get_messages_sends_paging_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/conversations/7/messages"))
            .and(query_param("page", "2"))
            .and(query_param("pageSize", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "messages": [{
                        "id": 1, "conversationId": 7, "senderId": "u-2",
                        "content": "hello", "messageType": "Text",
                        "createdAt": "2026-03-01T10:00:00Z"
                    }],
                    "hasMore": true
                }
            })))
            .mount(&server)
            .await;

        let page = client_for(&server).get_messages(7, 2).await.unwrap();
        assert!(page.has_more);
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_missing_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = HttpApiClient::new(server.uri(), 20, Arc::new(SessionAuth::new()));
        let err = client.mark_all_as_read().await.unwrap_err();
        assert_eq!(err, SyncError::MissingToken);
    }

    #[tokio::test]
    async fn test_mark_messages_as_read_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/conversations/7/read"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).mark_messages_as_read(7).await.unwrap();
    }
}
