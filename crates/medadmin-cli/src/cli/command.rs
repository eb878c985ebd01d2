use anyhow::{bail, Context, Result};
use medadmin_core::store::{ChatStore, NotificationStore};
use medadmin_core::AdminSession;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::output::render;

/// One-shot command parsed from arguments
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Dashboard statistics, served from the saved snapshot while fresh
    Stats { force: bool },
    /// Conversation list
    Conversations,
    /// One page of a conversation's history
    Messages { conversation_id: i64, page: u32 },
    /// Send a text message
    Send {
        conversation_id: i64,
        content: String,
    },
    /// Mark a conversation read on the server and locally
    MarkRead { conversation_id: i64 },
}

/// Run a one-shot command against `session` and return its JSON result.
pub async fn run_command(session: &AdminSession, command: CliCommand) -> Result<Value> {
    match command {
        CliCommand::Stats { force } => {
            let store = session.statistics();
            session.refresh_statistics(force).await;
            if let Some(error) = store.error() {
                bail!("Failed to fetch statistics: {}", error);
            }
            Ok(json!({
                "statistics": store.statistics(),
                "lastFetched": store.last_fetched(),
                "stale": store.is_stale(),
            }))
        }
        CliCommand::Conversations => {
            let chat = session.chat();
            chat.load_conversations().await;
            if let Some(error) = chat.error() {
                bail!("Failed to load conversations: {}", error);
            }
            Ok(json!({
                "conversations": chat.conversations(),
                "totalUnread": chat.total_unread(),
            }))
        }
        CliCommand::Messages {
            conversation_id,
            page,
        } => {
            let chat = session.chat();
            chat.load_messages(conversation_id, page).await;
            if let Some(error) = chat.error() {
                bail!("Failed to load conversation {}: {}", conversation_id, error);
            }
            Ok(json!({
                "conversationId": conversation_id,
                "page": page,
                "messages": chat.messages(conversation_id),
                "hasMore": chat.has_more_messages(conversation_id),
            }))
        }
        CliCommand::Send {
            conversation_id,
            content,
        } => {
            let message = session
                .chat()
                .send_text_message(conversation_id, &content)
                .await
                .with_context(|| format!("Failed to send to conversation {}", conversation_id))?;
            Ok(json!({ "message": message }))
        }
        CliCommand::MarkRead { conversation_id } => {
            session
                .chat()
                .mark_messages_as_read(conversation_id)
                .await
                .with_context(|| format!("Failed to mark conversation {} read", conversation_id))?;
            Ok(json!({ "conversationId": conversation_id, "read": true }))
        }
    }
}

fn notification_summary(store: &NotificationStore) -> Value {
    json!({
        "channel": "notifications",
        "connection": store.connection_status(),
        "unreadCount": store.unread_count(),
        "latest": store.notifications().into_iter().next(),
    })
}

fn chat_summary(store: &ChatStore) -> Value {
    json!({
        "channel": "chat",
        "connection": store.connection_status(),
        "totalUnread": store.total_unread(),
        "latestConversation": store.conversations().into_iter().next(),
    })
}

/// Connect both push channels and print a summary line per store change
/// until Ctrl-C, then dispose the session.
pub async fn watch(session: &AdminSession, pretty: bool) -> Result<()> {
    if let Err(e) = session.init().await {
        warn!(error = %e, "push channel unavailable; showing cached state");
    }
    session.chat().load_conversations().await;
    session.notifications().fetch_notifications().await;

    let mut notifications = session.notifications().subscribe();
    let mut chat = session.chat().subscribe();
    println!("{}", render(&notification_summary(session.notifications()), pretty)?);
    println!("{}", render(&chat_summary(session.chat()), pretty)?);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", render(&notification_summary(session.notifications()), pretty)?);
            }
            changed = chat.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", render(&chat_summary(session.chat()), pretty)?);
            }
        }
    }

    session.dispose().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use medadmin_core::constants::MISSING_TOKEN_MESSAGE;
    use medadmin_core::session::Collaborators;
    use medadmin_core::testing::{
        conversation, message, sample_statistics, ChatCall, ManualClock, MockChannel,
        MockChatApi, MockNotificationApi, MockStatisticsService, RecordingToast, ME, PEER,
    };
    use medadmin_core::{SessionAuth, SyncConfig, SyncError};

    use super::*;

    struct Fixture {
        session: AdminSession,
        statistics: Arc<MockStatisticsService>,
        chat_api: Arc<MockChatApi>,
    }

    fn fixture_as(auth: SessionAuth, statistics: MockStatisticsService) -> Fixture {
        let statistics = Arc::new(statistics);
        let chat_api = Arc::new(MockChatApi::default());
        let parts = Collaborators {
            auth: Arc::new(auth),
            clock: Arc::new(ManualClock::default()),
            statistics: statistics.clone(),
            notification_api: Arc::new(MockNotificationApi::default()),
            notification_channel: Arc::new(MockChannel::default()),
            chat_api: chat_api.clone(),
            chat_channel: Arc::new(MockChannel::default()),
            toast: Arc::new(RecordingToast::default()),
        };
        Fixture {
            session: AdminSession::from_parts(&SyncConfig::default(), parts),
            statistics,
            chat_api,
        }
    }

    fn fixture(statistics: MockStatisticsService) -> Fixture {
        fixture_as(SessionAuth::with_credentials(ME, "token"), statistics)
    }

    fn healthy() -> Fixture {
        fixture(MockStatisticsService::returning(Ok(sample_statistics(3))))
    }

    #[tokio::test]
    async fn test_stats_reports_snapshot() {
        let f = healthy();
        let value = run_command(&f.session, CliCommand::Stats { force: false })
            .await
            .unwrap();

        assert_eq!(
            value["statistics"],
            serde_json::to_value(sample_statistics(3)).unwrap()
        );
        assert_eq!(value["stale"], json!(false));
        assert!(!value["lastFetched"].is_null());

        run_command(&f.session, CliCommand::Stats { force: false })
            .await
            .unwrap();
        assert_eq!(f.statistics.calls(), 1);
        run_command(&f.session, CliCommand::Stats { force: true })
            .await
            .unwrap();
        assert_eq!(f.statistics.calls(), 2);
    }

    #[tokio::test]
    async fn test_stats_failure_bails() {
        let f = fixture(MockStatisticsService::returning(Err(SyncError::Api {
            status: 500,
            message: "db down".to_string(),
        })));

        let err = run_command(&f.session, CliCommand::Stats { force: false })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to fetch statistics: Request failed (500): db down"
        );
    }

    #[tokio::test]
    async fn test_stats_without_token_bails_before_network() {
        let f = fixture_as(
            SessionAuth::new(),
            MockStatisticsService::returning(Ok(sample_statistics(3))),
        );

        let err = run_command(&f.session, CliCommand::Stats { force: true })
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with(MISSING_TOKEN_MESSAGE));
        assert_eq!(f.statistics.calls(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_carries_context() {
        let f = healthy();
        f.chat_api.set_failing(true);

        let err = run_command(
            &f.session,
            CliCommand::Send {
                conversation_id: 4,
                content: "hello".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "Failed to send to conversation 4: Network error: connection reset"
        );
        assert!(f.session.chat().messages(4).is_empty());
    }

    #[tokio::test]
    async fn test_send_returns_confirmed_message() {
        let f = healthy();
        let value = run_command(
            &f.session,
            CliCommand::Send {
                conversation_id: 4,
                content: "hello".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(value["message"]["id"], json!(1000));
        assert_eq!(value["message"]["content"], json!("hello"));
        assert_eq!(
            f.chat_api.calls(),
            vec![ChatCall::Send(4, "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let f = healthy();
        let err = run_command(
            &f.session,
            CliCommand::Send {
                conversation_id: 4,
                content: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Failed to send to conversation 4"));
        assert!(f.chat_api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_conversations_and_messages() {
        let f = healthy();
        f.chat_api.set_conversations(vec![
            conversation(1, Some(5), 2),
            conversation(2, Some(10), 1),
        ]);
        f.chat_api
            .set_page(2, 1, vec![message(7, 2, PEER, 9), message(8, 2, ME, 10)], true);

        let value = run_command(&f.session, CliCommand::Conversations)
            .await
            .unwrap();
        assert_eq!(value["totalUnread"], json!(3));
        assert_eq!(value["conversations"][0]["id"], json!(2));

        let value = run_command(
            &f.session,
            CliCommand::Messages {
                conversation_id: 2,
                page: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(value["hasMore"], json!(true));
        assert_eq!(value["messages"].as_array().map(Vec::len), Some(2));

        let summary = chat_summary(f.session.chat());
        assert_eq!(summary["channel"], json!("chat"));
        assert_eq!(summary["totalUnread"], json!(3));
        assert_eq!(summary["latestConversation"]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_load_failure_bails() {
        let f = healthy();
        f.chat_api.set_failing(true);

        let err = run_command(&f.session, CliCommand::Conversations)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to load conversations: Network error: connection reset"
        );
    }

    #[tokio::test]
    async fn test_mark_read_clears_badge() {
        let f = healthy();
        f.session.chat().add_message(5, message(1, 5, PEER, 1));
        assert_eq!(f.session.chat().total_unread(), 1);

        let value = run_command(&f.session, CliCommand::MarkRead { conversation_id: 5 })
            .await
            .unwrap();
        assert_eq!(value["read"], json!(true));
        assert_eq!(f.session.chat().total_unread(), 0);

        f.chat_api.set_failing(true);
        let err = run_command(&f.session, CliCommand::MarkRead { conversation_id: 5 })
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to mark conversation 5 read"));
    }

    #[tokio::test]
    async fn test_notification_summary_shape() {
        let f = healthy();
        f.session
            .notifications()
            .info("Welcome", None, Default::default());

        let summary = notification_summary(f.session.notifications());
        assert_eq!(summary["channel"], json!("notifications"));
        assert_eq!(summary["unreadCount"], json!(1));
        assert_eq!(summary["latest"]["title"], json!("Welcome"));
    }
}
