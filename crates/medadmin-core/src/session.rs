//! The signed-in admin session: owns the three stores and their lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{AuthContext, SessionAuth};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::services::{
    ChatApi, ChatChannel, ChatHub, HttpApiClient, NoopToast, NotificationApi, NotificationChannel,
    NotificationHub, StatisticsService, ToastSink,
};
use crate::store::state_cache::{self, PersistedState};
use crate::store::{ChatStore, NotificationStore, StatisticsStore};

/// Everything the stores talk to. `AdminSession::new` builds the production
/// set; tests and embedders can supply their own through `from_parts`.
pub struct Collaborators {
    pub auth: Arc<dyn AuthContext>,
    pub clock: Arc<dyn Clock>,
    pub statistics: Arc<dyn StatisticsService>,
    pub notification_api: Arc<dyn NotificationApi>,
    pub notification_channel: Arc<dyn NotificationChannel>,
    pub chat_api: Arc<dyn ChatApi>,
    pub chat_channel: Arc<dyn ChatChannel>,
    pub toast: Arc<dyn ToastSink>,
}

impl Collaborators {
    pub fn production(config: &SyncConfig, auth: Arc<SessionAuth>) -> Self {
        let auth: Arc<dyn AuthContext> = auth;
        let http = Arc::new(HttpApiClient::new(
            config.api_base_url.clone(),
            config.message_page_size,
            auth.clone(),
        ));
        Self {
            clock: Arc::new(SystemClock),
            statistics: http.clone(),
            notification_api: http.clone(),
            notification_channel: Arc::new(NotificationHub::new(
                config.notification_hub_url.clone(),
                auth.clone(),
                config.max_reconnect_attempts,
            )),
            chat_api: http,
            chat_channel: Arc::new(ChatHub::new(
                config.chat_hub_url.clone(),
                auth.clone(),
                config.max_reconnect_attempts,
            )),
            toast: Arc::new(NoopToast),
            auth,
        }
    }

    pub fn with_toast(mut self, toast: Arc<dyn ToastSink>) -> Self {
        self.toast = toast;
        self
    }
}

/// Explicit replacement for process-wide store singletons.
///
/// Construct once after login, call `init`, hand out clones of the stores,
/// and call `dispose` on logout.
pub struct AdminSession {
    data_dir: PathBuf,
    auth: Arc<dyn AuthContext>,
    clock: Arc<dyn Clock>,
    statistics: StatisticsStore,
    notifications: NotificationStore,
    chat: ChatStore,
}

impl AdminSession {
    pub fn new(config: &SyncConfig, auth: Arc<SessionAuth>) -> Self {
        Self::from_parts(config, Collaborators::production(config, auth))
    }

    pub fn from_parts(config: &SyncConfig, parts: Collaborators) -> Self {
        let statistics =
            StatisticsStore::new(parts.statistics, parts.clock.clone(), config.statistics_ttl());
        let notifications = NotificationStore::new(
            parts.notification_api,
            parts.notification_channel,
            parts.toast,
            parts.clock.clone(),
            config.notification_duration(),
        );
        let chat = ChatStore::new(
            parts.chat_api,
            parts.chat_channel,
            parts.auth.clone(),
            parts.clock.clone(),
        );
        Self {
            data_dir: config.data_dir.clone(),
            auth: parts.auth,
            clock: parts.clock,
            statistics,
            notifications,
            chat,
        }
    }

    pub fn statistics(&self) -> &StatisticsStore {
        &self.statistics
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn chat(&self) -> &ChatStore {
        &self.chat
    }

    /// Restore the saved snapshot and connect both push channels.
    ///
    /// Both channels are attempted; the first failure is returned.
    pub async fn init(&self) -> Result<(), SyncError> {
        self.restore();

        let notifications = self.notifications.initialize().await;
        let chat = self.chat.initialize().await;
        info!(
            notifications_ok = notifications.is_ok(),
            chat_ok = chat.is_ok(),
            "session initialized"
        );
        notifications.and(chat)
    }

    /// Logout path: disconnect, save what should survive, then empty the stores.
    pub async fn dispose(&self) {
        self.notifications.disconnect().await;
        self.chat.disconnect().await;
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to save session state");
        }
        self.statistics.clear();
        self.notifications.clear_all();
        self.chat.clear();
        info!("session disposed");
    }

    pub fn persist(&self) -> Result<(), SyncError> {
        let state = PersistedState {
            statistics: self.statistics.snapshot(),
            notifications: self.notifications.snapshot(),
            chat: self.chat.snapshot(),
        };
        state_cache::save_state(&self.data_dir, state, self.clock.now())
    }

    /// Seed the stores from disk. Returns whether a snapshot was applied.
    pub fn restore(&self) -> bool {
        let Some(state) = state_cache::load_state(&self.data_dir, self.clock.now()) else {
            return false;
        };
        self.statistics.restore(state.statistics);
        self.notifications.restore(state.notifications);
        self.chat.restore(state.chat);
        true
    }

    /// Statistics fetch using the session's token.
    pub async fn refresh_statistics(&self, force: bool) {
        let token = self.auth.token();
        self.statistics.fetch(token.as_deref(), force).await;
    }
}
