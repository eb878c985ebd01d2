//! Notification list with read/unread bookkeeping.
//!
//! Most recent first. `unread_count` is adjusted in the same critical section
//! as every list mutation, so it always matches the number of unread entries
//! (until the server overwrites it through `set_unread_count`).
//!
//! Non-persistent notifications are removed by a per-id timer task. Removing
//! an entry early aborts its timer; a timer that fires anyway finds nothing
//! to remove.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::NotificationEvent;
use crate::models::{
    ConnectionStatus, Notification, NotificationDraft, NotificationKind, NotifyOptions,
};
use crate::services::{NotificationApi, NotificationChannel, ToastSink};

/// Persisted subset: persistent notifications only, since transient ones
/// would come back without their expiry timers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedNotifications {
    pub notifications: Vec<Notification>,
}

#[derive(Default)]
struct NotificationState {
    notifications: Vec<Notification>,
    unread_count: usize,
    connection: ConnectionStatus,
    is_loading: bool,
    error: Option<String>,
}

/// Result of merging a batch into the list.
#[derive(Debug, Default)]
struct Merged {
    added: usize,
    /// Newly added non-persistent entries and when each one expires
    expiring: Vec<(String, Duration)>,
}

impl NotificationState {
    /// Insert entries whose id is not present yet, keeping newest first.
    /// The first occurrence of an id wins, within the batch too.
    fn merge(&mut self, incoming: Vec<Notification>, default_duration: Duration) -> Merged {
        let mut known: HashSet<String> = self.notifications.iter().map(|n| n.id.clone()).collect();
        let mut merged = Merged::default();
        for mut notification in incoming {
            if !known.insert(notification.id.clone()) {
                continue;
            }
            if !notification.persistent {
                let after = notification.duration.unwrap_or(default_duration);
                notification.duration = Some(after);
                merged.expiring.push((notification.id.clone(), after));
            }
            if !notification.is_read {
                self.unread_count += 1;
            }
            self.notifications.push(notification);
            merged.added += 1;
        }
        if merged.added > 0 {
            self.notifications
                .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        merged
    }
}

struct Inner {
    api: Arc<dyn NotificationApi>,
    channel: Arc<dyn NotificationChannel>,
    toast: Arc<dyn ToastSink>,
    clock: Arc<dyn Clock>,
    default_duration: Duration,
    state: Mutex<NotificationState>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    revision: watch::Sender<u64>,
}

impl Inner {
    fn changed(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<Inner>,
}

impl NotificationStore {
    pub fn new(
        api: Arc<dyn NotificationApi>,
        channel: Arc<dyn NotificationChannel>,
        toast: Arc<dyn ToastSink>,
        clock: Arc<dyn Clock>,
        default_duration: Duration,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                api,
                channel,
                toast,
                clock,
                default_duration,
                state: Mutex::new(NotificationState::default()),
                timers: Mutex::new(HashMap::new()),
                listener: tokio::sync::Mutex::new(None),
                revision,
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    // ===== Getters =====

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.state.lock().notifications.clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner
            .state
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.state.lock().unread_count
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.lock().connection.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    pub fn filter_by_type(&self, kind: NotificationKind) -> Vec<Notification> {
        self.filtered(|n| n.kind == kind)
    }

    pub fn filter_unread(&self) -> Vec<Notification> {
        self.filtered(|n| !n.is_read)
    }

    pub fn filter_by_role(&self, role: &str) -> Vec<Notification> {
        self.filtered(|n| n.is_visible_to(role))
    }

    fn filtered(&self, predicate: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        self.inner
            .state
            .lock()
            .notifications
            .iter()
            .filter(|n| predicate(n))
            .cloned()
            .collect()
    }

    // ===== Mutations =====

    /// Add a notification and return its generated id.
    pub fn add(&self, draft: NotificationDraft) -> String {
        let id = Uuid::new_v4().to_string();
        let expires_after = if draft.persistent {
            None
        } else {
            Some(draft.duration.unwrap_or(self.inner.default_duration))
        };

        let mut notification = draft.into_notification(id.clone(), self.inner.clock.now());
        notification.duration = expires_after;
        let toast_kind = notification.kind;
        let toast_text = notification.toast_text();

        {
            let mut state = self.inner.state.lock();
            if !notification.is_read {
                state.unread_count += 1;
            }
            state.notifications.insert(0, notification);
        }

        if let Some(after) = expires_after {
            self.schedule_expiry(&id, after);
        }

        if let Err(e) = self.inner.toast.show(toast_kind, &toast_text) {
            debug!(error = %e, "toast rendering failed");
        }

        self.inner.changed();
        id
    }

    pub fn success(&self, title: &str, message: Option<&str>, options: NotifyOptions) -> String {
        self.notify(NotificationKind::Success, title, message, options, false)
    }

    /// Errors stay until dismissed unless `options.persistent` says otherwise.
    pub fn error(&self, title: &str, message: Option<&str>, options: NotifyOptions) -> String {
        self.notify(NotificationKind::Error, title, message, options, true)
    }

    pub fn warning(&self, title: &str, message: Option<&str>, options: NotifyOptions) -> String {
        self.notify(NotificationKind::Warning, title, message, options, false)
    }

    pub fn info(&self, title: &str, message: Option<&str>, options: NotifyOptions) -> String {
        self.notify(NotificationKind::Info, title, message, options, false)
    }

    fn notify(
        &self,
        kind: NotificationKind,
        title: &str,
        message: Option<&str>,
        options: NotifyOptions,
        persistent_by_default: bool,
    ) -> String {
        let draft = NotificationDraft {
            kind,
            title: title.to_string(),
            message: message.map(str::to_string),
            is_read: false,
            persistent: options.persistent.unwrap_or(persistent_by_default),
            duration: options.duration,
            roles: options.roles,
        };
        self.add(draft)
    }

    /// Remove one entry. Unknown ids are ignored.
    pub fn remove(&self, id: &str) {
        if let Some(timer) = self.inner.timers.lock().remove(id) {
            timer.abort();
        }
        self.remove_entry(id);
    }

    fn remove_entry(&self, id: &str) -> bool {
        {
            let mut state = self.inner.state.lock();
            let Some(pos) = state.notifications.iter().position(|n| n.id == id) else {
                return false;
            };
            let removed = state.notifications.remove(pos);
            if !removed.is_read {
                state.unread_count = state.unread_count.saturating_sub(1);
            }
        }
        self.inner.changed();
        true
    }

    pub fn mark_as_read(&self, id: &str) {
        {
            let mut state = self.inner.state.lock();
            let Some(notification) = state
                .notifications
                .iter_mut()
                .find(|n| n.id == id && !n.is_read)
            else {
                return;
            };
            notification.is_read = true;
            state.unread_count = state.unread_count.saturating_sub(1);
        }
        self.inner.changed();
    }

    pub fn mark_all_as_read(&self) {
        {
            let mut state = self.inner.state.lock();
            for notification in state.notifications.iter_mut() {
                notification.is_read = true;
            }
            state.unread_count = 0;
        }
        self.inner.changed();
    }

    pub fn clear_all(&self) {
        for (_, timer) in self.inner.timers.lock().drain() {
            timer.abort();
        }
        {
            let mut state = self.inner.state.lock();
            state.notifications.clear();
            state.unread_count = 0;
        }
        self.inner.changed();
    }

    /// Authoritative counter pushed by the server.
    pub fn set_unread_count(&self, count: usize) {
        self.inner.state.lock().unread_count = count;
        self.inner.changed();
    }

    fn set_connection_status(&self, status: ConnectionStatus) {
        self.inner.state.lock().connection = status;
        self.inner.changed();
    }

    fn schedule_expiry(&self, id: &str, after: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id, "no async runtime; notification will not auto-expire");
            return;
        };

        // Hold the map lock while spawning so a zero-length timer cannot
        // finish before its handle is recorded.
        let mut timers = self.inner.timers.lock();
        let weak = Arc::downgrade(&self.inner);
        let key = id.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(store) = NotificationStore::from_weak(&weak) {
                store.expire(&key);
            }
        });
        timers.insert(id.to_string(), handle);
    }

    fn expire(&self, id: &str) {
        self.inner.timers.lock().remove(id);
        if self.remove_entry(id) {
            debug!(id, "notification expired");
        }
    }

    // ===== Server sync =====

    /// Pull the server's notification list and merge it in by id. New
    /// non-persistent entries expire like locally added ones.
    pub async fn fetch_notifications(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_loading = true;
            state.error = None;
        }
        self.inner.changed();

        let result = self.inner.api.get_notifications().await;

        let expiring = {
            let mut state = self.inner.state.lock();
            state.is_loading = false;
            match result {
                Ok(notifications) => {
                    let merged = state.merge(notifications, self.inner.default_duration);
                    debug!(added = merged.added, "merged server notifications");
                    merged.expiring
                }
                Err(e) => {
                    warn!(error = %e, "failed to load notifications");
                    state.error = Some(e.to_string());
                    Vec::new()
                }
            }
        };
        for (id, after) in expiring {
            self.schedule_expiry(&id, after);
        }
        self.inner.changed();
    }

    /// Mark read on the server, then locally. Local state is untouched on failure.
    pub async fn acknowledge(&self, id: &str) -> Result<(), SyncError> {
        match self.inner.api.mark_as_read(id).await {
            Ok(()) => {
                self.mark_as_read(id);
                Ok(())
            }
            Err(e) => Err(self.record_error(e)),
        }
    }

    pub async fn acknowledge_all(&self) -> Result<(), SyncError> {
        match self.inner.api.mark_all_as_read().await {
            Ok(()) => {
                self.mark_all_as_read();
                Ok(())
            }
            Err(e) => Err(self.record_error(e)),
        }
    }

    fn record_error(&self, e: SyncError) -> SyncError {
        warn!(error = %e, "notification request failed");
        self.inner.state.lock().error = Some(e.to_string());
        self.inner.changed();
        e
    }

    // ===== Live channel =====

    /// Single entry point for pushed events.
    pub fn handle_event(&self, event: NotificationEvent) {
        match event {
            NotificationEvent::NotificationAdded(draft) => {
                self.add(draft);
            }
            NotificationEvent::UnreadCountChanged(count) => self.set_unread_count(count),
            NotificationEvent::ConnectionStatus(status) => self.set_connection_status(status),
        }
    }

    /// Connect the push channel and start dispatching its events.
    /// A second call while the listener is alive does nothing.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        let mut listener = self.inner.listener.lock().await;
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("notification channel already initialized");
            return Ok(());
        }

        let mut events = match self.inner.channel.connect().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "notification channel connect failed");
                return Err(e);
            }
        };

        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(store) = NotificationStore::from_weak(&weak) else {
                    break;
                };
                store.handle_event(event);
            }
        }));
        info!("notification channel initialized");
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut listener = self.inner.listener.lock().await;
        if let Some(task) = listener.take() {
            task.abort();
        }
        if let Err(e) = self.inner.channel.disconnect().await {
            warn!(error = %e, "notification channel disconnect failed");
        }
        self.set_connection_status(ConnectionStatus::disconnected());
        info!("notification channel disconnected");
    }

    // ===== Persistence =====

    pub fn snapshot(&self) -> PersistedNotifications {
        PersistedNotifications {
            notifications: self.filtered(|n| n.persistent),
        }
    }

    pub fn restore(&self, persisted: PersistedNotifications) {
        let merged = self.inner.state.lock().merge(
            persisted
                .notifications
                .into_iter()
                .filter(|n| n.persistent)
                .collect(),
            self.inner.default_duration,
        );
        if merged.added > 0 {
            self.inner.changed();
        }
    }
}
