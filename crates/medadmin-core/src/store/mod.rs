pub mod cache_entry;
pub mod chat_store;
pub mod notification_store;
pub mod state_cache;
pub mod statistics_store;

pub use cache_entry::CacheEntry;
pub use chat_store::{ChatStore, PersistedChat};
pub use notification_store::{NotificationStore, PersistedNotifications};
pub use state_cache::PersistedState;
pub use statistics_store::{PersistedStatistics, StatisticsStore};
