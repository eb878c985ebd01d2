pub mod auth;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod session;
pub mod store;
pub mod tracing_setup;

/// In-memory collaborators for tests, here and in dependent crates.
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use auth::{AuthContext, SessionAuth};
pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use error::SyncError;
pub use session::AdminSession;
