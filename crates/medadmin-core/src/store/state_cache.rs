//! Disk-backed snapshot of the persisted store subsets.
//!
//! Written on logout/shutdown and read back at session start so the
//! dashboard has something to show before the first fetch completes.
//!
//! # Invalidation
//! A saved snapshot is ignored when:
//! - `SCHEMA_VERSION` differs (a persisted type changed shape)
//! - the file is missing or cannot be decoded
//! - it is older than `MAX_STATE_AGE`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SyncError;
use crate::store::{PersistedChat, PersistedNotifications, PersistedStatistics};

/// Bump whenever any type reachable from `PersistedState` changes.
pub const SCHEMA_VERSION: u32 = 1;

const MAX_STATE_AGE_DAYS: i64 = 7;

const STATE_FILE: &str = "session_state.bin";

#[derive(Serialize, Deserialize)]
struct StateEnvelope {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    state: PersistedState,
}

/// Everything that survives a restart, one field per store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub statistics: PersistedStatistics,
    pub notifications: PersistedNotifications,
    pub chat: PersistedChat,
}

pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE)
}

/// Serialize `state` and write it atomically to `<data_dir>/session_state.bin`.
pub fn save_state(
    data_dir: &Path,
    state: PersistedState,
    saved_at: DateTime<Utc>,
) -> Result<(), SyncError> {
    let envelope = StateEnvelope {
        schema_version: SCHEMA_VERSION,
        saved_at,
        state,
    };
    let bytes = bincode::serialize(&envelope).map_err(|e| SyncError::Persist(e.to_string()))?;

    std::fs::create_dir_all(data_dir).map_err(|e| SyncError::Persist(e.to_string()))?;
    let file = state_path(data_dir);
    let temp = file.with_extension("bin.tmp");

    std::fs::write(&temp, &bytes).map_err(|e| SyncError::Persist(e.to_string()))?;
    std::fs::rename(&temp, &file).map_err(|e| SyncError::Persist(e.to_string()))?;
    Ok(())
}

/// Load the saved snapshot, or `None` if there is nothing usable.
pub fn load_state(data_dir: &Path, now: DateTime<Utc>) -> Option<PersistedState> {
    let bytes = std::fs::read(state_path(data_dir)).ok()?;
    let envelope: StateEnvelope = bincode::deserialize(&bytes).ok()?;

    if envelope.schema_version != SCHEMA_VERSION {
        info!(
            cached = envelope.schema_version,
            current = SCHEMA_VERSION,
            "state_cache: schema version mismatch, discarding"
        );
        return None;
    }

    let age = now.signed_duration_since(envelope.saved_at);
    if age > Duration::days(MAX_STATE_AGE_DAYS) {
        info!(age_secs = age.num_seconds(), "state_cache: snapshot too old, discarding");
        return None;
    }

    Some(envelope.state)
}

/// Delete the saved snapshot. A missing file is not an error.
pub fn invalidate_state(data_dir: &Path) {
    let _ = std::fs::remove_file(state_path(data_dir));
}
