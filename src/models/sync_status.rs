//! Sync status model
//!
//! The observable outcome of the most recent persistence operation. No state
//! is terminal: `error` and `offline` recover through an explicit re-sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse persistence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Nothing has happened yet, or data was deleted
    #[default]
    Idle,
    /// A load or save is in flight
    Syncing,
    /// The backend holds the latest state
    Synced,
    /// The last operation failed
    Error,
    /// The backend could not be reached
    Offline,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Synced => write!(f, "synced"),
            Self::Error => write!(f, "error"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Snapshot of a provider's sync state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SyncStatus {
    /// Initial / post-deletion status
    pub fn idle() -> Self {
        Self::default()
    }

    /// An operation is in flight; keeps the last successful sync time
    pub fn syncing(previous: &SyncStatus) -> Self {
        Self {
            state: SyncState::Syncing,
            last_synced_at: previous.last_synced_at,
            error_message: None,
        }
    }

    /// Successful sync at `at`
    pub fn synced(at: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Synced,
            last_synced_at: Some(at),
            error_message: None,
        }
    }

    /// Failed operation; keeps the last successful sync time
    pub fn error(previous: &SyncStatus, message: impl Into<String>) -> Self {
        Self {
            state: SyncState::Error,
            last_synced_at: previous.last_synced_at,
            error_message: Some(message.into()),
        }
    }

    /// Backend unreachable; keeps the last successful sync time
    pub fn offline(previous: &SyncStatus, message: impl Into<String>) -> Self {
        Self {
            state: SyncState::Offline,
            last_synced_at: previous.last_synced_at,
            error_message: Some(message.into()),
        }
    }

    /// Whether an explicit re-sync is the way forward
    pub fn needs_retry(&self) -> bool {
        matches!(self.state, SyncState::Error | SyncState::Offline)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(at) = self.last_synced_at {
            write!(f, " (last synced {})", at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(ref message) = self.error_message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_synced_at.is_none());
        assert!(!status.needs_retry());
    }

    #[test]
    fn test_error_keeps_last_sync_time() {
        let synced = SyncStatus::synced(Utc::now());
        let failed = SyncStatus::error(&synced, "disk full");
        assert_eq!(failed.last_synced_at, synced.last_synced_at);
        assert_eq!(failed.error_message.as_deref(), Some("disk full"));
        assert!(failed.needs_retry());
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(SyncStatus::offline(&SyncStatus::idle(), "no route")).unwrap();
        assert_eq!(json["state"], "offline");
        assert_eq!(json["errorMessage"], "no route");
    }
}
