//! Idempotency markers for de-duplicating side-effecting commands.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default marker lifetime: 24 hours.
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 60 * 60 * 24;

/// Proof that a named command already ran for a given key.
///
/// Markers expire; after `expires_at` the command may run again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Composite key `"{key}-{command}"`.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Marker expiring `ttl` after `now`, saturating at the latest representable time.
    pub fn new(key: &str, command: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: marker_id(key, command),
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Build the composite marker id for a key and command name.
pub fn marker_id(key: &str, command: &str) -> String {
    format!("{key}-{command}")
}
