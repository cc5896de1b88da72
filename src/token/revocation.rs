//! Revocation set keyed by jti. Entries mirror the token's own expiry so
//! purging is garbage collection, never a correctness concern.

use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub struct RevocationEntry {
    pub jti: String,
    pub revoked_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub reason: String,
    pub revoked_by: String,
}

/// Explicit keyed store shared across requests; constructed once and passed
/// into the token service rather than living as an ambient singleton.
#[derive(Debug, Default)]
pub struct RevocationSet {
    entries: Mutex<HashMap<String, RevocationEntry>>,
}

impl RevocationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: the first revocation wins, later calls are no-ops.
    pub async fn revoke(&self, entry: RevocationEntry) {
        let mut entries = self.entries.lock().await;
        entries.entry(entry.jti.clone()).or_insert(entry);
    }

    pub async fn contains(&self, jti: &str) -> bool {
        let entries = self.entries.lock().await;
        entries.contains_key(jti)
    }

    pub async fn get(&self, jti: &str) -> Option<RevocationEntry> {
        let entries = self.entries.lock().await;
        entries.get(jti).cloned()
    }

    /// Drop entries whose token has already expired. Best effort.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn entry(jti: &str, now: OffsetDateTime, reason: &str) -> RevocationEntry {
        RevocationEntry {
            jti: jti.to_string(),
            revoked_at: now,
            expires_at: now + Duration::hours(1),
            reason: reason.to_string(),
            revoked_by: "tests".to_string(),
        }
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let set = RevocationSet::new();
        let now = OffsetDateTime::UNIX_EPOCH;
        set.revoke(entry("jti-1", now, "logout")).await;
        set.revoke(entry("jti-1", now + Duration::minutes(5), "superseded"))
            .await;

        assert_eq!(set.len().await, 1);
        let stored = set.get("jti-1").await.expect("entry");
        assert_eq!(stored.reason, "logout");
        assert_eq!(stored.revoked_at, now);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let set = RevocationSet::new();
        let now = OffsetDateTime::UNIX_EPOCH;
        set.revoke(entry("old", now - Duration::hours(2), "logout"))
            .await;
        set.revoke(entry("fresh", now, "logout")).await;

        let removed = set.purge_expired(now).await;
        assert_eq!(removed, 1);
        assert!(!set.contains("old").await);
        assert!(set.contains("fresh").await);
    }
}
