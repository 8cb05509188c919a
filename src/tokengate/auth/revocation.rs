use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use tokio::time::interval;
use tracing::{debug, info};

/// How often the background cleanup task scans for expired entries.
const CLEANUP_INTERVAL_SECONDS: u64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct RevocationEntry {
    pub token_id: String,
    pub revoked_by: String,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// The process-wide set of revoked token ids, consulted on every new
/// connection. Entries age out after the retention period (24 hours by
/// default); revoking a token only gates new connections, established relays
/// are left alone.
///
/// The admin plane is responsible for populating this from its persistent
/// store at startup and writing through to it on revoke. The proxy only
/// promises that is_revoked is correct with respect to the revoke/unrevoke
/// calls made on this cache.
pub struct RevocationCache {
    entries: RwLock<FnvHashMap<String, RevocationEntry>>,
    retention: Duration,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(24))
    }

    pub fn with_retention(retention: Duration) -> Self {
        RevocationCache {
            entries: RwLock::new(FnvHashMap::default()),
            retention,
        }
    }

    pub fn revoke(&self, token_id: &str, revoked_by: &str, reason: &str) {
        let entry = RevocationEntry {
            token_id: token_id.to_string(),
            revoked_by: revoked_by.to_string(),
            reason: reason.to_string(),
            revoked_at: Utc::now(),
        };
        info!(token_id, revoked_by, reason, "revoking token");
        self.entries
            .write()
            .unwrap()
            .insert(token_id.to_string(), entry);
    }

    /// Read path for the accept-path decision. Entries past the retention
    /// cutoff are evicted opportunistically and reported as not revoked.
    pub fn is_revoked(&self, token_id: &str) -> bool {
        let cutoff = Utc::now() - self.retention;
        {
            let entries = self.entries.read().unwrap();
            match entries.get(token_id) {
                None => return false,
                Some(entry) if entry.revoked_at > cutoff => return true,
                Some(_) => (), // expired, fall through to evict
            }
        }
        let mut entries = self.entries.write().unwrap();
        // re-check under the write lock, the entry may have been refreshed
        if let Some(entry) = entries.get(token_id) {
            if entry.revoked_at > cutoff {
                return true;
            }
            debug!(token_id, "evicting expired revocation entry");
            entries.remove(token_id);
        }
        false
    }

    /// Returns true if the token was present.
    pub fn unrevoke(&self, token_id: &str) -> bool {
        self.entries.write().unwrap().remove(token_id).is_some()
    }

    pub fn list(&self) -> Vec<RevocationEntry> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    /// Drop every entry older than max_age.
    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.revoked_at > cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "revocation cleanup");
        }
    }

    /// Periodic cleanup with the retention cutoff, run for the life of the process.
    pub async fn cleanup_task(self: Arc<Self>) {
        let mut interval = interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            self.cleanup(self.retention);
        }
    }
}

impl Default for RevocationCache {
    fn default() -> Self {
        Self::new()
    }
}
