/// Permission Cache
///
/// Short-TTL boolean cache in front of the permission resolver, keyed by
/// `(user_id, permission)`. Constructed once at startup and handed to the
/// middleware by reference; there is no process-global instance. An entry
/// past its TTL is a miss, never a "maybe".

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    allowed: bool,
    expires_at: Instant,
}

pub struct PermissionCache {
    ttl: Duration,
    entries: Mutex<HashMap<(Uuid, String), CacheEntry>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Default 5-minute TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    // Entries are plain booleans, so a poisoned lock carries no torn state;
    // recover the guard rather than failing permission checks process-wide.
    fn lock(&self) -> MutexGuard<'_, HashMap<(Uuid, String), CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a cached decision. Expired entries are dropped and reported
    /// as a miss.
    pub fn get(&self, user_id: Uuid, permission: &str) -> Option<bool> {
        let key = (user_id, permission.to_string());
        let mut entries = self.lock();

        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.allowed),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, user_id: Uuid, permission: &str, allowed: bool) {
        let entry = CacheEntry {
            allowed,
            expires_at: Instant::now() + self.ttl,
        };
        self.lock().insert((user_id, permission.to_string()), entry);
    }

    /// Drop every entry for a user. Called when the user's role or
    /// permission assignments change; the next check re-queries the
    /// resolver.
    pub fn invalidate_for_user(&self, user_id: Uuid) {
        self.lock().retain(|(cached_user, _), _| *cached_user != user_id);
    }

    /// Housekeeping: drop entries past their TTL.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock().retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
