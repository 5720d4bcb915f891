//! Ephemeral (in-process) permission tier.
//!
//! Shared across concurrent invocations in the same process, so every access
//! goes through the mutex. Entries are replaced wholesale, and every write
//! drops entries that have already expired so the map stays bounded by the
//! subjects seen within one TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::services::permissions::store::CachedPermission;

#[derive(Clone, Debug, Default)]
pub struct EphemeralCache {
    inner: Arc<Mutex<HashMap<String, CachedPermission>>>,
}

impl EphemeralCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup; freshness is the caller's decision.
    pub fn get(&self, subject_id: &str) -> Option<CachedPermission> {
        self.lock().get(subject_id).cloned()
    }

    pub fn put(&self, entry: CachedPermission) {
        let now = Utc::now();
        let mut map = self.lock();
        map.retain(|_, held| held.is_fresh(now));
        map.insert(entry.subject_id.clone(), entry);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedPermission>> {
        // A poisoned map still holds whole entries (inserts are single operations)
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
