use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tracing::debug;

/// Per-request cancellation flag. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Process-wide table of in-flight streaming requests, keyed by request id.
/// No two live requests share a key, so a plain mutex around the map is the
/// only synchronization required.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    entries: Mutex<HashMap<String, CancelFlag>>,
}

impl CancelRegistry {
    /// Allocates a fresh unset flag for this request id, replacing any stale
    /// entry, and returns a guard that releases the entry when dropped. Tying
    /// release to drop is what guarantees exactly one release per create on
    /// every exit path, including client disconnects.
    pub fn create(self: &Arc<Self>, request_id: &str) -> CancelGuard {
        let flag = CancelFlag::default();
        self.lock_entries()
            .insert(request_id.to_owned(), flag.clone());
        CancelGuard {
            registry: Arc::clone(self),
            request_id: request_id.to_owned(),
            flag,
        }
    }

    /// Sets the flag for this request id. Returns whether an entry existed.
    pub fn signal(&self, request_id: &str) -> bool {
        let entries = self.lock_entries();
        match entries.get(request_id) {
            Some(flag) => {
                flag.set();
                debug!(request_id, "cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// Removes the entry for this request id; no-op when absent.
    pub fn release(&self, request_id: &str) {
        self.lock_entries().remove(request_id);
    }

    /// Removes the entry only if it still holds this exact flag. A stale
    /// guard whose entry was overwritten by a newer `create` must not tear
    /// down the replacement.
    fn release_owned(&self, request_id: &str, flag: &CancelFlag) {
        let mut entries = self.lock_entries();
        let owns_entry = entries
            .get(request_id)
            .is_some_and(|current| Arc::ptr_eq(&current.0, &flag.0));
        if owns_entry {
            entries.remove(request_id);
        }
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock_entries().contains_key(request_id)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelFlag>> {
        // Lock poisoning only happens if a holder panicked; the map itself
        // stays structurally valid, so keep serving.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped registry entry: releases its request id on drop.
#[derive(Debug)]
pub struct CancelGuard {
    registry: Arc<CancelRegistry>,
    request_id: String,
    flag: CancelFlag,
}

impl CancelGuard {
    pub fn is_set(&self) -> bool {
        self.flag.is_set()
    }

    pub fn flag(&self) -> CancelFlag {
        self.flag.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.release_owned(&self.request_id, &self.flag);
    }
}
