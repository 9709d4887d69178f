// ── Key registry ──
//
// Tracks which refresh callbacks are interested in which query keys and
// fans out invalidation by key prefix. Pure bookkeeping: no I/O, no
// knowledge of resource types or screens.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, error, trace};

use crate::key::QueryKey;

/// A refresh callback registered under a key.
///
/// The registry only references callbacks; whoever registered one is
/// responsible for unregistering it with the returned token.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`KeyRegistry::register`], used to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    key: QueryKey,
    id: u64,
}

impl RegistrationToken {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Registry of refresh callbacks keyed by [`QueryKey`].
///
/// Cheaply cloneable; clones share the same entries. Construct one per
/// session (or per test) and hand it to subscriptions and mutation
/// controllers.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// key -> (registration id -> callback). Ids are issued in increasing
    /// order, so fan-out within one entry follows registration order.
    entries: DashMap<QueryKey, BTreeMap<u64, RefreshCallback>>,
    next_id: AtomicU64,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback` under `key`, creating the entry if needed.
    pub fn register<F>(&self, key: QueryKey, callback: F) -> RegistrationToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_arc(key, Arc::new(callback))
    }

    /// Like [`register`](Self::register) for an already shared callback.
    pub fn register_arc(&self, key: QueryKey, callback: RefreshCallback) -> RegistrationToken {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries
            .entry(key.clone())
            .or_default()
            .insert(id, callback);
        debug!(key = %key, id, "registered refresh callback");
        RegistrationToken { key, id }
    }

    /// Remove the callback behind `token`. Returns `true` if it was present.
    ///
    /// The entry is dropped once its last callback is gone.
    pub fn unregister(&self, token: &RegistrationToken) -> bool {
        let removed = match self.inner.entries.get_mut(&token.key) {
            Some(mut callbacks) => callbacks.remove(&token.id).is_some(),
            None => false,
        };
        // Re-checked under the shard lock: a concurrent register keeps it alive.
        if self
            .inner
            .entries
            .remove_if(&token.key, |_, callbacks| callbacks.is_empty())
            .is_some()
        {
            trace!(key = %token.key, "removed empty registry entry");
        }
        if removed {
            debug!(key = %token.key, id = token.id, "unregistered refresh callback");
        }
        removed
    }

    /// Invoke every callback registered under a key that starts with
    /// `pattern`. Returns the number of callbacks invoked.
    ///
    /// Matching nothing is a silent no-op.
    pub fn invalidate(&self, pattern: &QueryKey) -> usize {
        self.invalidate_all(std::slice::from_ref(pattern))
    }

    /// Invalidate the union of several patterns. A callback matched by more
    /// than one pattern still runs once.
    pub fn invalidate_all(&self, patterns: &[QueryKey]) -> usize {
        // Snapshot first: no shard lock is held while callbacks run, so a
        // callback may register or unregister without deadlocking.
        let matched = self.collect_matching(patterns);
        debug!(
            patterns = ?patterns.iter().map(ToString::to_string).collect::<Vec<_>>(),
            callbacks = matched.len(),
            "invalidating queries"
        );

        for (key, id, callback) in &matched {
            fire(key, *id, callback);
        }
        matched.len()
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Number of keys with at least one registered callback.
    pub fn entry_count(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn callback_count(&self, key: &QueryKey) -> usize {
        self.inner.entries.get(key).map_or(0, |r| r.value().len())
    }

    /// All keys currently holding an entry, in no particular order.
    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.entries.iter().map(|r| r.key().clone()).collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn collect_matching(&self, patterns: &[QueryKey]) -> Vec<(QueryKey, u64, RefreshCallback)> {
        let mut matched = Vec::new();
        for entry in self.inner.entries.iter() {
            let key = entry.key();
            if !patterns.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            trace!(key = %key, callbacks = entry.value().len(), "key matched");
            matched.extend(
                entry
                    .value()
                    .iter()
                    .map(|(id, cb)| (key.clone(), *id, Arc::clone(cb))),
            );
        }
        matched
    }
}

impl fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("entries", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

/// Run one callback, containing a panic so siblings still run.
fn fire(key: &QueryKey, id: u64, callback: &RefreshCallback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        let reason = panic_reason(payload.as_ref());
        error!(key = %key, id, %reason, "refresh callback panicked during invalidation");
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic>".into())
}
