//! In-process shared medium with per-context handles.
//!
//! # Responsibility
//! - Hold one key-value map shared by every handle opened from it.
//! - Deliver push notifications to every handle except the writer.
//! - Simulate capacity ceilings and write faults for degraded hosts.
//!
//! # Invariants
//! - Each handle is one context; `open_context` never reuses an id.
//! - Listeners run after the shared lock is released.

use super::{entry_bytes, ExternalListener, MediumError, MediumResult, StorageMedium};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct SharedState {
    items: BTreeMap<String, String>,
    quota_bytes: Option<u64>,
    push_disabled: bool,
    fail_writes: bool,
    next_context_id: u64,
    writes_by_context: BTreeMap<u64, u64>,
    listeners: Vec<(u64, ExternalListener)>,
}

impl SharedState {
    fn used_bytes_except(&self, key: &str) -> u64 {
        self.items
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, value)| entry_bytes(existing, value))
            .sum()
    }

    fn foreign_writes(&self, context_id: u64) -> u64 {
        self.writes_by_context
            .iter()
            .filter(|(id, _)| **id != context_id)
            .map(|(_, count)| *count)
            .sum()
    }

    fn record_write(&mut self, context_id: u64) -> Vec<ExternalListener> {
        *self.writes_by_context.entry(context_id).or_insert(0) += 1;
        if self.push_disabled {
            return Vec::new();
        }
        self.listeners
            .iter()
            .filter(|(id, _)| *id != context_id)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Handle onto a shared in-memory medium, bound to one context.
pub struct MemoryMedium {
    shared: Arc<Mutex<SharedState>>,
    context_id: u64,
    seen_foreign_writes: AtomicU64,
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMedium {
    /// Creates an empty medium and returns the handle for its first context.
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            next_context_id: 1,
            ..SharedState::default()
        }));
        Self {
            shared,
            context_id: 0,
            seen_foreign_writes: AtomicU64::new(0),
        }
    }

    /// Caps the total stored bytes (keys plus values) across all contexts.
    pub fn with_quota(self, quota_bytes: u64) -> Self {
        self.lock().quota_bytes = Some(quota_bytes);
        self
    }

    /// Disables push delivery so only polling observes foreign writes.
    pub fn without_push_events(self) -> Self {
        self.lock().push_disabled = true;
        self
    }

    /// Opens a sibling context over the same stored items.
    pub fn open_context(&self) -> Self {
        let mut state = self.lock();
        let context_id = state.next_context_id;
        state.next_context_id += 1;
        let seen = state.foreign_writes(context_id);
        drop(state);

        Self {
            shared: Arc::clone(&self.shared),
            context_id,
            seen_foreign_writes: AtomicU64::new(seen),
        }
    }

    /// Makes every subsequent write fail until switched off again.
    pub fn fail_writes(&self, enabled: bool) {
        self.lock().fail_writes = enabled;
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Total writes performed through this handle.
    pub fn write_count(&self) -> u64 {
        self.lock()
            .writes_by_context
            .get(&self.context_id)
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StorageMedium for MemoryMedium {
    fn get_item(&self, key: &str) -> MediumResult<Option<String>> {
        Ok(self.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> MediumResult<()> {
        let listeners = {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(MediumError::Unavailable(format!(
                    "writes are disabled for `{key}`"
                )));
            }
            if let Some(quota_bytes) = state.quota_bytes {
                let required_bytes = state.used_bytes_except(key) + entry_bytes(key, value);
                if required_bytes > quota_bytes {
                    return Err(MediumError::QuotaExceeded {
                        key: key.to_string(),
                        required_bytes,
                        quota_bytes,
                    });
                }
            }
            state.items.insert(key.to_string(), value.to_string());
            state.record_write(self.context_id)
        };

        for listener in listeners {
            listener();
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> MediumResult<()> {
        let listeners = {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(MediumError::Unavailable(format!(
                    "writes are disabled for `{key}`"
                )));
            }
            if state.items.remove(key).is_none() {
                return Ok(());
            }
            state.record_write(self.context_id)
        };

        for listener in listeners {
            listener();
        }
        Ok(())
    }

    fn keys(&self) -> MediumResult<Vec<String>> {
        Ok(self.lock().items.keys().cloned().collect())
    }

    fn watch_external(&self, listener: ExternalListener) -> bool {
        let mut state = self.lock();
        if state.push_disabled {
            return false;
        }
        state.listeners.push((self.context_id, listener));
        true
    }

    fn poll_external_change(&self) -> MediumResult<bool> {
        let foreign = self.lock().foreign_writes(self.context_id);
        let previous = self.seen_foreign_writes.swap(foreign, Ordering::SeqCst);
        Ok(previous != foreign)
    }
}

impl Drop for MemoryMedium {
    fn drop(&mut self) {
        let context_id = self.context_id;
        self.lock().listeners.retain(|(id, _)| *id != context_id);
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryMedium;
    use crate::medium::{MediumError, StorageMedium};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sibling_contexts_share_items() {
        let first = MemoryMedium::new();
        let second = first.open_context();

        first.set_item("guest_daily_tasks", "[]").unwrap();
        assert_eq!(
            second.get_item("guest_daily_tasks").unwrap().as_deref(),
            Some("[]")
        );
        assert_ne!(first.context_id(), second.context_id());
    }

    #[test]
    fn push_skips_the_writing_context() {
        let first = MemoryMedium::new();
        let second = first.open_context();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first_hits);
        assert!(first.watch_external(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let counter = Arc::clone(&second_hits);
        assert!(second.watch_external(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        first.set_item("groups", "[]").unwrap();
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poll_reports_foreign_writes_once() {
        let first = MemoryMedium::new().without_push_events();
        let second = first.open_context();

        assert!(!second.watch_external(Arc::new(|| {})));
        assert!(!second.poll_external_change().unwrap());

        first.set_item("groups", "[]").unwrap();
        assert!(second.poll_external_change().unwrap());
        assert!(!second.poll_external_change().unwrap());

        second.set_item("groups", "[1]").unwrap();
        assert!(!second.poll_external_change().unwrap());
        assert!(first.poll_external_change().unwrap());
    }

    #[test]
    fn quota_rejects_oversized_writes_and_keeps_previous_value() {
        let medium = MemoryMedium::new().with_quota(16);
        medium.set_item("k", "small").unwrap();

        let err = medium
            .set_item("k", "this value is far too long")
            .expect_err("quota should reject");
        assert!(matches!(err, MediumError::QuotaExceeded { .. }));
        assert_eq!(medium.get_item("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn removing_missing_key_is_not_a_write() {
        let medium = MemoryMedium::new();
        medium.remove_item("missing").unwrap();
        assert_eq!(medium.write_count(), 0);
    }
}
