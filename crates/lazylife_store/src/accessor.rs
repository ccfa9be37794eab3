//! Keyed storage accessor.
//!
//! # Responsibility
//! - Read and write JSON records under fully resolved namespaces.
//! - Emit one local change signal per write that actually lands.
//!
//! # Invariants
//! - Never returns an error: malformed or missing data yields the caller's
//!   default, and failed writes are logged and reported as `Failed`.
//! - A write whose serialized form equals the stored string is skipped and
//!   emits no signal.

use crate::medium::StorageMedium;
use crate::notifier::ChangeNotifier;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// What happened to a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    Unchanged,
    Failed,
}

#[derive(Clone)]
pub struct StorageAccessor {
    medium: Arc<dyn StorageMedium>,
    notifier: Arc<ChangeNotifier>,
}

impl StorageAccessor {
    pub fn new(medium: Arc<dyn StorageMedium>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { medium, notifier }
    }

    /// Returns the stored string, or `None` when absent or unreadable.
    pub fn read_raw(&self, namespace: &str) -> Option<String> {
        match self.medium.get_item(namespace) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "event=storage_read module=accessor status=error namespace={namespace} error={err}"
                );
                None
            }
        }
    }

    /// Reads and parses `namespace`, falling back to `default`.
    pub fn read<T: DeserializeOwned>(&self, namespace: &str, default: T) -> T {
        let raw = self.read_raw(namespace);
        parse_or_default(namespace, raw.as_deref(), default)
    }

    /// Serializes `value` and stores it when it differs from the stored string.
    pub fn write<T: Serialize>(&self, namespace: &str, value: &T) -> WriteOutcome {
        match serde_json::to_string(value) {
            Ok(raw) => self.write_raw(namespace, &raw),
            Err(err) => {
                warn!(
                    "event=storage_write module=accessor status=error namespace={namespace} error_code=serialize_failed error={err}"
                );
                WriteOutcome::Failed
            }
        }
    }

    /// Stores an already serialized record.
    pub fn write_raw(&self, namespace: &str, raw: &str) -> WriteOutcome {
        if self.read_raw(namespace).as_deref() == Some(raw) {
            debug!(
                "event=storage_write module=accessor status=skipped namespace={namespace} reason=unchanged"
            );
            return WriteOutcome::Unchanged;
        }

        match self.medium.set_item(namespace, raw) {
            Ok(()) => {
                debug!(
                    "event=storage_write module=accessor status=ok namespace={namespace} bytes={}",
                    raw.len()
                );
                self.notifier.notify_local();
                WriteOutcome::Persisted
            }
            Err(err) => {
                warn!(
                    "event=storage_write module=accessor status=error namespace={namespace} error_code=persist_failed error={err}"
                );
                WriteOutcome::Failed
            }
        }
    }

    /// Deletes `namespace`; absent keys are reported as `Unchanged`.
    pub fn remove(&self, namespace: &str) -> WriteOutcome {
        if self.read_raw(namespace).is_none() {
            return WriteOutcome::Unchanged;
        }
        match self.medium.remove_item(namespace) {
            Ok(()) => {
                debug!("event=storage_remove module=accessor status=ok namespace={namespace}");
                self.notifier.notify_local();
                WriteOutcome::Persisted
            }
            Err(err) => {
                warn!(
                    "event=storage_remove module=accessor status=error namespace={namespace} error={err}"
                );
                WriteOutcome::Failed
            }
        }
    }

    pub fn medium(&self) -> &Arc<dyn StorageMedium> {
        &self.medium
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }
}

/// Parses a stored record, logging and substituting `default` on failure.
pub(crate) fn parse_or_default<T: DeserializeOwned>(
    namespace: &str,
    raw: Option<&str>,
    default: T,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "event=storage_parse module=accessor status=error namespace={namespace} fallback=default error={err}"
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StorageAccessor, WriteOutcome};
    use crate::medium::{MemoryMedium, StorageMedium};
    use crate::notifier::ChangeNotifier;
    use std::sync::Arc;

    fn accessor_over(medium: Arc<MemoryMedium>) -> StorageAccessor {
        StorageAccessor::new(medium, Arc::new(ChangeNotifier::new()))
    }

    #[test]
    fn read_returns_default_for_missing_key() {
        let accessor = accessor_over(Arc::new(MemoryMedium::new()));
        let tasks: Vec<String> = accessor.read("guest_daily_tasks", vec!["seed".to_string()]);
        assert_eq!(tasks, vec!["seed".to_string()]);
    }

    #[test]
    fn read_returns_default_for_malformed_json() {
        let medium = Arc::new(MemoryMedium::new());
        medium.set_item("guest_daily_tasks", "{not json").unwrap();
        let accessor = accessor_over(medium);

        let tasks: Vec<String> = accessor.read("guest_daily_tasks", Vec::new());
        assert!(tasks.is_empty());
    }

    #[test]
    fn read_returns_default_for_wrong_shape() {
        let medium = Arc::new(MemoryMedium::new());
        medium.set_item("guest_streak", "\"seven\"").unwrap();
        let accessor = accessor_over(medium);

        assert_eq!(accessor.read::<u32>("guest_streak", 0), 0);
    }

    #[test]
    fn unchanged_write_is_skipped_without_signal() {
        let medium = Arc::new(MemoryMedium::new());
        let accessor = accessor_over(Arc::clone(&medium));

        assert_eq!(accessor.write("guest_n", &3), WriteOutcome::Persisted);
        assert_eq!(accessor.write("guest_n", &3), WriteOutcome::Unchanged);
        assert_eq!(medium.write_count(), 1);
        assert_eq!(accessor.notifier().signals_dispatched(), 1);
    }

    #[test]
    fn failed_write_is_swallowed() {
        let medium = Arc::new(MemoryMedium::new());
        medium.fail_writes(true);
        let accessor = accessor_over(Arc::clone(&medium));

        assert_eq!(accessor.write("guest_n", &3), WriteOutcome::Failed);
        assert_eq!(accessor.notifier().signals_dispatched(), 0);
        assert_eq!(accessor.read("guest_n", 0), 0);
    }

    #[test]
    fn remove_signals_only_when_key_existed() {
        let medium = Arc::new(MemoryMedium::new());
        let accessor = accessor_over(medium);

        assert_eq!(accessor.remove("guest_n"), WriteOutcome::Unchanged);
        accessor.write("guest_n", &1);
        assert_eq!(accessor.remove("guest_n"), WriteOutcome::Persisted);
        assert_eq!(accessor.notifier().signals_dispatched(), 2);
    }
}
