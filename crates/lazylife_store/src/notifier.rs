//! In-process change signals.
//!
//! # Responsibility
//! - Fan a content-less change signal out to every live listener of one
//!   context.
//!
//! # Invariants
//! - Listeners are held weakly; a dropped binding never keeps firing.
//! - Dispatch happens with the registry lock released, so listeners may
//!   subscribe, unsubscribe, or read storage from inside the callback.

use log::trace;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Why a listener is being asked to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// A write happened in this context.
    Local,
    /// The medium reported a write from another context.
    CrossContext,
    /// Periodic safety-net check.
    Poll,
    /// The active identity switched; namespaces may now differ.
    IdentityChanged,
}

impl ChangeSignal {
    /// Identity switches bypass the unchanged-raw-value short circuit.
    pub fn forces_reread(self) -> bool {
        matches!(self, Self::IdentityChanged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::CrossContext => "cross_context",
            Self::Poll => "poll",
            Self::IdentityChanged => "identity_changed",
        }
    }
}

pub trait ChangeListener: Send + Sync {
    fn on_signal(&self, signal: ChangeSignal);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Mutex<BTreeMap<SubscriptionId, Weak<dyn ChangeListener>>>,
    next_id: AtomicU64,
    dispatched: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registry().insert(id, listener);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry().remove(&id);
    }

    /// Number of listeners that are still alive.
    pub fn listener_count(&self) -> usize {
        self.registry()
            .values()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    /// Total signals dispatched since creation.
    pub fn signals_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn notify_local(&self) {
        self.notify(ChangeSignal::Local);
    }

    pub fn notify(&self, signal: ChangeSignal) {
        let live: Vec<Arc<dyn ChangeListener>> = {
            let mut registry = self.registry();
            registry.retain(|_, listener| listener.strong_count() > 0);
            registry.values().filter_map(Weak::upgrade).collect()
        };
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        trace!(
            "event=change_signal module=notifier status=ok signal={} listeners={}",
            signal.as_str(),
            live.len()
        );

        for listener in live {
            listener.on_signal(signal);
        }
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, Weak<dyn ChangeListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
