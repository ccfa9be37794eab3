//! One execution context over a shared medium.
//!
//! # Responsibility
//! - Wire a medium handle, its notifier, accessor, and identity resolver.
//! - Turn medium push events into `CrossContext` signals.
//! - Drive the visibility-aware polling safety net.
//!
//! # Invariants
//! - Polling never dispatches while the context is hidden.
//! - Becoming visible again triggers one immediate reconciliation.
//! - Push events are a latency optimization only; `poll_once` alone must
//!   converge every binding.

use crate::accessor::StorageAccessor;
use crate::binding::{Storable, StorageBinding};
use crate::config::StoreConfig;
use crate::identity::{Identity, IdentityResolver, KeyScope, SessionManager};
use crate::medium::StorageMedium;
use crate::notifier::{ChangeNotifier, ChangeSignal};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

pub(crate) struct ContextInner {
    medium: Arc<dyn StorageMedium>,
    notifier: Arc<ChangeNotifier>,
    accessor: StorageAccessor,
    resolver: IdentityResolver,
    visible: AtomicBool,
    push_enabled: bool,
    poll_interval: Duration,
}

/// Cheaply cloneable handle to one context.
#[derive(Clone)]
pub struct StorageContext {
    inner: Arc<ContextInner>,
}

impl StorageContext {
    pub fn new(medium: Arc<dyn StorageMedium>) -> Self {
        Self::with_config(medium, &StoreConfig::default())
    }

    pub fn with_config(medium: Arc<dyn StorageMedium>, config: &StoreConfig) -> Self {
        let notifier = Arc::new(ChangeNotifier::new());
        let weak_notifier = Arc::downgrade(&notifier);
        let push_enabled = medium.watch_external(Arc::new(move || {
            if let Some(notifier) = weak_notifier.upgrade() {
                notifier.notify(ChangeSignal::CrossContext);
            }
        }));
        debug!(
            "event=context_open module=context status=ok push_enabled={push_enabled} poll_interval_ms={}",
            config.poll_interval_ms
        );

        Self {
            inner: Arc::new(ContextInner {
                accessor: StorageAccessor::new(Arc::clone(&medium), Arc::clone(&notifier)),
                medium,
                notifier,
                resolver: IdentityResolver::new(config.session_key.clone()),
                visible: AtomicBool::new(true),
                push_enabled,
                poll_interval: config.poll_interval(),
            }),
        }
    }

    /// Binds a consumer to `logical_key`; see [`StorageBinding`].
    ///
    /// A global binding on the session key is read-only in effect: its
    /// `set` calls stay in memory.
    pub fn bind<T: Storable>(
        &self,
        logical_key: &str,
        default: T,
        scope: KeyScope,
    ) -> StorageBinding<T> {
        StorageBinding::new(self.clone(), logical_key, default, scope)
    }

    pub fn accessor(&self) -> &StorageAccessor {
        &self.inner.accessor
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.inner.notifier
    }

    pub fn medium(&self) -> &Arc<dyn StorageMedium> {
        &self.inner.medium
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.inner.resolver
    }

    pub fn resolve_namespace(&self, logical_key: &str, scope: KeyScope) -> String {
        self.inner
            .resolver
            .resolve(self.inner.medium.as_ref(), logical_key, scope)
    }

    pub fn identity(&self) -> Identity {
        self.inner.resolver.identity(self.inner.medium.as_ref())
    }

    pub fn session(&self) -> SessionManager<'_> {
        SessionManager::new(self)
    }

    /// Whether the medium pushes foreign writes to this context.
    pub fn supports_push(&self) -> bool {
        self.inner.push_enabled
    }

    pub fn visibility(&self) -> Visibility {
        if self.inner.visible.load(Ordering::SeqCst) {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }

    /// Updates visibility; returning to the foreground reconciles at once.
    pub fn set_visibility(&self, visibility: Visibility) {
        let now_visible = visibility == Visibility::Visible;
        let was_visible = self.inner.visible.swap(now_visible, Ordering::SeqCst);
        if now_visible && !was_visible {
            debug!("event=context_visible module=context status=ok action=reconcile");
            self.poll_once();
        }
    }

    /// Runs one reconciliation cycle; returns `false` when hidden.
    pub fn poll_once(&self) -> bool {
        if self.visibility() == Visibility::Hidden {
            return false;
        }
        let external = match self.inner.medium.poll_external_change() {
            Ok(changed) => changed,
            Err(err) => {
                warn!("event=context_poll module=context status=error error={err}");
                false
            }
        };
        let signal = if external {
            ChangeSignal::CrossContext
        } else {
            ChangeSignal::Poll
        };
        self.inner.notifier.notify(signal);
        true
    }

    /// Starts the periodic poll on a background thread.
    ///
    /// The thread stops when the returned handle is dropped or when every
    /// other handle to this context is gone.
    pub fn start_polling(&self) -> PollHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let weak: Weak<ContextInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.poll_interval;
        info!(
            "event=poll_start module=context status=ok interval_ms={}",
            interval.as_millis()
        );

        let join = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    StorageContext { inner }.poll_once();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        PollHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// Owns the polling thread; dropping it stops the timer.
pub struct PollHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("event=poll_stop module=context status=error reason=thread_panicked");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
