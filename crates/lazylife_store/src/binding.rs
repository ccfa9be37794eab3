//! Reactive storage binding.
//!
//! # Responsibility
//! - Expose one logical key to one consumer as `(value, setter)`.
//! - Reconcile the exposed value with the medium whenever a change signal
//!   arrives, re-rendering (bumping `revision`) only on real changes.
//! - Follow identity switches eagerly so no cross-identity value leaks.
//!
//! # Invariants
//! - `cached_raw` is the last raw string this binding saw in the medium
//!   or is about to write there. `set_value` replaces it before the write
//!   and restores the previous raw string if the persist fails.
//! - While a write is pending (`pending_raw` is set), same-namespace
//!   reconciliation is skipped, so a poll racing the write cannot expose
//!   the stale stored value.
//! - The session marker key is reserved: a binding attached to it never
//!   persists.
//! - `value()` re-resolves the namespace before returning; if it moved,
//!   the binding re-reads before exposing anything.
//! - Updates run against the latest cached value under the state lock.
//! - No lock is held while writing to the medium, because the write
//!   re-enters this binding through the local change signal.

use crate::accessor::{parse_or_default, StorageAccessor, WriteOutcome};
use crate::context::StorageContext;
use crate::identity::{IdentityResolver, KeyScope};
use crate::notifier::{ChangeListener, ChangeSignal, SubscriptionId};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Values a binding can hold.
pub trait Storable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Storable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Next value for a binding: a literal or a function of the previous one.
pub enum StateUpdate<T> {
    Replace(T),
    With(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> StateUpdate<T> {
    pub fn with(update: impl FnOnce(&T) -> T + Send + 'static) -> Self {
        Self::With(Box::new(update))
    }

    fn apply(self, previous: &T) -> T {
        match self {
            Self::Replace(next) => next,
            Self::With(update) => update(previous),
        }
    }
}

impl<T> From<T> for StateUpdate<T> {
    fn from(value: T) -> Self {
        Self::Replace(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPhase {
    Uninitialized,
    Bound,
    Rebinding,
    Unbound,
}

type Observer<T> = Box<dyn Fn(&T) + Send + Sync>;

struct BindingState<T> {
    phase: BindingPhase,
    namespace: String,
    cached_raw: Option<String>,
    pending_raw: Option<String>,
    value: T,
    revision: u64,
}

struct BindingCell<T: Storable> {
    logical_key: String,
    scope: KeyScope,
    default: T,
    accessor: StorageAccessor,
    resolver: IdentityResolver,
    state: Mutex<BindingState<T>>,
    observers: Mutex<Vec<Observer<T>>>,
}

impl<T: Storable> BindingCell<T> {
    fn state(&self) -> MutexGuard<'_, BindingState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self) -> String {
        self.resolver.resolve(
            self.accessor.medium().as_ref(),
            &self.logical_key,
            self.scope,
        )
    }

    fn load(&self, namespace: &str) -> (Option<String>, T) {
        let raw = self.accessor.read_raw(namespace);
        let value = parse_or_default(namespace, raw.as_deref(), self.default.clone());
        (raw, value)
    }

    /// Swaps to `namespace` and re-reads. Caller holds the state lock.
    fn rebind(&self, state: &mut BindingState<T>, namespace: String) -> T {
        state.phase = BindingPhase::Rebinding;
        debug!(
            "event=binding_rebind module=binding status=ok from={} to={}",
            state.namespace, namespace
        );
        let (raw, value) = self.load(&namespace);
        state.namespace = namespace;
        state.cached_raw = raw;
        state.pending_raw = None;
        state.value = value.clone();
        state.revision += 1;
        state.phase = BindingPhase::Bound;
        value
    }

    /// Rebinds when the identity moved since the last access.
    fn follow_identity(&self) -> Option<T> {
        let fresh = self.resolve();
        let mut state = self.state();
        if state.phase == BindingPhase::Unbound || state.namespace == fresh {
            return None;
        }
        Some(self.rebind(&mut state, fresh))
    }

    fn reconcile(&self, force: bool) -> Option<T> {
        let fresh = self.resolve();
        let mut state = self.state();
        if state.phase == BindingPhase::Unbound {
            return None;
        }
        if state.namespace != fresh {
            return Some(self.rebind(&mut state, fresh));
        }
        if state.pending_raw.is_some() {
            debug!(
                "event=binding_reconcile module=binding status=skipped namespace={} reason=write_pending",
                state.namespace
            );
            return None;
        }

        let raw = self.accessor.read_raw(&state.namespace);
        if !force && raw == state.cached_raw {
            return None;
        }
        let value = parse_or_default(&state.namespace, raw.as_deref(), self.default.clone());
        state.cached_raw = raw;
        state.value = value.clone();
        state.revision += 1;
        Some(value)
    }

    fn notify_observers(&self, value: &T) {
        let observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer(value);
        }
    }
}

impl<T: Storable> ChangeListener for BindingCell<T> {
    fn on_signal(&self, signal: ChangeSignal) {
        if let Some(value) = self.reconcile(signal.forces_reread()) {
            self.notify_observers(&value);
        }
    }
}

/// One consumer's live view of a logical key.
///
/// Dropping the binding unsubscribes it.
pub struct StorageBinding<T: Storable> {
    cell: Arc<BindingCell<T>>,
    context: StorageContext,
    subscription: Option<SubscriptionId>,
}

impl<T: Storable> StorageBinding<T> {
    pub(crate) fn new(
        context: StorageContext,
        logical_key: &str,
        default: T,
        scope: KeyScope,
    ) -> Self {
        let cell = Arc::new(BindingCell {
            logical_key: logical_key.to_string(),
            scope,
            accessor: context.accessor().clone(),
            resolver: context.resolver().clone(),
            state: Mutex::new(BindingState {
                phase: BindingPhase::Uninitialized,
                namespace: String::new(),
                cached_raw: None,
                pending_raw: None,
                value: default.clone(),
                revision: 0,
            }),
            observers: Mutex::new(Vec::new()),
            default,
        });

        {
            let namespace = cell.resolve();
            let (raw, value) = cell.load(&namespace);
            let mut state = cell.state();
            state.namespace = namespace;
            state.cached_raw = raw;
            state.value = value;
            state.phase = BindingPhase::Bound;
        }

        let listener: Arc<dyn ChangeListener> = cell.clone();
        let subscription = context.notifier().subscribe(Arc::downgrade(&listener));

        Self {
            cell,
            context,
            subscription: Some(subscription),
        }
    }

    /// Current value, after following any identity switch.
    pub fn value(&self) -> T {
        if let Some(value) = self.cell.follow_identity() {
            self.cell.notify_observers(&value);
        }
        self.cell.state().value.clone()
    }

    pub fn set(&self, value: T) {
        self.set_value(StateUpdate::Replace(value));
    }

    pub fn update(&self, update: impl FnOnce(&T) -> T + Send + 'static) {
        self.set_value(StateUpdate::with(update));
    }

    /// Applies `update`, exposes the result, and persists it if it changed.
    ///
    /// Never fails: a rejected persist is logged and the in-memory value
    /// still advances. Bindings on the session marker key update in
    /// memory only; use [`SessionManager`](crate::SessionManager) to switch
    /// identities.
    pub fn set_value(&self, update: impl Into<StateUpdate<T>>) {
        if let Some(value) = self.cell.follow_identity() {
            self.cell.notify_observers(&value);
        }

        let (next, pending) = {
            let mut state = self.cell.state();
            let next = update.into().apply(&state.value);
            let pending = match serde_json::to_string(&next) {
                Ok(raw) => {
                    let changed = state.cached_raw.as_deref() != Some(raw.as_str());
                    if state.namespace == self.cell.resolver.session_key() {
                        warn!(
                            "event=binding_set module=binding status=skipped namespace={} reason=reserved_session_key",
                            state.namespace
                        );
                        None
                    } else if changed && state.phase == BindingPhase::Bound {
                        let previous_raw = state.cached_raw.replace(raw.clone());
                        state.pending_raw = Some(raw.clone());
                        Some((state.namespace.clone(), raw, previous_raw))
                    } else {
                        None
                    }
                }
                Err(err) => {
                    warn!(
                        "event=binding_set module=binding status=error namespace={} error_code=serialize_failed error={err}",
                        state.namespace
                    );
                    None
                }
            };
            state.value = next.clone();
            state.revision += 1;
            (next, pending)
        };

        if let Some((namespace, raw, previous_raw)) = pending {
            let outcome = self.cell.accessor.write_raw(&namespace, &raw);
            let mut state = self.cell.state();
            if state.namespace == namespace && state.pending_raw.as_deref() == Some(raw.as_str()) {
                state.pending_raw = None;
                if outcome == WriteOutcome::Failed {
                    state.cached_raw = previous_raw;
                }
            }
        }
        self.cell.notify_observers(&next);
    }

    /// Registers a callback run with the new value after every re-render.
    pub fn on_change(&self, observer: impl Fn(&T) + Send + Sync + 'static) {
        self.cell
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Forces a reconciliation outside the signal path.
    pub fn refresh(&self) {
        self.cell.on_signal(ChangeSignal::Poll);
    }

    /// Stops reacting to signals; later `set` calls stay in memory.
    pub fn unbind(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.context.notifier().unsubscribe(subscription);
            let mut state = self.cell.state();
            state.phase = BindingPhase::Unbound;
            debug!(
                "event=binding_unbind module=binding status=ok namespace={}",
                state.namespace
            );
        }
    }

    pub fn logical_key(&self) -> &str {
        &self.cell.logical_key
    }

    pub fn scope(&self) -> KeyScope {
        self.cell.scope
    }

    /// Namespace the binding is currently attached to.
    pub fn namespace(&self) -> String {
        self.cell.state().namespace.clone()
    }

    pub fn phase(&self) -> BindingPhase {
        self.cell.state().phase
    }

    /// Count of exposed-value changes; a proxy for re-renders.
    pub fn revision(&self) -> u64 {
        self.cell.state().revision
    }
}

impl<T: Storable> Drop for StorageBinding<T> {
    fn drop(&mut self) {
        self.unbind();
    }
}
