//! In-process backend for tests, demos, and offline development.

use super::backend::{
    AuthSession, Credentials, RemoteBackend, RemoteChange, RemoteChangeKind, RemoteError,
    RemoteListener, RemoteResult, RemoteRow, RemoteSubscriptionId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

struct Account {
    password: String,
    user_id: String,
}

#[derive(Default)]
struct BackendState {
    tables: BTreeMap<String, BTreeMap<String, RemoteRow>>,
    listeners: BTreeMap<RemoteSubscriptionId, (String, RemoteListener)>,
    accounts: BTreeMap<String, Account>,
    session: Option<AuthSession>,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    next_subscription: AtomicU64,
    upserts: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_account(&self, email: &str, password: &str, user_id: &str) {
        self.lock().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                password: password.to_string(),
                user_id: user_id.to_string(),
            },
        );
    }

    /// Simulates a network outage: every call fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Successful upserts since creation.
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> RemoteResult<MutexGuard<'_, BackendState>> {
        let state = self.lock();
        if state.offline {
            return Err(RemoteError::new(
                "network_unavailable",
                "backend is unreachable",
                true,
            ));
        }
        Ok(state)
    }

    fn dispatch(&self, listeners: Vec<RemoteListener>, change: RemoteChange) {
        for listener in listeners {
            listener(&change);
        }
    }
}

fn listeners_for(state: &BackendState, table: &str) -> Vec<RemoteListener> {
    state
        .listeners
        .values()
        .filter(|(watched, _)| watched == table)
        .map(|(_, listener)| Arc::clone(listener))
        .collect()
}

impl RemoteBackend for MemoryBackend {
    fn upsert(&self, table: &str, row: RemoteRow) -> RemoteResult<()> {
        let key = row.key.clone();
        let listeners = {
            let mut state = self.online()?;
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .insert(key.clone(), row);
            listeners_for(&state, table)
        };
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.dispatch(
            listeners,
            RemoteChange {
                table: table.to_string(),
                key,
                kind: RemoteChangeKind::Upsert,
            },
        );
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> RemoteResult<()> {
        let listeners = {
            let mut state = self.online()?;
            let removed = state
                .tables
                .get_mut(table)
                .and_then(|rows| rows.remove(key))
                .is_some();
            if !removed {
                return Ok(());
            }
            listeners_for(&state, table)
        };
        self.dispatch(
            listeners,
            RemoteChange {
                table: table.to_string(),
                key: key.to_string(),
                kind: RemoteChangeKind::Delete,
            },
        );
        Ok(())
    }

    fn select(&self, table: &str) -> RemoteResult<Vec<RemoteRow>> {
        let state = self.online()?;
        Ok(state
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe(
        &self,
        table: &str,
        listener: RemoteListener,
    ) -> RemoteResult<RemoteSubscriptionId> {
        let mut state = self.online()?;
        let id = RemoteSubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        state.listeners.insert(id, (table.to_string(), listener));
        Ok(id)
    }

    fn unsubscribe(&self, id: RemoteSubscriptionId) {
        self.lock().listeners.remove(&id);
    }

    fn sign_in(&self, credentials: &Credentials) -> RemoteResult<AuthSession> {
        let mut state = self.online()?;
        let user_id = state
            .accounts
            .get(&credentials.email.trim().to_ascii_lowercase())
            .filter(|account| account.password == credentials.password)
            .map(|account| account.user_id.clone())
            .ok_or_else(|| RemoteError::new("auth_failed", "invalid email or password", false))?;
        let session = AuthSession {
            user_id,
            access_token: Uuid::new_v4().to_string(),
        };
        state.session = Some(session.clone());
        Ok(session)
    }

    fn sign_out(&self) -> RemoteResult<()> {
        self.online()?.session = None;
        Ok(())
    }

    fn current_session(&self) -> Option<AuthSession> {
        self.lock().session.clone()
    }
}
