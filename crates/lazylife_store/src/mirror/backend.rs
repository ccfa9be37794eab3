//! Remote backend contract.
//!
//! Backends expose row storage by table, change subscriptions, and an auth
//! session. Implementations may block; mirrors decide where to run them.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Error envelope returned by backend calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Stable machine-readable code (`network_unavailable`, `auth_failed`, ...).
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for RemoteError {}

/// One mirrored row: entity key, owning identity, serialized snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub key: String,
    pub owner: Option<String>,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteChangeKind {
    Upsert,
    Delete,
}

/// Change notification pushed by a backend subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub table: String,
    pub key: String,
    pub kind: RemoteChangeKind,
}

pub type RemoteListener = Arc<dyn Fn(&RemoteChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemoteSubscriptionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

pub trait RemoteBackend: Send + Sync {
    fn upsert(&self, table: &str, row: RemoteRow) -> RemoteResult<()>;
    fn delete(&self, table: &str, key: &str) -> RemoteResult<()>;
    fn select(&self, table: &str) -> RemoteResult<Vec<RemoteRow>>;
    fn subscribe(&self, table: &str, listener: RemoteListener)
        -> RemoteResult<RemoteSubscriptionId>;
    fn unsubscribe(&self, id: RemoteSubscriptionId);
    fn sign_in(&self, credentials: &Credentials) -> RemoteResult<AuthSession>;
    fn sign_out(&self) -> RemoteResult<()>;
    fn current_session(&self) -> Option<AuthSession>;
}
