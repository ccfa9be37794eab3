//! Persistence medium contracts.
//!
//! # Responsibility
//! - Define the synchronous string-to-string store every context shares.
//! - Define how a medium reports writes made by sibling contexts.
//!
//! # Invariants
//! - A context is never told about its own writes through the external
//!   channel; same-context signals are the notifier's job.
//! - Capacity overflows surface as `MediumError::QuotaExceeded` and leave
//!   the stored value untouched.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryMedium;
pub use sqlite::SqliteMedium;

pub type MediumResult<T> = Result<T, MediumError>;

/// Callback invoked when another context wrote to the shared medium.
///
/// Carries no payload: listeners must re-read to learn what changed.
pub type ExternalListener = Arc<dyn Fn() + Send + Sync>;

/// Failures raised by a persistence medium.
#[derive(Debug)]
pub enum MediumError {
    QuotaExceeded {
        key: String,
        required_bytes: u64,
        quota_bytes: u64,
    },
    Unavailable(String),
    Db(DbError),
}

impl Display for MediumError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded {
                key,
                required_bytes,
                quota_bytes,
            } => write!(
                f,
                "storage quota exceeded writing `{key}`: {required_bytes} bytes needed, {quota_bytes} allowed"
            ),
            Self::Unavailable(message) => write!(f, "storage unavailable: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MediumError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::QuotaExceeded { .. } | Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for MediumError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MediumError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Synchronous key-value store shared by all contexts of one profile.
pub trait StorageMedium: Send + Sync {
    fn get_item(&self, key: &str) -> MediumResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> MediumResult<()>;
    fn remove_item(&self, key: &str) -> MediumResult<()>;
    /// Returns every stored key in ascending order.
    fn keys(&self) -> MediumResult<Vec<String>>;

    /// Registers a push listener for writes made by other contexts.
    ///
    /// Returns `false` when the medium cannot push; callers then rely on
    /// `poll_external_change` alone.
    fn watch_external(&self, listener: ExternalListener) -> bool {
        let _ = listener;
        false
    }

    /// Returns whether another context wrote since the previous call.
    fn poll_external_change(&self) -> MediumResult<bool> {
        Ok(false)
    }
}

pub(crate) fn entry_bytes(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}
