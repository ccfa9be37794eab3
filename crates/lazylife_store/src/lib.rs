//! Local-first reactive storage for LazyLife.
//!
//! Every screen reads and writes state through this crate: records are
//! namespaced by the active identity, kept in a shared key-value medium,
//! reconciled across contexts by change signals plus a polling safety net,
//! and mirrored best-effort to a remote backend.

pub mod accessor;
pub mod binding;
pub mod config;
pub mod context;
pub mod db;
pub mod identity;
pub mod logging;
pub mod medium;
pub mod mirror;
pub mod notifier;

pub use accessor::{StorageAccessor, WriteOutcome};
pub use binding::{BindingPhase, StateUpdate, Storable, StorageBinding};
pub use config::{ConfigError, StoreConfig};
pub use context::{PollHandle, StorageContext, Visibility};
pub use identity::{
    namespace_for, Identity, IdentityResolver, KeyScope, SessionError, SessionManager,
    GUEST_IDENTITY,
};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LoggingError,
};
pub use medium::{MediumError, MediumResult, MemoryMedium, SqliteMedium, StorageMedium};
pub use mirror::{
    Group, MemoryBackend, MirrorOutcome, MirroredEntity, Profile, RemoteBackend, RemoteError,
    RemoteMirror,
};
pub use notifier::{ChangeNotifier, ChangeSignal};

/// Returns the store crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
