//! Best-effort remote mirror.
//!
//! # Responsibility
//! - Push and pull a subset of local state (groups, profiles) to a
//!   remote backend when a real user is signed in.
//! - Re-enter remote changes through the keyed accessor so unchanged
//!   content never echoes back as a local write.
//!
//! # Invariants
//! - Local state is authoritative for the session; remote failures are
//!   logged and swallowed, never surfaced to callers.
//! - A successful pull is authoritative for the entities relevant to the
//!   signed-in identity; relevant local entities it lacks are dropped.
//! - Merge is whole-entity last-writer-wins by entity key. Concurrent
//!   edits of one shared entity from two contexts can clobber each other.

pub mod backend;
pub mod entity;
pub mod memory_backend;
pub mod remote_mirror;

pub use backend::{
    AuthSession, Credentials, RemoteBackend, RemoteChange, RemoteChangeKind, RemoteError,
    RemoteListener, RemoteResult, RemoteRow, RemoteSubscriptionId,
};
pub use entity::{Group, MirroredEntity, Profile};
pub use memory_backend::MemoryBackend;
pub use remote_mirror::{merge_entities, MirrorOutcome, RemoteMirror};
