//! Identity resolution and session lifecycle.
//!
//! # Responsibility
//! - Own the only read path for the session marker.
//! - Map logical keys to namespaces for the active identity.
//! - Switch identities (login, impersonation, logout) and announce it.
//!
//! # Invariants
//! - Namespaces are recomputed on every access; nothing caches identity.
//! - An absent, empty, or whitespace-only marker means `guest`.
//! - The session key is reserved. Bindings on it never persist and the
//!   CLI refuses to `set` or `rm` it.

pub mod namespace;
pub mod session;

pub use namespace::{
    namespace_for, Identity, IdentityResolver, KeyScope, DEFAULT_SESSION_KEY, GUEST_IDENTITY,
};
pub use session::{SessionError, SessionManager};
