//! Namespace derivation from the session marker.

use crate::medium::StorageMedium;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identity used when no session marker is set.
pub const GUEST_IDENTITY: &str = "guest";

/// Global medium key holding the active user id.
///
/// Reserved: it shares the global key space with application data, so
/// only [`SessionManager`](super::SessionManager) writes it.
pub const DEFAULT_SESSION_KEY: &str = "lazylife_current_user";

/// Whether a logical key is scoped to the active identity or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// Stored as `{identity}_{logical_key}`.
    Identity,
    /// Stored as `logical_key`, shared by every identity (e.g. `groups`).
    Global,
}

/// Active identity derived from the session marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Guest,
    User(String),
}

impl Identity {
    /// Normalizes a raw marker; blank markers collapse to `Guest`.
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker.map(str::trim) {
            Some(value) if !value.is_empty() => Self::User(value.to_string()),
            _ => Self::Guest,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Guest => GUEST_IDENTITY,
            Self::User(id) => id.as_str(),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the namespace for `logical_key` under the given marker.
///
/// Pure: identical inputs always give identical output.
pub fn namespace_for(marker: Option<&str>, logical_key: &str, scope: KeyScope) -> String {
    match scope {
        KeyScope::Global => logical_key.to_string(),
        KeyScope::Identity => format!("{}_{logical_key}", Identity::from_marker(marker)),
    }
}

/// Reads the session marker from a medium and resolves namespaces with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolver {
    session_key: String,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_KEY)
    }
}

impl IdentityResolver {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Returns the identity active in `medium` right now.
    ///
    /// Read failures degrade to `Guest` with a warning.
    pub fn identity(&self, medium: &dyn StorageMedium) -> Identity {
        match medium.get_item(&self.session_key) {
            Ok(marker) => Identity::from_marker(marker.as_deref()),
            Err(err) => {
                warn!(
                    "event=session_read module=identity status=error fallback=guest error={err}"
                );
                Identity::Guest
            }
        }
    }

    /// Resolves `logical_key` against the marker as it is at call time.
    pub fn resolve(&self, medium: &dyn StorageMedium, logical_key: &str, scope: KeyScope) -> String {
        match scope {
            KeyScope::Global => logical_key.to_string(),
            KeyScope::Identity => {
                let identity = self.identity(medium);
                namespace_for(Some(identity.as_str()), logical_key, scope)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{namespace_for, Identity, IdentityResolver, KeyScope};
    use crate::medium::{MemoryMedium, StorageMedium};

    #[test]
    fn global_keys_are_returned_unchanged() {
        assert_eq!(namespace_for(Some("u1"), "groups", KeyScope::Global), "groups");
        assert_eq!(namespace_for(None, "groups", KeyScope::Global), "groups");
    }

    #[test]
    fn identity_keys_are_prefixed() {
        assert_eq!(
            namespace_for(Some("u1"), "daily_tasks", KeyScope::Identity),
            "u1_daily_tasks"
        );
        assert_eq!(
            namespace_for(Some("  u1 \n"), "daily_tasks", KeyScope::Identity),
            "u1_daily_tasks"
        );
    }

    #[test]
    fn blank_markers_fall_back_to_guest() {
        for marker in [None, Some(""), Some("   ")] {
            assert_eq!(
                namespace_for(marker, "daily_tasks", KeyScope::Identity),
                "guest_daily_tasks"
            );
        }
        assert!(Identity::from_marker(Some("\t")).is_guest());
    }

    #[test]
    fn resolver_rereads_marker_on_every_call() {
        let medium = MemoryMedium::new();
        let resolver = IdentityResolver::default();
        assert_eq!(
            resolver.resolve(&medium, "notes", KeyScope::Identity),
            "guest_notes"
        );

        medium.set_item(resolver.session_key(), "u7").unwrap();
        assert_eq!(
            resolver.resolve(&medium, "notes", KeyScope::Identity),
            "u7_notes"
        );

        medium.remove_item(resolver.session_key()).unwrap();
        assert_eq!(resolver.identity(&medium), Identity::Guest);
    }
}
