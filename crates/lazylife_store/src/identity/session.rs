//! Session marker lifecycle.
//!
//! # Invariants
//! - The marker is written raw (not JSON) under the resolver's session key.
//! - Every successful switch emits `ChangeSignal::IdentityChanged` in the
//!   calling context; sibling contexts observe the marker write through the
//!   medium's own cross-context path.

use super::namespace::Identity;
use crate::context::StorageContext;
use crate::medium::MediumError;
use crate::mirror::{AuthSession, Credentials, RemoteBackend, RemoteError};
use crate::notifier::ChangeSignal;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static USER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9@._\-]*$").expect("valid user id regex"));

#[derive(Debug)]
pub enum SessionError {
    InvalidUserId(String),
    Auth(RemoteError),
    Medium(MediumError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUserId(value) => write!(f, "user id is invalid: `{value}`"),
            Self::Auth(err) => write!(f, "sign-in failed: {err}"),
            Self::Medium(err) => write!(f, "failed to store session: {err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidUserId(_) => None,
            Self::Auth(err) => Some(err),
            Self::Medium(err) => Some(err),
        }
    }
}

impl From<RemoteError> for SessionError {
    fn from(value: RemoteError) -> Self {
        Self::Auth(value)
    }
}

impl From<MediumError> for SessionError {
    fn from(value: MediumError) -> Self {
        Self::Medium(value)
    }
}

/// Switches the active identity of one context (and, through the shared
/// medium, of its siblings).
pub struct SessionManager<'ctx> {
    context: &'ctx StorageContext,
}

impl<'ctx> SessionManager<'ctx> {
    pub fn new(context: &'ctx StorageContext) -> Self {
        Self { context }
    }

    pub fn current(&self) -> Identity {
        self.context.identity()
    }

    /// Authenticates against `backend` and activates the returned user.
    pub fn login(
        &self,
        backend: &dyn RemoteBackend,
        credentials: &Credentials,
    ) -> Result<AuthSession, SessionError> {
        let session = backend.sign_in(credentials).map_err(|err| {
            warn!(
                "event=session_login module=identity status=error error_code={} error={}",
                err.code, err.message
            );
            SessionError::from(err)
        })?;
        self.activate(&session.user_id)?;
        Ok(session)
    }

    /// Activates `user_id` without credentials (admin impersonation, tests).
    pub fn impersonate(&self, user_id: &str) -> Result<Identity, SessionError> {
        self.activate(user_id)
    }

    /// Clears the marker; the backend sign-out is best effort.
    pub fn logout(&self, backend: Option<&dyn RemoteBackend>) -> Result<(), SessionError> {
        if let Some(backend) = backend {
            if let Err(err) = backend.sign_out() {
                warn!(
                    "event=session_logout module=identity status=error stage=remote error={err}"
                );
            }
        }
        self.continue_as_guest()
    }

    pub fn continue_as_guest(&self) -> Result<(), SessionError> {
        let previous = self.current();
        self.context
            .medium()
            .remove_item(self.context.resolver().session_key())?;
        info!("event=identity_switch module=identity status=ok from={previous} to=guest");
        self.context.notifier().notify(ChangeSignal::IdentityChanged);
        Ok(())
    }

    fn activate(&self, user_id: &str) -> Result<Identity, SessionError> {
        let trimmed = user_id.trim();
        if !USER_ID_RE.is_match(trimmed) || trimmed == super::namespace::GUEST_IDENTITY {
            return Err(SessionError::InvalidUserId(user_id.to_string()));
        }

        let previous = self.current();
        self.context
            .medium()
            .set_item(self.context.resolver().session_key(), trimmed)?;
        let identity = Identity::User(trimmed.to_string());
        info!("event=identity_switch module=identity status=ok from={previous} to={identity}");
        self.context.notifier().notify(ChangeSignal::IdentityChanged);
        Ok(identity)
    }
}
