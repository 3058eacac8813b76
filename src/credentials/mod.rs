//! Bearer credentials for the device relay API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - current credential (copy-out)         │
//! │  - renew on expiry                       │
//! └─────────────────────────────────────────┘
//!          ↓ renew
//! ┌─────────────────────────────────────────┐
//! │       TokenSource                        │
//! │  - Authenticator (username/password)     │
//! │  - StaticToken (pre-issued token)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A [`Credential`] is never mutated in place: renewal replaces it wholesale.

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod store;

pub use store::CredentialStore;

/// Short-lived bearer token for the device relay API.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Token sent as `Authorization: Bearer <token>`
    pub bearer_token: String,

    /// When the token stops being accepted (UTC)
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(bearer_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            expires_at,
        }
    }

    /// Credential for a pre-issued token with no known expiry.
    pub fn non_expiring(bearer_token: impl Into<String>) -> Self {
        Self::new(bearer_token, DateTime::<Utc>::MAX_UTC)
    }

    /// True if the token is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True if the token expires within `margin` of `now` (or already has).
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match now.checked_add_signed(margin) {
            Some(threshold) => self.expires_at <= threshold,
            None => !self.is_valid_at(now),
        }
    }
}

// Keeps the token out of logs and panic messages.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint a fresh [`Credential`].
///
/// Renewal is unconditional: every call performs a full exchange and the
/// returned credential replaces the previous one.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtains a new credential.
    async fn issue(&self) -> Result<Credential, AuthError>;
}

/// Pre-issued token (e.g. from `PARTICLE_TOKEN`). Renewal returns the same token.
pub struct StaticToken {
    credential: Credential,
}

impl StaticToken {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            credential: Credential::non_expiring(bearer_token),
        }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn issue(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }
}
