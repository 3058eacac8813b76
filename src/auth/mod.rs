//! Two-step login against the Grainfather identity service.
//!
//! 1. `POST /auth/login` with `{email, password}` → `{api_token}` (session handle)
//! 2. `GET /particle/tokens` with the session as bearer → `[{access_token, expires_at}]`
//!
//! The first token entry becomes the [`Credential`] used against the device relay.

use crate::credentials::{Credential, TokenSource};
use crate::error::{AuthError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};


pub const GRAINFATHER_BASE_URL: &str = "https://community.grainfather.com/api";

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    api_token: String,
}

/// One entry of the token lookup response.
#[derive(Deserialize)]
struct TokenEntry {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Exchanges a long-lived username/password for a short-lived bearer token.
///
/// The secrets are retained for the process lifetime so that
/// [`renew`](Self::renew) can repeat the full exchange.
pub struct Authenticator {
    http_client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl Authenticator {
    /// Creates an authenticator against `base_url` (no trailing slash).
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Logs in and returns the first device-linked access token.
    ///
    /// # Errors
    /// - `InvalidCredentials` if the login step returns a non-success status
    /// - `NoTokenIssued` if the token list is empty
    /// - `TokenLookupFailed` if the lookup step returns a non-success status
    /// - `TokenExpired` if the first token is already past its expiry
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, AuthError> {
        let session = self.open_session(username, password).await?;
        self.lookup_token(&session).await
    }

    /// Re-runs [`login`](Self::login) with the retained username and password.
    ///
    /// The previous credential is not consulted: renewal is always a full exchange.
    pub async fn renew(&self, _previous: &Credential) -> Result<Credential, AuthError> {
        self.login(&self.username, &self.password).await
    }

    async fn open_session(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let url = format!("{}/auth/login", self.base_url);
        debug!(url = %url, "Opening identity session");

        let response = self
            .http_client
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&LoginRequest {
                email: username,
                password,
            })
            .send()
            .await
            .map_err(TransportError::from)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Identity service rejected login");
            return Err(AuthError::InvalidCredentials);
        }

        let session: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        Ok(session.api_token)
    }

    async fn lookup_token(&self, session: &str) -> Result<Credential, AuthError> {
        let url = format!("{}/particle/tokens", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .header(ACCEPT, "application/json")
            .bearer_auth(session)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Token lookup failed");
            return Err(AuthError::TokenLookupFailed(status.as_u16()));
        }

        let tokens: Vec<TokenEntry> = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let first = tokens.into_iter().next().ok_or(AuthError::NoTokenIssued)?;
        let credential = match first.expires_at {
            Some(expires_at) => Credential::new(first.access_token, expires_at),
            None => Credential::non_expiring(first.access_token),
        };

        if !credential.is_valid_at(Utc::now()) {
            return Err(AuthError::TokenExpired);
        }

        info!(expires_at = %credential.expires_at, "Access token issued");
        Ok(credential)
    }
}

#[async_trait]
impl TokenSource for Authenticator {
    async fn issue(&self) -> Result<Credential, AuthError> {
        self.login(&self.username, &self.password).await
    }
}
