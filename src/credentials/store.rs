//! In-memory holder for the current bearer credential.

use super::{Credential, TokenSource};
use crate::error::AuthError;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Default renewal threshold ahead of hard expiry.
const DEFAULT_REFRESH_MARGIN_SECS: i64 = 90;

/// Holds the current [`Credential`] and renews it through a [`TokenSource`].
///
/// # Thread Safety
/// - The credential sits behind a `Mutex` held only to copy in or copy out
/// - The lock is never held across a network call
pub struct CredentialStore {
    source: Arc<dyn TokenSource>,
    current: Mutex<Option<Credential>>,
    refresh_margin: Duration,
}

impl CredentialStore {
    /// Creates an empty store. The first [`valid`](Self::valid) call logs in.
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: Mutex::new(None),
            refresh_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }

    /// Creates a store seeded with an existing credential.
    pub fn with_credential(source: Arc<dyn TokenSource>, credential: Credential) -> Self {
        let store = Self::new(source);
        store.replace(credential);
        store
    }

    /// Overrides how long before expiry a credential is considered stale.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Returns a copy of the current credential, if any.
    pub fn current(&self) -> Option<Credential> {
        self.lock().clone()
    }

    /// Returns the current credential, renewing first if it is missing or
    /// about to expire.
    pub async fn valid(&self) -> Result<Credential, AuthError> {
        if let Some(credential) = self.current() {
            if !credential.expires_within(Utc::now(), self.refresh_margin) {
                return Ok(credential);
            }
            debug!(expires_at = %credential.expires_at, "Credential stale, renewing");
        }
        self.renew().await
    }

    /// Unconditionally obtains a fresh credential and replaces the current one.
    ///
    /// On failure the previous credential is left in place.
    pub async fn renew(&self) -> Result<Credential, AuthError> {
        let credential = self.source.issue().await?;
        info!(expires_at = %credential.expires_at, "Credential renewed");
        self.replace(credential.clone());
        Ok(credential)
    }

    fn replace(&self, credential: Credential) {
        *self.lock() = Some(credential);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        // The guarded value is a plain Option; a panic mid-write cannot leave it torn.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Issues `tok-1`, `tok-2`, ... each valid for `ttl`.
    struct CountingSource {
        calls: AtomicUsize,
        ttl: Duration,
    }

    impl CountingSource {
        fn new(ttl: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ttl,
            })
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn issue(&self) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::new(format!("tok-{}", n), Utc::now() + self.ttl))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn issue(&self) -> Result<Credential, AuthError> {
            Err(AuthError::InvalidCredentials)
        }
    }

    #[tokio::test]
    async fn test_valid_logs_in_when_empty() {
        let source = CountingSource::new(Duration::hours(1));
        let store = CredentialStore::new(source.clone());

        assert!(store.current().is_none());
        let cred = store.valid().await.unwrap();
        assert_eq!(cred.bearer_token, "tok-1");
        assert_eq!(store.current(), Some(cred));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_reuses_fresh_credential() {
        let source = CountingSource::new(Duration::hours(1));
        let store = CredentialStore::new(source.clone());

        store.valid().await.unwrap();
        store.valid().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_renews_expired_credential() {
        let source = CountingSource::new(Duration::hours(1));
        let expired = Credential::new("old", Utc::now() - Duration::seconds(1));
        let store = CredentialStore::with_credential(source.clone(), expired);

        let cred = store.valid().await.unwrap();
        assert_eq!(cred.bearer_token, "tok-1");
        assert!(cred.is_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_valid_renews_within_margin() {
        let source = CountingSource::new(Duration::hours(1));
        let near = Credential::new("near", Utc::now() + Duration::seconds(30));
        let store = CredentialStore::with_credential(source.clone(), near);

        assert_eq!(store.valid().await.unwrap().bearer_token, "tok-1");

        let near = Credential::new("near", Utc::now() + Duration::seconds(30));
        let store = CredentialStore::with_credential(source, near)
            .with_refresh_margin(Duration::seconds(5));
        assert_eq!(store.valid().await.unwrap().bearer_token, "near");
    }

    #[tokio::test]
    async fn test_renew_twice_both_in_future() {
        let source = CountingSource::new(Duration::hours(1));
        let store = CredentialStore::new(source);

        let first = store.renew().await.unwrap();
        let second = store.renew().await.unwrap();
        let now = Utc::now();
        assert!(first.is_valid_at(now));
        assert!(second.is_valid_at(now));
        assert_ne!(first.bearer_token, second.bearer_token);
        assert_eq!(store.current(), Some(second));
    }

    #[tokio::test]
    async fn test_failed_renew_keeps_previous() {
        let previous = Credential::new("keep-me", Utc::now() + Duration::hours(1));
        let store = CredentialStore::with_credential(Arc::new(FailingSource), previous.clone());

        let result = store.renew().await;
        assert_eq!(result, Err(AuthError::InvalidCredentials));
        assert_eq!(store.current(), Some(previous));
    }
}
