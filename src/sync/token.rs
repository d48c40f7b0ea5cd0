//! Authentication token cache with expiry-aware renewal.
//!
//! The cached token is considered valid for `ttl` measured from the local
//! renewal time, not the server's issuance time, so the cache always expires
//! before the server does. Retry policy lives in the orchestrator.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::clock::Clock;
use crate::cloud::CloudApi;
use crate::error::SyncError;

/// Bearer token plus the local instant it was obtained.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    issued_at: Instant,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// True while `now - issued_at < ttl`.
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) < ttl
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Account credentials used for the login exchange.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owns the current token and decides when to renew it.
pub struct TokenCache {
    credentials: Credentials,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    current: Option<AuthToken>,
    renewals: u64,
}

impl TokenCache {
    pub fn new(credentials: Credentials, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials,
            ttl,
            clock,
            current: None,
            renewals: 0,
        }
    }

    /// Return the cached token, or log in again when forced or expired.
    ///
    /// On failure the previous entry is left as it was.
    pub async fn acquire<A: CloudApi + ?Sized>(
        &mut self,
        api: &A,
        force_refresh: bool,
    ) -> Result<AuthToken, SyncError> {
        if !force_refresh {
            if let Some(token) = &self.current {
                if token.is_fresh(self.clock.now(), self.ttl) {
                    return Ok(token.clone());
                }
            }
        }

        info!(forced = force_refresh, "Requesting new auth token");
        let value = api
            .login(&self.credentials.login, &self.credentials.password)
            .await?;
        let token = AuthToken::new(value, self.clock.now());
        self.current = Some(token.clone());
        self.renewals += 1;
        info!(renewals = self.renewals, "Auth token renewed");
        Ok(token)
    }

    /// Drop the cached token so the next `acquire` logs in again.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Number of successful login exchanges so far.
    pub fn renewals(&self) -> u64 {
        self.renewals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Device, DeviceId, Parameter, ParameterWrite, WriteReceipt};
    use crate::sync::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Login-only fake: issues `tok-N` and fails once `fail_from` logins have happened.
    struct LoginCounter {
        logins: AtomicU32,
        fail_from: u32,
    }

    impl LoginCounter {
        fn new(fail_from: u32) -> Self {
            Self { logins: AtomicU32::new(0), fail_from }
        }
    }

    #[async_trait]
    impl CloudApi for LoginCounter {
        async fn login(&self, _login: &str, _password: &str) -> Result<String, SyncError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.fail_from {
                Err(SyncError::Auth("HTTP 403".into()))
            } else {
                Ok(format!("tok-{n}"))
            }
        }
        async fn list_devices(&self, _token: &str) -> Result<Vec<Device>, SyncError> {
            unreachable!()
        }
        async fn device_parameters(&self, _t: &str, _d: DeviceId) -> Result<Vec<Parameter>, SyncError> {
            unreachable!()
        }
        async fn write_parameters(
            &self,
            _t: &str,
            _w: &[ParameterWrite],
            _c: Duration,
        ) -> Result<WriteReceipt, SyncError> {
            unreachable!()
        }
    }

    fn cache(clock: &ManualClock) -> TokenCache {
        TokenCache::new(
            Credentials { login: "op".into(), password: "pw".into() },
            Duration::from_secs(1080),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn reuses_token_inside_validity_window() {
        let clock = ManualClock::new();
        let api = LoginCounter::new(u32::MAX);
        let mut tokens = cache(&clock);

        let first = tokens.acquire(&api, false).await.unwrap();
        clock.advance(Duration::from_secs(1079));
        let second = tokens.acquire(&api, false).await.unwrap();

        assert_eq!(first.as_str(), "tok-1");
        assert_eq!(second, first);
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn renews_after_expiry_with_local_timestamp() {
        let clock = ManualClock::new();
        let api = LoginCounter::new(u32::MAX);
        let mut tokens = cache(&clock);

        tokens.acquire(&api, false).await.unwrap();
        clock.advance(Duration::from_secs(1080));
        let renewed = tokens.acquire(&api, false).await.unwrap();

        assert_eq!(renewed.as_str(), "tok-2");
        assert_eq!(renewed.issued_at(), clock.now());
        assert_eq!(tokens.renewals(), 2);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let clock = ManualClock::new();
        let api = LoginCounter::new(u32::MAX);
        let mut tokens = cache(&clock);

        tokens.acquire(&api, false).await.unwrap();
        let forced = tokens.acquire(&api, true).await.unwrap();
        assert_eq!(forced.as_str(), "tok-2");
    }

    #[tokio::test]
    async fn failed_renewal_keeps_previous_entry() {
        let clock = ManualClock::new();
        let api = LoginCounter::new(1);
        let mut tokens = cache(&clock);

        let first = tokens.acquire(&api, false).await.unwrap();
        let err = tokens.acquire(&api, true).await.unwrap_err();
        assert!(err.is_auth());

        // Still fresh, so the old token is served again.
        let again = tokens.acquire(&api, false).await.unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let token = AuthToken::new("secret-token", Instant::now());
        let creds = Credentials { login: "op".into(), password: "hunter2".into() };
        assert!(!format!("{token:?}").contains("secret-token"));
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
