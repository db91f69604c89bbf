use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;

/// Shipping-provider tokens are valid for this long after login.
pub const TOKEN_VALIDITY_HOURS: i64 = 8;

#[derive(Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Bearer token for the shipping provider, owned by whoever builds the client.
///
/// Concurrent callers that find the cache empty may each log in; the last
/// stored token wins, which is harmless.
pub struct ShippingTokenCache {
    validity: Duration,
    inner: RwLock<Option<CachedToken>>,
}

impl Default for ShippingTokenCache {
    fn default() -> Self {
        Self::new(Duration::hours(TOKEN_VALIDITY_HOURS))
    }
}

impl ShippingTokenCache {
    pub fn new(validity: Duration) -> Self {
        Self {
            validity,
            inner: RwLock::new(None),
        }
    }

    /// The cached token, if one exists and has not expired.
    pub async fn current(&self) -> Option<SecretString> {
        self.inner
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.expires_at > Utc::now())
            .map(|cached| cached.token.clone())
    }

    pub async fn store(&self, token: SecretString) {
        let cached = CachedToken {
            token,
            expires_at: Utc::now() + self.validity,
        };
        *self.inner.write().await = Some(cached);
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }

    /// Logs in unconditionally and caches the result.
    pub async fn refresh<F, Fut, E>(&self, login: F) -> Result<SecretString, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SecretString, E>>,
    {
        let token = login().await?;
        self.store(token.clone()).await;
        Ok(token)
    }

    pub async fn get_or_refresh<F, Fut, E>(&self, login: F) -> Result<SecretString, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SecretString, E>>,
    {
        match self.current().await {
            Some(token) => Ok(token),
            None => self.refresh(login).await,
        }
    }
}
