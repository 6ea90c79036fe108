//! Identity tokens and the provider chain

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::utils::mask_secret;

/// Tokens this close to expiry are refreshed
const REFRESH_SKEW_SECS: i64 = 300;

/// Bearer token for the secret store
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Token value
    pub token: String,
    /// Expiry instant
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a new access token
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// Returns true while the token can be used without refreshing
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(REFRESH_SKEW_SECS) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &mask_secret(&self.token))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// A source of identity tokens
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short provider name for diagnostics
    fn name(&self) -> &'static str;

    /// Acquires a token for `scope`
    ///
    /// Providers that cannot run in the current environment fail with
    /// [`Error::Credential`].
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// Tries providers in order; the first token wins
///
/// Tokens are cached per scope until shortly before they expire.
pub struct ChainedTokenCredential {
    /// Providers in priority order
    providers: Vec<Arc<dyn TokenCredential>>,

    /// Cached tokens (scope -> token)
    cache: RwLock<HashMap<String, AccessToken>>,
}

impl ChainedTokenCredential {
    /// Creates a chain from providers in priority order
    pub fn new(providers: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            providers,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.get(scope) {
                if token.is_fresh(Utc::now()) {
                    return Ok(token.clone());
                }
            }
        }

        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match provider.get_token(scope).await {
                Ok(token) => {
                    info!("Secret store identity resolved via {} credential", provider.name());
                    self.cache.write().await.insert(scope.to_string(), token.clone());
                    return Ok(token);
                }
                Err(e) => {
                    debug!("{} credential unavailable: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        Err(Error::Credential(format!(
            "No identity available for {} ({})",
            scope,
            failures.join("; ")
        )))
    }
}
