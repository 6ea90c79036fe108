//! Resource key resolution with an in-memory cache

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use common::error::{Error, Result};
use common::models::ResourceDescriptor;
use common::types::{ApiKey, RetryPolicy};
use common::utils::retry_transient;
use settings::{HttpSettings, IdentitySettings};

use crate::credential::{AccessToken, ChainedTokenCredential, TokenCredential};
use crate::providers::{AzureCliCredential, EnvironmentCredential, ManagedIdentityCredential};
use crate::secrets::SecretStoreClient;
use crate::SECRET_STORE_SCOPE;

/// Something that can produce the API key for a resource
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Returns the API key for `resource`
    async fn resolve_key(&self, resource: &ResourceDescriptor) -> Result<ApiKey>;
}

type SecretRef = (String, String);

/// Resolves resource keys from the secret store
///
/// Each (store, secret) pair is fetched at most once per run, even when
/// several callers ask concurrently; failures are not cached.
pub struct CredentialResolver {
    /// Secret store client
    secrets: SecretStoreClient,

    /// Resolved keys ((store url, secret name) -> key)
    keys: DashMap<SecretRef, Arc<OnceCell<ApiKey>>>,

    /// Retry policy for transient secret store failures
    retry: RetryPolicy,
}

impl CredentialResolver {
    /// Creates a resolver over an existing secret store client
    pub fn new(secrets: SecretStoreClient, retry: RetryPolicy) -> Self {
        Self {
            secrets,
            keys: DashMap::new(),
            retry,
        }
    }

    /// Builds the default identity chain: environment, CLI, managed identity
    pub fn default_identity(http: Client, identity: &IdentitySettings) -> ChainedTokenCredential {
        let providers: Vec<Arc<dyn TokenCredential>> = vec![
            Arc::new(EnvironmentCredential::from_env(http.clone(), identity)),
            Arc::new(AzureCliCredential::new(identity)),
            Arc::new(ManagedIdentityCredential::new(http, identity)),
        ];
        ChainedTokenCredential::new(providers)
    }

    /// Creates a resolver with the default identity chain
    pub fn from_settings(
        http: Client,
        http_settings: &HttpSettings,
        identity: &IdentitySettings,
        retry: RetryPolicy,
    ) -> Self {
        let chain = Self::default_identity(http.clone(), identity);
        let secrets = SecretStoreClient::new(http, Arc::new(chain), http_settings.secret_store_api_version.clone());
        Self::new(secrets, retry)
    }

    /// Returns the API key stored as `secret_name` in `store_url`
    pub async fn resolve_key_in(&self, store_url: &str, secret_name: &str) -> Result<ApiKey> {
        if store_url.is_empty() || secret_name.is_empty() {
            return Err(Error::Credential("Secret store URL and secret name are required".to_string()));
        }

        let cell = self
            .keys
            .entry((store_url.to_string(), secret_name.to_string()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let key = cell
            .get_or_try_init(|| async {
                retry_transient(&self.retry, "secret lookup", || {
                    self.secrets.get_secret(store_url, secret_name)
                })
                .await
                .map_err(|e| {
                    warn!("Could not resolve secret '{}' from {}: {}", secret_name, store_url, e);
                    if e.is_credential() {
                        e
                    } else {
                        Error::Credential(e.to_string())
                    }
                })
            })
            .await?;

        debug!("Using key {} for secret '{}'", key.masked(), secret_name);
        Ok(key.clone())
    }

    /// Returns an identity token for the secret store
    pub async fn resolve_identity(&self) -> Result<AccessToken> {
        self.secrets.identity().get_token(SECRET_STORE_SCOPE).await
    }

    /// Number of keys resolved so far
    pub fn cached_keys(&self) -> usize {
        self.keys.iter().filter(|entry| entry.value().initialized()).count()
    }
}

#[async_trait]
impl KeyProvider for CredentialResolver {
    async fn resolve_key(&self, resource: &ResourceDescriptor) -> Result<ApiKey> {
        self.resolve_key_in(&resource.secret_store_url, &resource.secret_name)
            .await
    }
}
