//! Key Vault secret retrieval

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::types::ApiKey;

use crate::credential::TokenCredential;
use crate::{transport_error, SECRET_STORE_SCOPE};

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

/// Reads secrets from Key Vault with an identity token
pub struct SecretStoreClient {
    /// HTTP client
    http: Client,

    /// Identity used for the vault
    identity: Arc<dyn TokenCredential>,

    /// Key Vault REST api-version
    api_version: String,
}

impl SecretStoreClient {
    /// Creates a new secret store client
    pub fn new(http: Client, identity: Arc<dyn TokenCredential>, api_version: impl Into<String>) -> Self {
        Self {
            http,
            identity,
            api_version: api_version.into(),
        }
    }

    /// Identity used for the vault
    pub fn identity(&self) -> Arc<dyn TokenCredential> {
        self.identity.clone()
    }

    /// Fetches the current version of `secret_name` from `store_url`
    ///
    /// Denied or missing secrets are [`Error::Credential`]; network and
    /// throttling failures are [`Error::ServiceUnavailable`].
    pub async fn get_secret(&self, store_url: &str, secret_name: &str) -> Result<ApiKey> {
        let token = self.identity.get_token(SECRET_STORE_SCOPE).await?;

        let url = format!("{}/secrets/{}", store_url.trim_end_matches('/'), secret_name);
        debug!("Fetching secret '{}' from {}", secret_name, store_url);

        let response = self
            .http
            .get(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|e| transport_error(&format!("Secret store {}", store_url), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Credential(format!(
                    "Access to secret '{}' in {} denied ({}): {}",
                    secret_name, store_url, status, body
                )),
                StatusCode::NOT_FOUND => Error::Credential(format!(
                    "Secret '{}' not found in {}",
                    secret_name, store_url
                )),
                s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                    Error::ServiceUnavailable(format!("Secret store {} returned {}", store_url, status))
                }
                _ => Error::Credential(format!(
                    "Secret store {} returned {} for '{}': {}",
                    store_url, status, secret_name, body
                )),
            });
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| Error::ExternalService(format!("Malformed secret bundle: {}", e)))?;

        let key = ApiKey::new(bundle.value);
        info!("Retrieved secret '{}' from {} ({})", secret_name, store_url, key.masked());

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AccessToken;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedToken;

    #[async_trait]
    impl TokenCredential for FixedToken {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
            Ok(AccessToken::new("vault-token", Utc::now() + Duration::hours(1)))
        }
    }

    struct NoIdentity;

    #[async_trait]
    impl TokenCredential for NoIdentity {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
            Err(Error::Credential("no identity".to_string()))
        }
    }

    fn client(identity: Arc<dyn TokenCredential>) -> SecretStoreClient {
        SecretStoreClient::new(Client::new(), identity, "7.4")
    }

    #[tokio::test]
    async fn test_get_secret() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/secrets/di-key"))
            .and(query_param("api-version", "7.4"))
            .and(header("authorization", "Bearer vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "0123456789abcdef",
                "id": "https://kv.vault.azure.net/secrets/di-key/abc"
            })))
            .mount(&server)
            .await;

        let key = client(Arc::new(FixedToken))
            .get_secret(&format!("{}/", server.uri()), "di-key")
            .await
            .unwrap();

        assert_eq!(key.expose(), "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_denied_secret_is_a_credential_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "Forbidden", "message": "caller lacks secrets/get"}
            })))
            .mount(&server)
            .await;

        let err = client(Arc::new(FixedToken))
            .get_secret(&server.uri(), "di-key")
            .await
            .unwrap_err();

        assert!(err.is_credential());
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_a_credential_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(Arc::new(FixedToken))
            .get_secret(&server.uri(), "missing")
            .await
            .unwrap_err();

        assert!(err.is_credential());
    }

    #[tokio::test]
    async fn test_throttled_vault_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(Arc::new(FixedToken))
            .get_secret(&server.uri(), "di-key")
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_identity_failure_propagates() {
        let err = client(Arc::new(NoIdentity))
            .get_secret("https://kv.vault.azure.net", "di-key")
            .await
            .unwrap_err();

        assert!(err.is_credential());
    }
}
