//! Identity providers for the secret store
//!
//! Each provider fails with [`Error::Credential`] when it cannot produce a
//! token in the current environment, so the chain can move on.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use common::error::{Error, Result};
use settings::IdentitySettings;

use crate::credential::{AccessToken, TokenCredential};

/// IMDS api-version for token requests
const IMDS_API_VERSION: &str = "2018-02-01";

fn scope_to_resource(scope: &str) -> &str {
    scope.trim_end_matches("/.default")
}

fn epoch_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct ServicePrincipal {
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

/// Service principal with a client secret from `AZURE_*` variables
pub struct EnvironmentCredential {
    /// HTTP client
    http: Client,

    /// Authority host (e.g. https://login.microsoftonline.com)
    authority_host: String,

    /// Principal, when all variables are present
    principal: Option<ServicePrincipal>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl EnvironmentCredential {
    /// Creates a credential for an explicit service principal
    pub fn new(
        http: Client,
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.into(),
            principal: Some(ServicePrincipal {
                tenant_id: tenant_id.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
            }),
        }
    }

    /// Reads `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`
    ///
    /// `AZURE_AUTHORITY_HOST` overrides the configured authority.
    pub fn from_env(http: Client, settings: &IdentitySettings) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let principal = match (var("AZURE_TENANT_ID"), var("AZURE_CLIENT_ID"), var("AZURE_CLIENT_SECRET")) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            }),
            _ => None,
        };

        Self {
            http,
            authority_host: var("AZURE_AUTHORITY_HOST").unwrap_or_else(|| settings.authority_host.clone()),
            principal,
        }
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let principal = self.principal.as_ref().ok_or_else(|| {
            Error::Credential("AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET not set".to_string())
        })?;

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            principal.tenant_id
        );

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", principal.client_id.as_str()),
                ("client_secret", principal.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| Error::Credential(format!("Token request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("Malformed token response: {}", e)))?;

        Ok(AccessToken::new(
            token.access_token,
            Utc::now() + Duration::seconds(token.expires_in),
        ))
    }
}

/// Token from the signed-in `az` CLI session
pub struct AzureCliCredential {
    /// CLI executable
    program: String,

    /// Limit for one CLI invocation
    timeout: StdDuration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    expires_on: Option<String>,
    #[serde(rename = "expires_on")]
    expires_on_epoch: Option<Value>,
}

impl AzureCliCredential {
    /// Creates a CLI credential using `az`
    pub fn new(settings: &IdentitySettings) -> Self {
        Self::with_program("az", StdDuration::from_secs(settings.cli_timeout_secs))
    }

    /// Creates a CLI credential using a specific executable
    pub fn with_program(program: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Parses the JSON printed by `az account get-access-token`
    pub fn parse_output(stdout: &[u8]) -> Result<AccessToken> {
        let token: CliToken = serde_json::from_slice(stdout)
            .map_err(|e| Error::Credential(format!("Unexpected az CLI output: {}", e)))?;

        let from_epoch = token
            .expires_on_epoch
            .as_ref()
            .and_then(epoch_from_value)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let from_local = token.expires_on.as_deref().and_then(|s| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .and_then(|naive| Local.from_local_datetime(&naive).single())
                .map(|local| local.with_timezone(&Utc))
        });

        let expires_on: DateTime<Utc> = from_epoch
            .or(from_local)
            .ok_or_else(|| Error::Credential("az CLI token has no usable expiry".to_string()))?;

        Ok(AccessToken::new(token.access_token, expires_on))
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let resource = scope_to_resource(scope);

        let mut command = Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json", "--resource"])
            .arg(resource)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Credential(format!("{} CLI is not installed", self.program)))
            }
            Ok(Err(e)) => return Err(Error::Credential(format!("Failed to run {}: {}", self.program, e))),
            Err(_) => {
                return Err(Error::Credential(format!(
                    "{} CLI did not answer within {:?}",
                    self.program, self.timeout
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("az CLI stderr: {}", stderr.trim());
            return Err(Error::Credential(format!(
                "az CLI returned {} (run `az login`): {}",
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_output(&output.stdout)
    }
}

/// Token from the instance metadata service
pub struct ManagedIdentityCredential {
    /// HTTP client
    http: Client,

    /// IMDS token endpoint
    endpoint: String,

    /// User-assigned identity, if any
    client_id: Option<String>,

    /// Limit for one token request
    timeout: StdDuration,
}

impl ManagedIdentityCredential {
    /// Creates a managed identity credential; `AZURE_CLIENT_ID` selects a
    /// user-assigned identity
    pub fn new(http: Client, settings: &IdentitySettings) -> Self {
        Self {
            http,
            endpoint: settings.imds_endpoint.clone(),
            client_id: std::env::var("AZURE_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            timeout: StdDuration::from_secs(settings.imds_timeout_secs),
        }
    }

    /// Creates a credential against a specific endpoint
    pub fn with_endpoint(http: Client, endpoint: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id: None,
            timeout,
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut query = vec![
            ("api-version", IMDS_API_VERSION),
            ("resource", scope_to_resource(scope)),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .header("Metadata", "true")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Credential(format!("Managed identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "Managed identity endpoint returned {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("Malformed managed identity response: {}", e)))?;

        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Credential("Managed identity response has no access_token".to_string()))?;

        let expires_on = body
            .get("expires_on")
            .and_then(epoch_from_value)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| Error::Credential("Managed identity response has no expires_on".to_string()))?;

        Ok(AccessToken::new(token, expires_on))
    }
}
