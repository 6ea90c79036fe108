//! Secret store identity and API key resolution
//!
//! Resource keys live in Key Vault. Access to the vault goes through an
//! ordered chain of identity providers; the first one that yields a token
//! wins. Resolved keys are cached in memory for the rest of the run.

pub mod credential;
pub mod providers;
pub mod resolver;
pub mod secrets;

// Re-export commonly used types
pub use credential::{AccessToken, ChainedTokenCredential, TokenCredential};
pub use providers::{AzureCliCredential, EnvironmentCredential, ManagedIdentityCredential};
pub use resolver::{CredentialResolver, KeyProvider};
pub use secrets::SecretStoreClient;

/// Token scope for Key Vault data-plane access
pub const SECRET_STORE_SCOPE: &str = "https://vault.azure.net/.default";

/// Maps a transport failure onto the shared taxonomy
pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> common::Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        common::Error::ServiceUnavailable(format!("{}: {}", context, e))
    } else {
        common::Error::ExternalService(format!("{}: {}", context, e))
    }
}
