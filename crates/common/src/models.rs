//! Common data models for the DI model copier
//!
//! This module defines the resources, model inventory entries and copy
//! records exchanged between the inventory service and the orchestrator.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix the service uses for platform-supplied models
pub const PREBUILT_MODEL_PREFIX: &str = "prebuilt-";

/// Maximum length of a model id accepted by the service
pub const MAX_MODEL_ID_LEN: usize = 64;

/// A Document Intelligence resource and where its key lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource endpoint URL
    pub endpoint: String,
    /// Secret store (Key Vault) URL holding the resource key
    pub secret_store_url: String,
    /// Name of the secret holding the resource key
    pub secret_name: String,
    /// Display name used in reports
    pub display_name: String,
}

impl ResourceDescriptor {
    /// Creates a new resource descriptor
    pub fn new(
        endpoint: impl Into<String>,
        secret_store_url: impl Into<String>,
        secret_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret_store_url: secret_store_url.into(),
            secret_name: secret_name.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.endpoint)
    }
}

/// Model kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Trained or composed by the user
    Custom,
    /// Supplied by the platform
    Prebuilt,
}

impl ModelKind {
    /// Classifies a model by its id
    pub fn from_model_id(model_id: &str) -> Self {
        if model_id.starts_with(PREBUILT_MODEL_PREFIX) {
            ModelKind::Prebuilt
        } else {
            ModelKind::Custom
        }
    }
}

/// Inventory entry for a model hosted on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model id
    pub model_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Model kind
    pub kind: ModelKind,
    /// Model description, if any
    pub description: Option<String>,
    /// Expiration timestamp, if any
    pub expires_at: Option<DateTime<Utc>>,
}

impl ModelSummary {
    /// Creates a summary, classifying the kind from the id
    pub fn new(model_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let model_id = model_id.into();
        let kind = ModelKind::from_model_id(&model_id);
        Self {
            model_id,
            created_at,
            kind,
            description: None,
            expires_at: None,
        }
    }

    /// Returns true for user-owned models
    pub fn is_custom(&self) -> bool {
        self.kind == ModelKind::Custom
    }
}

/// Returns true if `model_id` is acceptable to the service as a model name
pub fn is_valid_model_id(model_id: &str) -> bool {
    let mut chars = model_id.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    model_id.len() <= MAX_MODEL_ID_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
}

/// One (model, target) pair selected for copying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Source model id
    pub model_id: String,
    /// Resource holding the model
    pub source: ResourceDescriptor,
    /// Resource receiving the copy
    pub target: ResourceDescriptor,
    /// Optional suffix appended to the destination name
    pub suffix: Option<String>,
}

impl CopyRequest {
    /// Creates a new copy request
    pub fn new(
        model_id: impl Into<String>,
        source: ResourceDescriptor,
        target: ResourceDescriptor,
        suffix: Option<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            source,
            target,
            suffix,
        }
    }

    /// Name the model will carry on the target
    pub fn destination_model_id(&self) -> String {
        match self.suffix.as_deref() {
            Some(suffix) => format!("{}{}", self.model_id, suffix),
            None => self.model_id.clone(),
        }
    }
}

/// Target-side grant returned by authorize-copy
///
/// The whole grant is handed back to the source resource to start the copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyAuthorization {
    /// Target resource id
    pub target_resource_id: String,
    /// Target resource region
    pub target_resource_region: String,
    /// Model id reserved on the target
    pub target_model_id: String,
    /// Location the copied model will be reachable at
    pub target_model_location: String,
    /// Token scoped to this single copy
    pub access_token: String,
    /// Expiration of the grant
    pub expiration_date_time: DateTime<Utc>,
}

impl fmt::Debug for CopyAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyAuthorization")
            .field("target_resource_id", &self.target_resource_id)
            .field("target_resource_region", &self.target_resource_region)
            .field("target_model_id", &self.target_model_id)
            .field("target_model_location", &self.target_model_location)
            .field("access_token", &"***")
            .field("expiration_date_time", &self.expiration_date_time)
            .finish()
    }
}

/// Opaque handle to an in-flight copy operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyOperationHandle(String);

impl CopyOperationHandle {
    /// Wraps an operation location
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Operation location URL
    pub fn location(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CopyOperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote state of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    /// Accepted but not started
    NotStarted,
    /// In progress
    Running,
    /// Completed successfully
    Succeeded,
    /// Completed with an error
    Failed,
    /// Cancelled on the service side
    Canceled,
}

impl OperationState {
    /// Returns true once the service will not change the state again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Canceled
        )
    }
}

/// Result of one status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    /// Remote state
    pub state: OperationState,
    /// Progress, when the service reports it
    pub percent_completed: Option<u8>,
    /// Error detail for failed operations
    pub error: Option<String>,
}

impl OperationStatus {
    /// Status with no progress or error detail
    pub fn new(state: OperationState) -> Self {
        Self {
            state,
            percent_completed: None,
            error: None,
        }
    }
}

/// Final outcome of a copy pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// The copy completed on the target
    Succeeded,
    /// The copy was rejected or failed remotely
    Failed,
    /// The deadline passed before a terminal state was observed
    TimedOut,
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStatus::Succeeded => write!(f, "succeeded"),
            CopyStatus::Failed => write!(f, "failed"),
            CopyStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Outcome of one (model, target) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResult {
    /// Source model id
    pub model_id: String,
    /// Target display name
    pub target_name: String,
    /// Model id on the target
    pub destination_model_id: String,
    /// Outcome
    pub status: CopyStatus,
    /// Error detail for failed pairs
    pub error: Option<String>,
    /// Time spent on the pair in milliseconds
    pub elapsed_ms: u64,
}

impl CopyResult {
    fn from_request(
        request: &CopyRequest,
        status: CopyStatus,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            model_id: request.model_id.clone(),
            target_name: request.target.display_name.clone(),
            destination_model_id: request.destination_model_id(),
            status,
            error,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Successful copy
    pub fn succeeded(request: &CopyRequest, elapsed: Duration) -> Self {
        Self::from_request(request, CopyStatus::Succeeded, None, elapsed)
    }

    /// Failed copy with detail
    pub fn failed(request: &CopyRequest, error: impl Into<String>, elapsed: Duration) -> Self {
        Self::from_request(request, CopyStatus::Failed, Some(error.into()), elapsed)
    }

    /// Copy whose terminal state was never observed
    pub fn timed_out(request: &CopyRequest, elapsed: Duration) -> Self {
        Self::from_request(request, CopyStatus::TimedOut, None, elapsed)
    }

    /// Returns true for succeeded pairs
    pub fn is_success(&self) -> bool {
        self.status == CopyStatus::Succeeded
    }
}

/// Custom model quota on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDetails {
    /// Custom models currently hosted
    pub custom_model_count: u32,
    /// Maximum custom models allowed
    pub custom_model_limit: u32,
}
