//! Administration API seam
//!
//! The orchestrator and the inventory service only talk to resources
//! through this trait.

use async_trait::async_trait;

use common::error::Result;
use common::models::{
    CopyAuthorization, CopyOperationHandle, ModelSummary, OperationStatus, ResourceDetails,
};

/// Model administration operations of one resource
#[async_trait]
pub trait ModelAdministration: Send + Sync {
    /// Resource endpoint, for diagnostics
    fn endpoint(&self) -> &str;

    /// Lists every model on the resource, prebuilt ones included
    async fn list_models(&self) -> Result<Vec<ModelSummary>>;

    /// Returns the custom model quota of the resource
    async fn resource_details(&self) -> Result<ResourceDetails>;

    /// Asks this resource (as copy target) to reserve `model_id`
    ///
    /// Rejections surface as `Error::AuthorizationRequest`.
    async fn authorize_copy(
        &self,
        model_id: &str,
        description: Option<&str>,
    ) -> Result<CopyAuthorization>;

    /// Asks this resource (as copy source) to start copying `model_id`
    ///
    /// Rejections surface as `Error::Initiation`.
    async fn begin_copy(
        &self,
        model_id: &str,
        authorization: &CopyAuthorization,
    ) -> Result<CopyOperationHandle>;

    /// Queries the state of a copy started by this resource
    ///
    /// Transient failures surface as `Error::Poll`.
    async fn copy_status(&self, handle: &CopyOperationHandle) -> Result<OperationStatus>;
}
