//! Custom model inventory
//!
//! Lists the user-owned models of a resource and works out which of the
//! source models are still missing on the targets.

use std::collections::HashSet;

use tracing::{debug, info};

use common::error::Result;
use common::models::{ModelSummary, ResourceDetails};
use common::types::RetryPolicy;
use common::utils::retry_transient;

use crate::admin::ModelAdministration;

/// Inventory service
pub struct InventoryService {
    /// Retry policy for transient listing failures
    retry: RetryPolicy,
}

impl InventoryService {
    /// Creates a new inventory service
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Lists the custom models of a resource, newest first
    pub async fn list_custom_models(&self, resource: &dyn ModelAdministration) -> Result<Vec<ModelSummary>> {
        let models = retry_transient(&self.retry, "model listing", || resource.list_models()).await?;
        let total = models.len();

        let custom = custom_models_newest_first(models);
        info!(
            "{} hosts {} custom model(s) ({} prebuilt skipped)",
            resource.endpoint(),
            custom.len(),
            total - custom.len()
        );

        Ok(custom)
    }

    /// Returns the custom model usage of a resource
    pub async fn resource_details(&self, resource: &dyn ModelAdministration) -> Result<ResourceDetails> {
        retry_transient(&self.retry, "resource details", || resource.resource_details()).await
    }
}

/// Drops prebuilt models and orders the rest by creation time, newest first
///
/// Models created at the same instant are ordered by id.
pub fn custom_models_newest_first(models: Vec<ModelSummary>) -> Vec<ModelSummary> {
    let mut custom: Vec<ModelSummary> = models.into_iter().filter(|m| m.is_custom()).collect();
    custom.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    custom
}

/// Source models present on none of the targets, in source order
///
/// Models are compared by id only.
pub fn copy_candidates(source: &[ModelSummary], targets: &[Vec<ModelSummary>]) -> Vec<ModelSummary> {
    let present: HashSet<&str> = targets
        .iter()
        .flatten()
        .map(|m| m.model_id.as_str())
        .collect();

    let candidates: Vec<ModelSummary> = source
        .iter()
        .filter(|m| !present.contains(m.model_id.as_str()))
        .cloned()
        .collect();

    debug!(
        "{} of {} source model(s) missing on {} target(s)",
        candidates.len(),
        source.len(),
        targets.len()
    );

    candidates
}
