//! In-memory resources implementing the administration API
//!
//! Resources registered on the same [`InMemoryCloud`] can copy models to
//! each other. Failures and copy outcomes are scripted per resource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use common::error::{Error, Result};
use common::models::{
    is_valid_model_id, CopyAuthorization, CopyOperationHandle, ModelSummary, OperationState,
    OperationStatus, ResourceDetails,
};

use crate::admin::ModelAdministration;

/// Custom model limit reported by in-memory resources
pub const DEFAULT_MODEL_LIMIT: u32 = 500;

type Registry = Mutex<HashMap<String, Arc<InMemoryResource>>>;

/// How a started copy behaves when polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Succeeds on the given status query
    Succeed { after_polls: u32 },
    /// Fails on the given status query
    Fail { after_polls: u32, message: String },
    /// Stays running forever
    NeverFinish,
}

impl Default for CopyOutcome {
    fn default() -> Self {
        CopyOutcome::Succeed { after_polls: 1 }
    }
}

/// A set of resources that can copy to each other
#[derive(Default)]
pub struct InMemoryCloud {
    resources: Arc<Registry>,
}

impl InMemoryCloud {
    /// Creates an empty cloud
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource reachable at `endpoint`
    pub fn add_resource(&self, endpoint: &str) -> Arc<InMemoryResource> {
        let resource = Arc::new(InMemoryResource::new(endpoint, Arc::downgrade(&self.resources)));
        self.resources
            .lock()
            .insert(endpoint.to_string(), resource.clone());
        resource
    }

    /// Looks up a registered resource
    pub fn resource(&self, endpoint: &str) -> Option<Arc<InMemoryResource>> {
        self.resources.lock().get(endpoint).cloned()
    }
}

#[derive(Default)]
struct Script {
    authorization_rejection: Option<String>,
    initiation_failures: HashMap<String, String>,
    outcomes: HashMap<(String, Option<String>), CopyOutcome>,
    failing_polls: u32,
    failing_lists: u32,
}

struct Operation {
    target: String,
    destination_model_id: String,
    outcome: CopyOutcome,
    polls: u32,
}

/// One in-memory resource
pub struct InMemoryResource {
    endpoint: String,
    cloud: Weak<Registry>,
    models: Mutex<Vec<ModelSummary>>,
    script: Mutex<Script>,
    operations: Mutex<HashMap<String, Operation>>,
    next_operation: AtomicU32,
    list_calls: AtomicU32,
    authorize_calls: AtomicU32,
    begin_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl InMemoryResource {
    fn new(endpoint: &str, cloud: Weak<Registry>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            cloud,
            models: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            operations: Mutex::new(HashMap::new()),
            next_operation: AtomicU32::new(1),
            list_calls: AtomicU32::new(0),
            authorize_calls: AtomicU32::new(0),
            begin_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    /// Adds a model to the resource
    pub fn add_model(&self, model_id: &str, created_at: DateTime<Utc>) {
        self.models.lock().push(ModelSummary::new(model_id, created_at));
    }

    /// Returns true if the resource hosts `model_id`
    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.lock().iter().any(|m| m.model_id == model_id)
    }

    /// Ids of hosted models, in insertion order
    pub fn model_ids(&self) -> Vec<String> {
        self.models.lock().iter().map(|m| m.model_id.clone()).collect()
    }

    /// Rejects every authorization request made to this resource
    pub fn reject_authorization(&self, reason: &str) {
        self.script.lock().authorization_rejection = Some(reason.to_string());
    }

    /// Rejects copies of `model_id` started from this resource
    pub fn fail_initiation(&self, model_id: &str, reason: &str) {
        self.script
            .lock()
            .initiation_failures
            .insert(model_id.to_string(), reason.to_string());
    }

    /// Scripts copies of `model_id` started from this resource
    pub fn set_copy_outcome(&self, model_id: &str, outcome: CopyOutcome) {
        self.script
            .lock()
            .outcomes
            .insert((model_id.to_string(), None), outcome);
    }

    /// Scripts copies of `model_id` from this resource to `target`
    pub fn set_copy_outcome_to(&self, model_id: &str, target: &str, outcome: CopyOutcome) {
        self.script
            .lock()
            .outcomes
            .insert((model_id.to_string(), Some(target.to_string())), outcome);
    }

    /// Fails the next `count` status queries with a transient error
    pub fn fail_next_polls(&self, count: u32) {
        self.script.lock().failing_polls = count;
    }

    /// Fails the next `count` listings with a transient error
    pub fn fail_next_lists(&self, count: u32) {
        self.script.lock().failing_lists = count;
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn authorize_calls(&self) -> u32 {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn begin_calls(&self) -> u32 {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, model_id: &str, target: &str) -> CopyOutcome {
        let script = self.script.lock();
        script
            .outcomes
            .get(&(model_id.to_string(), Some(target.to_string())))
            .or_else(|| script.outcomes.get(&(model_id.to_string(), None)))
            .cloned()
            .unwrap_or_default()
    }

    fn lookup(&self, endpoint: &str) -> Option<Arc<InMemoryResource>> {
        self.cloud.upgrade()?.lock().get(endpoint).cloned()
    }
}

#[async_trait]
impl ModelAdministration for InMemoryResource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut script = self.script.lock();
            if script.failing_lists > 0 {
                script.failing_lists -= 1;
                return Err(Error::ServiceUnavailable(format!("{} returned 503", self.endpoint)));
            }
        }

        Ok(self.models.lock().clone())
    }

    async fn resource_details(&self) -> Result<ResourceDetails> {
        let count = self.models.lock().iter().filter(|m| m.is_custom()).count();
        Ok(ResourceDetails {
            custom_model_count: count as u32,
            custom_model_limit: DEFAULT_MODEL_LIMIT,
        })
    }

    async fn authorize_copy(
        &self,
        model_id: &str,
        _description: Option<&str>,
    ) -> Result<CopyAuthorization> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.script.lock().authorization_rejection.clone() {
            return Err(Error::AuthorizationRequest(reason));
        }
        if !is_valid_model_id(model_id) {
            return Err(Error::AuthorizationRequest(format!("InvalidModelId: '{}'", model_id)));
        }
        if self.has_model(model_id) {
            return Err(Error::AuthorizationRequest(format!(
                "ModelExists: Model '{}' already exists on {}",
                model_id, self.endpoint
            )));
        }

        Ok(CopyAuthorization {
            target_resource_id: self.endpoint.clone(),
            target_resource_region: "local".to_string(),
            target_model_id: model_id.to_string(),
            target_model_location: format!("{}/documentintelligence/documentModels/{}", self.endpoint, model_id),
            access_token: format!("copy-token-{}", model_id),
            expiration_date_time: Utc::now() + Duration::hours(48),
        })
    }

    async fn begin_copy(
        &self,
        model_id: &str,
        authorization: &CopyAuthorization,
    ) -> Result<CopyOperationHandle> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.script.lock().initiation_failures.get(model_id).cloned() {
            return Err(Error::Initiation(reason));
        }
        if !self.has_model(model_id) {
            return Err(Error::Initiation(format!("ModelNotFound: '{}' on {}", model_id, self.endpoint)));
        }
        if self.lookup(&authorization.target_resource_id).is_none() {
            return Err(Error::Initiation(format!(
                "Unknown target resource {}",
                authorization.target_resource_id
            )));
        }

        let id = self.next_operation.fetch_add(1, Ordering::SeqCst);
        let location = format!("{}/documentintelligence/operations/{}", self.endpoint, id);
        let outcome = self.outcome_for(model_id, &authorization.target_resource_id);

        self.operations.lock().insert(
            location.clone(),
            Operation {
                target: authorization.target_resource_id.clone(),
                destination_model_id: authorization.target_model_id.clone(),
                outcome,
                polls: 0,
            },
        );

        Ok(CopyOperationHandle::new(location))
    }

    async fn copy_status(&self, handle: &CopyOperationHandle) -> Result<OperationStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut script = self.script.lock();
            if script.failing_polls > 0 {
                script.failing_polls -= 1;
                return Err(Error::Poll(format!("{} returned 503", handle)));
            }
        }

        let (status, completed) = {
            let mut operations = self.operations.lock();
            let operation = operations
                .get_mut(handle.location())
                .ok_or_else(|| Error::ExternalService(format!("Unknown operation {}", handle)))?;
            operation.polls += 1;

            match &operation.outcome {
                CopyOutcome::Succeed { after_polls } if operation.polls >= *after_polls => {
                    let completed = operation.polls == *after_polls;
                    let delivery = (operation.target.clone(), operation.destination_model_id.clone());
                    (
                        OperationStatus::new(OperationState::Succeeded),
                        completed.then_some(delivery),
                    )
                }
                CopyOutcome::Fail { after_polls, message } if operation.polls >= *after_polls => {
                    let mut status = OperationStatus::new(OperationState::Failed);
                    status.error = Some(message.clone());
                    (status, None)
                }
                _ => (OperationStatus::new(OperationState::Running), None),
            }
        };

        if let Some((target, destination_model_id)) = completed {
            if let Some(target) = self.lookup(&target) {
                target.add_model(&destination_model_id, Utc::now());
            }
        }

        Ok(status)
    }
}
