//! Document Intelligence model copier
//!
//! Wires configuration, key resolution, inventory and copy orchestration
//! into one facade used by the command line front end.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use reqwest::Client;
use tracing::{info, warn};

use common::models::{CopyResult, ModelSummary, ResourceDescriptor, ResourceDetails};
use common::types::ApiKey;
use model_manager::client::build_http_client;
use model_manager::{copy_candidates, DocumentIntelligenceClient, InventoryService, ModelAdministration};
use security::{CredentialResolver, KeyProvider};
use settings::{AppSettings, ResourceConfig};
use task_scheduler::{CopyScheduler, ResourceBinding};

pub use task_scheduler::BatchSummary;

/// Builds administration clients for resources
pub trait ClientFactory: Send + Sync {
    /// Returns a client for `resource` authenticated with `key`
    fn connect(&self, resource: &ResourceDescriptor, key: ApiKey) -> Arc<dyn ModelAdministration>;
}

/// Creates REST clients sharing one HTTP connection pool
pub struct RestClientFactory {
    /// HTTP client
    http: Client,

    /// Document Intelligence api-version
    api_version: String,
}

impl RestClientFactory {
    /// Creates a new factory
    pub fn new(http: Client, api_version: impl Into<String>) -> Self {
        Self {
            http,
            api_version: api_version.into(),
        }
    }
}

impl ClientFactory for RestClientFactory {
    fn connect(&self, resource: &ResourceDescriptor, key: ApiKey) -> Arc<dyn ModelAdministration> {
        Arc::new(DocumentIntelligenceClient::new(
            self.http.clone(),
            resource.endpoint.clone(),
            key,
            self.api_version.clone(),
        ))
    }
}

/// Outcome of a connectivity check for one resource
#[derive(Debug, Clone)]
pub struct ResourceCheck {
    /// Checked resource
    pub resource: ResourceDescriptor,

    /// Custom model usage, or why it could not be read
    pub outcome: std::result::Result<ResourceDetails, String>,
}

/// Main facade
pub struct ModelCopier {
    /// Configured source and targets
    resources: ResourceConfig,

    /// Resource key provider
    keys: Arc<dyn KeyProvider>,

    /// Client factory
    clients: Arc<dyn ClientFactory>,

    /// Inventory service
    inventory: InventoryService,

    /// Copy scheduler
    scheduler: CopyScheduler,
}

impl ModelCopier {
    /// Creates a copier over explicit key and client providers
    pub fn new(
        settings: &AppSettings,
        resources: ResourceConfig,
        keys: Arc<dyn KeyProvider>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            resources,
            keys,
            clients,
            inventory: InventoryService::new(settings.inventory.retry_policy()),
            scheduler: CopyScheduler::new(&settings.copy),
        }
    }

    /// Creates a copier talking to the real services
    pub fn from_settings(settings: &AppSettings, resources: ResourceConfig) -> Result<Self> {
        let http = build_http_client(&settings.http)?;

        let keys = CredentialResolver::from_settings(
            http.clone(),
            &settings.http,
            &settings.identity,
            settings.inventory.retry_policy(),
        );
        let clients = RestClientFactory::new(http, settings.http.api_version.clone());

        Ok(Self::new(settings, resources, Arc::new(keys), Arc::new(clients)))
    }

    /// Configured resources
    pub fn resources(&self) -> &ResourceConfig {
        &self.resources
    }

    fn resource(&self, name: &str) -> Result<&ResourceDescriptor> {
        self.resources
            .resource(name)
            .ok_or_else(|| anyhow!("Unknown resource '{}'", name))
    }

    async fn connect(&self, resource: &ResourceDescriptor) -> common::Result<Arc<dyn ModelAdministration>> {
        let key = self.keys.resolve_key(resource).await?;
        Ok(self.clients.connect(resource, key))
    }

    async fn bind(&self, resource: &ResourceDescriptor) -> ResourceBinding {
        match self.connect(resource).await {
            Ok(client) => ResourceBinding::ready(resource.clone(), client),
            Err(e) => {
                warn!("No key for {}: {}", resource, e);
                ResourceBinding::unavailable(resource.clone(), e.to_string())
            }
        }
    }

    async fn list_on(&self, resource: &ResourceDescriptor) -> Result<Vec<ModelSummary>> {
        let client = self
            .connect(resource)
            .await
            .with_context(|| format!("Resolving key for {}", resource))?;

        self.inventory
            .list_custom_models(client.as_ref())
            .await
            .with_context(|| format!("Listing models on {}", resource))
    }

    /// Custom models on the named resource, newest first
    pub async fn list_models(&self, resource_name: &str) -> Result<Vec<ModelSummary>> {
        let resource = self.resource(resource_name)?;
        self.list_on(resource).await
    }

    /// Custom model usage of the named resource
    pub async fn resource_details(&self, resource_name: &str) -> Result<ResourceDetails> {
        let resource = self.resource(resource_name)?;
        let client = self
            .connect(resource)
            .await
            .with_context(|| format!("Resolving key for {}", resource))?;

        self.inventory
            .resource_details(client.as_ref())
            .await
            .with_context(|| format!("Reading details of {}", resource))
    }

    /// Checks every configured resource, source first
    pub async fn check(&self) -> Vec<ResourceCheck> {
        let resources: Vec<&ResourceDescriptor> = std::iter::once(&self.resources.source)
            .chain(self.resources.targets.iter())
            .collect();

        let checks = resources.iter().map(|resource| async move {
            let outcome = self
                .resource_details(&resource.display_name)
                .await
                .map_err(|e| format!("{:#}", e));
            ResourceCheck {
                resource: (*resource).clone(),
                outcome,
            }
        });

        join_all(checks).await
    }

    /// Source models missing on every configured target
    pub async fn copy_candidates(&self) -> Result<Vec<ModelSummary>> {
        let source = self.list_on(&self.resources.source).await?;

        let listings = join_all(self.resources.targets.iter().map(|t| self.list_on(t))).await;
        let targets = listings.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(copy_candidates(&source, &targets))
    }

    /// Copies `models` from the source to the named targets
    ///
    /// An empty `target_names` selects every configured target. Key
    /// failures only fail the pairs of the affected resource.
    pub async fn run_batch(
        &self,
        models: &[String],
        target_names: &[String],
        suffix: Option<&str>,
    ) -> Result<Vec<CopyResult>> {
        let targets: Vec<&ResourceDescriptor> = if target_names.is_empty() {
            self.resources.targets.iter().collect()
        } else {
            target_names
                .iter()
                .map(|name| {
                    self.resources
                        .target(name)
                        .ok_or_else(|| anyhow!("Unknown target '{}'", name))
                })
                .collect::<Result<_>>()?
        };

        if targets.is_empty() {
            return Err(anyhow!("No copy targets configured"));
        }

        info!(
            "Copying {} model(s) from {} to {} target(s)",
            models.len(),
            self.resources.source,
            targets.len()
        );

        let source = self.bind(&self.resources.source).await;
        let bindings = join_all(targets.iter().map(|t| self.bind(t))).await;

        Ok(self.scheduler.run_batch(&source, models, &bindings, suffix).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use common::error::Error;
    use common::models::CopyStatus;
    use model_manager::memory::InMemoryCloud;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StaticKeys {
        denied: Vec<String>,
        lookups: Mutex<HashMap<String, u32>>,
    }

    impl StaticKeys {
        fn new(denied: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                denied: denied.iter().map(|s| s.to_string()).collect(),
                lookups: Mutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait]
    impl KeyProvider for StaticKeys {
        async fn resolve_key(&self, resource: &ResourceDescriptor) -> common::Result<ApiKey> {
            *self.lookups.lock().entry(resource.secret_name.clone()).or_insert(0) += 1;
            if self.denied.contains(&resource.secret_name) {
                return Err(Error::Credential(format!("Access to secret '{}' denied", resource.secret_name)));
            }
            Ok(ApiKey::new(format!("key-for-{}", resource.secret_name)))
        }
    }

    struct CloudClients(InMemoryCloud);

    impl ClientFactory for CloudClients {
        fn connect(&self, resource: &ResourceDescriptor, _key: ApiKey) -> Arc<dyn ModelAdministration> {
            let client = self
                .0
                .resource(&resource.endpoint)
                .unwrap_or_else(|| self.0.add_resource(&resource.endpoint));
            client
        }
    }

    fn descriptor(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            format!("https://{}.example", name),
            "https://kv.example",
            format!("{}-key", name),
            name,
        )
    }

    fn setup(denied: &[&str]) -> (ModelCopier, Arc<StaticKeys>, Arc<CloudClients>) {
        let cloud = InMemoryCloud::new();
        let source = cloud.add_resource("https://source.example");
        source.add_model("A", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        source.add_model("prebuilt-read", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        source.add_model("C", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let t1 = cloud.add_resource("https://t1.example");
        t1.add_model("A", Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        cloud.add_resource("https://t2.example");

        let resources = ResourceConfig {
            source: descriptor("source"),
            targets: vec![descriptor("t1"), descriptor("t2")],
        };

        let keys = StaticKeys::new(denied);
        let clients = Arc::new(CloudClients(cloud));
        let mut settings = AppSettings::default();
        settings.copy.deadline_secs = 30;

        let copier = ModelCopier::new(&settings, resources, keys.clone(), clients.clone());
        (copier, keys, clients)
    }

    fn ids(models: &[ModelSummary]) -> Vec<&str> {
        models.iter().map(|m| m.model_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_models_and_candidates() {
        let (copier, _, _) = setup(&[]);

        assert_eq!(ids(&copier.list_models("source").await.unwrap()), vec!["A", "C"]);
        assert_eq!(ids(&copier.list_models("t1").await.unwrap()), vec!["A"]);
        assert_eq!(ids(&copier.copy_candidates().await.unwrap()), vec!["C"]);
        assert!(copier.list_models("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_check_reports_each_resource() {
        let (copier, _, _) = setup(&["t2-key"]);

        let checks = copier.check().await;
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].outcome.as_ref().unwrap().custom_model_count, 2);
        assert_eq!(checks[1].outcome.as_ref().unwrap().custom_model_count, 1);
        assert!(checks[2].outcome.as_ref().unwrap_err().contains("denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_isolates_target_key_failure() {
        let (copier, keys, clients) = setup(&["t1-key"]);

        let results = copier
            .run_batch(&["C".to_string()], &[], Some("-v2"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].target_name, "t1");
        assert_eq!(results[0].status, CopyStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("denied"));
        assert_eq!(results[1].status, CopyStatus::Succeeded);

        let t2 = clients.0.resource("https://t2.example").unwrap();
        assert!(t2.has_model("C-v2"));
        assert_eq!(keys.lookups.lock()["source-key"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_with_source_key_failure_fails_every_pair() {
        let (copier, _, _) = setup(&["source-key"]);

        let results = copier
            .run_batch(&["A".to_string(), "C".to_string()], &[], None)
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == CopyStatus::Failed));
        assert!(!BatchSummary::from_results(&results).all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_target_selection() {
        let (copier, _, _) = setup(&[]);

        let results = copier
            .run_batch(&["C".to_string()], &["t2".to_string()], None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target_name, "t2");

        let err = copier
            .run_batch(&["C".to_string()], &["source".to_string()], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown target"));
    }
}
