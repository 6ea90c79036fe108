//! Copy orchestration for the DI model copier
//!
//! Expands a selection of models and targets into copy pairs, runs them on
//! a fixed-size worker pool and returns one result per pair in request
//! order.

mod executor;
mod queue;
mod task;

pub use executor::CopyExecutor;
pub use queue::WorkerPool;
pub use task::{CopyPhase, CopyTask};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use common::models::{CopyRequest, CopyResult, CopyStatus, ResourceDescriptor};
use model_manager::ModelAdministration;
use settings::CopySettings;

use crate::queue::WorkItem;

/// Whether a resource can be reached for this batch
#[derive(Clone)]
pub enum ResourceAccess {
    /// Client bound to the resource key
    Ready(Arc<dyn ModelAdministration>),
    /// The key could not be resolved
    Unavailable(String),
}

/// A configured resource and its access state
#[derive(Clone)]
pub struct ResourceBinding {
    /// Resource descriptor
    pub descriptor: ResourceDescriptor,

    /// Access state
    pub access: ResourceAccess,
}

impl ResourceBinding {
    /// Binding with a usable client
    pub fn ready(descriptor: ResourceDescriptor, client: Arc<dyn ModelAdministration>) -> Self {
        Self {
            descriptor,
            access: ResourceAccess::Ready(client),
        }
    }

    /// Binding for a resource whose key could not be resolved
    pub fn unavailable(descriptor: ResourceDescriptor, reason: impl Into<String>) -> Self {
        Self {
            descriptor,
            access: ResourceAccess::Unavailable(reason.into()),
        }
    }
}

/// Outcome counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl BatchSummary {
    /// Counts the outcomes in `results`
    pub fn from_results(results: &[CopyResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            match result.status {
                CopyStatus::Succeeded => summary.succeeded += 1,
                CopyStatus::Failed => summary.failed += 1,
                CopyStatus::TimedOut => summary.timed_out += 1,
            }
            summary
        })
    }

    /// Returns true when every pair succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

/// Runs copy batches
pub struct CopyScheduler {
    /// Worker pool
    pool: WorkerPool,
}

impl CopyScheduler {
    /// Creates a scheduler from copy settings
    pub fn new(settings: &CopySettings) -> Self {
        Self {
            pool: WorkerPool::new(settings.max_concurrency, CopyExecutor::new(settings)),
        }
    }

    /// Copies every model in `models` to every target in `targets`
    ///
    /// Returns one result per distinct (model, target) pair, models in
    /// selection order and targets in the given order. Pairs involving an
    /// unavailable resource fail without any remote call.
    pub async fn run_batch(
        &self,
        source: &ResourceBinding,
        models: &[String],
        targets: &[ResourceBinding],
        suffix: Option<&str>,
    ) -> Vec<CopyResult> {
        let models = distinct(models.iter(), |m| m.as_str());
        let targets = distinct(targets.iter(), |t| t.descriptor.display_name.as_str());
        let suffix = suffix.filter(|s| !s.is_empty()).map(str::to_string);

        info!(
            "Starting batch: {} model(s) x {} target(s) on {} worker(s)",
            models.len(),
            targets.len(),
            self.pool.size()
        );

        let mut requests = Vec::with_capacity(models.len() * targets.len());
        let mut slots: Vec<Option<CopyResult>> = Vec::with_capacity(requests.capacity());
        let mut items = Vec::new();

        for model_id in &models {
            for target in &targets {
                let index = requests.len();
                let request = CopyRequest::new(
                    model_id.as_str(),
                    source.descriptor.clone(),
                    target.descriptor.clone(),
                    suffix.clone(),
                );

                let slot = match (&source.access, &target.access) {
                    (ResourceAccess::Unavailable(reason), _) => Some(CopyResult::failed(
                        &request,
                        format!("Source {} unavailable: {}", source.descriptor.display_name, reason),
                        Duration::ZERO,
                    )),
                    (_, ResourceAccess::Unavailable(reason)) => Some(CopyResult::failed(
                        &request,
                        format!("Target {} unavailable: {}", target.descriptor.display_name, reason),
                        Duration::ZERO,
                    )),
                    (ResourceAccess::Ready(source_client), ResourceAccess::Ready(target_client)) => {
                        items.push(WorkItem {
                            task: CopyTask::new(index, request.clone()),
                            source: source_client.clone(),
                            target: target_client.clone(),
                        });
                        None
                    }
                };

                requests.push(request);
                slots.push(slot);
            }
        }

        for (index, result) in self.pool.run(items).await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        let results: Vec<CopyResult> = slots
            .into_iter()
            .zip(&requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    warn!("No result reported for {} -> {}", request.model_id, request.target.display_name);
                    CopyResult::failed(request, "Worker terminated before reporting", Duration::ZERO)
                })
            })
            .collect();

        let summary = BatchSummary::from_results(&results);
        info!(
            "Batch finished: {} succeeded, {} failed, {} timed out",
            summary.succeeded, summary.failed, summary.timed_out
        );

        results
    }
}

/// Keeps the first occurrence of each key, preserving order
fn distinct<'a, T, I, K>(items: I, key: K) -> Vec<&'a T>
where
    I: Iterator<Item = &'a T>,
    K: Fn(&'a T) -> &'a str,
{
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(key(*item))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model_manager::memory::{CopyOutcome, InMemoryCloud, InMemoryResource};

    const SOURCE: &str = "https://src.example";

    struct Fixture {
        _cloud: InMemoryCloud,
        source: Arc<InMemoryResource>,
        targets: Vec<Arc<InMemoryResource>>,
    }

    impl Fixture {
        fn new(models: &[&str], targets: usize) -> Self {
            let cloud = InMemoryCloud::new();
            let source = cloud.add_resource(SOURCE);
            for model in models {
                source.add_model(model, Utc::now());
            }
            let targets = (1..=targets)
                .map(|n| cloud.add_resource(&format!("https://t{}.example", n)))
                .collect();
            Self {
                _cloud: cloud,
                source,
                targets,
            }
        }

        fn source_binding(&self) -> ResourceBinding {
            ResourceBinding::ready(descriptor(SOURCE, "source"), self.source.clone())
        }

        fn target_bindings(&self) -> Vec<ResourceBinding> {
            self.targets
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    ResourceBinding::ready(
                        descriptor(&format!("https://t{}.example", i + 1), &format!("T{}", i + 1)),
                        t.clone(),
                    )
                })
                .collect()
        }
    }

    fn descriptor(endpoint: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(endpoint, "https://kv.example", "key", name)
    }

    fn settings(max_concurrency: usize) -> CopySettings {
        CopySettings {
            max_concurrency,
            poll_interval_ms: 2_000,
            deadline_secs: 60,
            poll_retries: 3,
        }
    }

    fn ids(models: &[&str]) -> Vec<String> {
        models.iter().map(|m| m.to_string()).collect()
    }

    fn pairs(results: &[CopyResult]) -> Vec<(String, String, CopyStatus)> {
        results
            .iter()
            .map(|r| (r.model_id.clone(), r.target_name.clone(), r.status))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_suffix_copy_with_collision_on_one_target() {
        let fixture = Fixture::new(&["C"], 2);
        fixture.targets[0].add_model("C-v2", Utc::now());

        let results = CopyScheduler::new(&settings(4))
            .run_batch(&fixture.source_binding(), &ids(&["C"]), &fixture.target_bindings(), Some("-v2"))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].target_name, "T1");
        assert_eq!(results[0].status, CopyStatus::Failed);
        assert_eq!(results[1].target_name, "T2");
        assert_eq!(results[1].status, CopyStatus::Succeeded);
        assert_eq!(results[1].destination_model_id, "C-v2");
        assert!(fixture.targets[1].has_model("C-v2"));
        assert_eq!(fixture.source.begin_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_request_order() {
        let fixture = Fixture::new(&["A", "B", "C"], 3);
        fixture.source.set_copy_outcome("A", CopyOutcome::Succeed { after_polls: 6 });
        fixture.source.set_copy_outcome("B", CopyOutcome::Succeed { after_polls: 3 });

        let results = CopyScheduler::new(&settings(2))
            .run_batch(&fixture.source_binding(), &ids(&["A", "B", "C"]), &fixture.target_bindings(), None)
            .await;

        assert_eq!(results.len(), 9);
        let expected: Vec<(String, String, CopyStatus)> = ["A", "B", "C"]
            .iter()
            .flat_map(|m| {
                ["T1", "T2", "T3"]
                    .iter()
                    .map(move |t| (m.to_string(), t.to_string(), CopyStatus::Succeeded))
            })
            .collect();
        assert_eq!(pairs(&results), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_are_collapsed() {
        let fixture = Fixture::new(&["A", "B"], 1);
        let mut targets = fixture.target_bindings();
        targets.push(targets[0].clone());

        let results = CopyScheduler::new(&settings(4))
            .run_batch(&fixture.source_binding(), &ids(&["A", "B", "A"]), &targets, None)
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].model_id, "A");
        assert_eq!(results[1].model_id, "B");
        assert_eq!(fixture.targets[0].authorize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_target_only_fails_its_pairs() {
        let fixture = Fixture::new(&["A", "B"], 2);
        let mut targets = fixture.target_bindings();
        targets[1] = ResourceBinding::unavailable(targets[1].descriptor.clone(), "secret not found");

        let results = CopyScheduler::new(&settings(4))
            .run_batch(&fixture.source_binding(), &ids(&["A", "B"]), &targets, None)
            .await;

        assert_eq!(
            pairs(&results),
            vec![
                ("A".to_string(), "T1".to_string(), CopyStatus::Succeeded),
                ("A".to_string(), "T2".to_string(), CopyStatus::Failed),
                ("B".to_string(), "T1".to_string(), CopyStatus::Succeeded),
                ("B".to_string(), "T2".to_string(), CopyStatus::Failed),
            ]
        );
        assert!(results[1].error.as_deref().unwrap().contains("secret not found"));
        assert_eq!(fixture.targets[1].authorize_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_source_fails_every_pair() {
        let fixture = Fixture::new(&["A"], 2);
        let source = ResourceBinding::unavailable(descriptor(SOURCE, "source"), "no identity");

        let results = CopyScheduler::new(&settings(4))
            .run_batch(&source, &ids(&["A"]), &fixture.target_bindings(), None)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == CopyStatus::Failed));
        assert_eq!(fixture.targets[0].authorize_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_rejected_at_authorization() {
        let fixture = Fixture::new(&["A"], 1);
        let scheduler = CopyScheduler::new(&settings(4));
        let source = fixture.source_binding();
        let targets = fixture.target_bindings();

        let first = scheduler.run_batch(&source, &ids(&["A"]), &targets, Some("-copy")).await;
        assert!(first[0].is_success());

        let second = scheduler.run_batch(&source, &ids(&["A"]), &targets, Some("-copy")).await;
        assert_eq!(second[0].status, CopyStatus::Failed);
        assert!(second[0].error.as_deref().unwrap().contains("Copy authorization rejected"));
        assert_eq!(fixture.source.begin_calls(), 1);
        assert_eq!(fixture.targets[0].model_ids(), vec!["A-copy".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_isolated_and_distinct() {
        let fixture = Fixture::new(&["A"], 2);
        fixture
            .source
            .set_copy_outcome_to("A", "https://t1.example", CopyOutcome::NeverFinish);

        let results = CopyScheduler::new(&settings(4))
            .run_batch(&fixture.source_binding(), &ids(&["A"]), &fixture.target_bindings(), None)
            .await;

        assert_eq!(results[0].status, CopyStatus::TimedOut);
        assert_eq!(results[1].status, CopyStatus::Succeeded);

        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary, BatchSummary { succeeded: 1, failed: 0, timed_out: 1 });
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let fixture = Fixture::new(&["A"], 1);
        let results = CopyScheduler::new(&settings(4))
            .run_batch(&fixture.source_binding(), &[], &fixture.target_bindings(), None)
            .await;
        assert!(results.is_empty());
    }
}
