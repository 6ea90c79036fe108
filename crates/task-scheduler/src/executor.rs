//! Copy executor
//!
//! Drives one pair through authorization, initiation and polling. Every
//! failure is captured in the pair's result; nothing is propagated.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use common::error::Error;
use common::models::{CopyOperationHandle, CopyRequest, CopyResult, OperationState};
use common::utils::format_duration;
use model_manager::ModelAdministration;
use settings::CopySettings;

use crate::task::{CopyPhase, CopyTask};

/// Executes copy tasks
#[derive(Debug, Clone)]
pub struct CopyExecutor {
    /// Delay between status polls
    poll_interval: Duration,

    /// Per-pair deadline, measured from the start of the pair
    deadline: Duration,

    /// Consecutive transient poll failures tolerated
    poll_retries: u32,
}

impl CopyExecutor {
    /// Creates an executor from copy settings
    pub fn new(settings: &CopySettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            deadline: settings.deadline(),
            poll_retries: settings.poll_retries,
        }
    }

    /// Runs `task` to a terminal phase and returns its result
    pub async fn execute(
        &self,
        mut task: CopyTask,
        source: &dyn ModelAdministration,
        target: &dyn ModelAdministration,
    ) -> CopyResult {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let label = task.label();

        info!("Copying {}", label);

        while !task.phase.is_terminal() {
            let phase = std::mem::replace(&mut task.phase, CopyPhase::Authorizing);
            let next = self.advance(&task.request, phase, source, target, deadline).await;
            debug!("{}: {}", label, next);
            task.phase = next;
        }

        let elapsed = started.elapsed();
        match &task.phase {
            CopyPhase::Succeeded => info!("Copied {} in {}", label, format_duration(elapsed)),
            CopyPhase::TimedOut => warn!(
                "Copy {} still running after {}, no longer polling",
                label,
                format_duration(elapsed)
            ),
            CopyPhase::Failed(detail) => error!("Copy {} failed: {}", label, detail),
            _ => {}
        }

        task.into_result(elapsed)
    }

    async fn advance(
        &self,
        request: &CopyRequest,
        phase: CopyPhase,
        source: &dyn ModelAdministration,
        target: &dyn ModelAdministration,
        deadline: Instant,
    ) -> CopyPhase {
        match phase {
            CopyPhase::Authorizing => {
                let destination = request.destination_model_id();
                match target.authorize_copy(&destination, None).await {
                    Ok(authorization) => CopyPhase::Initiating(authorization),
                    Err(e) => CopyPhase::Failed(e.to_string()),
                }
            }

            CopyPhase::Initiating(authorization) => {
                match source.begin_copy(&request.model_id, &authorization).await {
                    Ok(handle) => CopyPhase::Polling {
                        handle,
                        consecutive_failures: 0,
                    },
                    Err(e) => CopyPhase::Failed(e.to_string()),
                }
            }

            CopyPhase::Polling {
                handle,
                consecutive_failures,
            } => match source.copy_status(&handle).await {
                Ok(status) => match status.state {
                    OperationState::Succeeded => CopyPhase::Succeeded,
                    OperationState::Failed => CopyPhase::Failed(
                        status
                            .error
                            .unwrap_or_else(|| "Copy operation failed".to_string()),
                    ),
                    OperationState::Canceled => CopyPhase::Failed(
                        status
                            .error
                            .unwrap_or_else(|| "Copy operation was canceled".to_string()),
                    ),
                    OperationState::NotStarted | OperationState::Running => {
                        if let Some(percent) = status.percent_completed {
                            debug!("{} at {}%", handle, percent);
                        }
                        self.wait(handle, 0, deadline).await
                    }
                },

                Err(e) if e.is_transient() => {
                    let failures = consecutive_failures + 1;
                    if failures > self.poll_retries {
                        let err = Error::Poll(format!("{} consecutive status failures, last: {}", failures, e));
                        return CopyPhase::Failed(err.to_string());
                    }

                    warn!(
                        "Status query for {} failed (attempt {}/{}): {}",
                        handle,
                        failures,
                        self.poll_retries + 1,
                        e
                    );
                    self.wait(handle, failures, deadline).await
                }

                Err(e) => CopyPhase::Failed(e.to_string()),
            },

            terminal => terminal,
        }
    }

    /// Sleeps until the next poll, or reports the deadline
    async fn wait(
        &self,
        handle: CopyOperationHandle,
        consecutive_failures: u32,
        deadline: Instant,
    ) -> CopyPhase {
        let now = Instant::now();
        if now >= deadline {
            return CopyPhase::TimedOut;
        }

        sleep(self.poll_interval.min(deadline - now)).await;

        if Instant::now() >= deadline {
            CopyPhase::TimedOut
        } else {
            CopyPhase::Polling {
                handle,
                consecutive_failures,
            }
        }
    }
}
