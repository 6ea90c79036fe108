//! Copy task definition
//!
//! Each (model, target) pair moves through an explicit phase value. Phases
//! only advance; a terminal phase is converted into exactly one result.

use std::fmt;
use std::time::Duration;

use common::models::{CopyAuthorization, CopyOperationHandle, CopyRequest, CopyResult};

/// Phase of one copy pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPhase {
    /// Asking the target to reserve the destination name
    Authorizing,

    /// Asking the source to start the transfer
    Initiating(CopyAuthorization),

    /// Waiting for the remote operation to finish
    Polling {
        /// Operation issued by the source
        handle: CopyOperationHandle,
        /// Transient status failures in a row
        consecutive_failures: u32,
    },

    /// The model is on the target
    Succeeded,

    /// The pair failed, with detail
    Failed(String),

    /// No terminal state was seen before the deadline
    TimedOut,
}

impl CopyPhase {
    /// Returns true once no further step will run
    pub fn is_terminal(&self) -> bool {
        matches!(self, CopyPhase::Succeeded | CopyPhase::Failed(_) | CopyPhase::TimedOut)
    }
}

impl fmt::Display for CopyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyPhase::Authorizing => write!(f, "authorizing"),
            CopyPhase::Initiating(_) => write!(f, "initiating"),
            CopyPhase::Polling { .. } => write!(f, "polling"),
            CopyPhase::Succeeded => write!(f, "succeeded"),
            CopyPhase::Failed(_) => write!(f, "failed"),
            CopyPhase::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One queued copy pair
#[derive(Debug, Clone)]
pub struct CopyTask {
    /// Position in the batch
    pub index: usize,

    /// Pair to copy
    pub request: CopyRequest,

    /// Current phase
    pub phase: CopyPhase,
}

impl CopyTask {
    /// Creates a task in the authorizing phase
    pub fn new(index: usize, request: CopyRequest) -> Self {
        Self {
            index,
            request,
            phase: CopyPhase::Authorizing,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        format!(
            "{} -> {} as '{}'",
            self.request.model_id,
            self.request.target.display_name,
            self.request.destination_model_id()
        )
    }

    /// Converts a finished task into its result
    ///
    /// A task that never reached a terminal phase reports as failed.
    pub fn into_result(self, elapsed: Duration) -> CopyResult {
        match self.phase {
            CopyPhase::Succeeded => CopyResult::succeeded(&self.request, elapsed),
            CopyPhase::TimedOut => CopyResult::timed_out(&self.request, elapsed),
            CopyPhase::Failed(detail) => CopyResult::failed(&self.request, detail, elapsed),
            phase => CopyResult::failed(
                &self.request,
                format!("Copy stopped while {}", phase),
                elapsed,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::{CopyStatus, ResourceDescriptor};

    fn request() -> CopyRequest {
        CopyRequest::new(
            "C",
            ResourceDescriptor::new("https://src.example", "https://kv.example", "s", "source"),
            ResourceDescriptor::new("https://t1.example", "https://kv.example", "t", "target-1"),
            Some("-v2".to_string()),
        )
    }

    #[test]
    fn test_new_task_is_authorizing() {
        let task = CopyTask::new(3, request());
        assert_eq!(task.phase, CopyPhase::Authorizing);
        assert!(!task.phase.is_terminal());
        assert_eq!(task.label(), "C -> target-1 as 'C-v2'");
    }

    #[test]
    fn test_terminal_phases_map_to_results() {
        let mut task = CopyTask::new(0, request());
        task.phase = CopyPhase::Failed("ModelExists".to_string());
        let result = task.into_result(Duration::from_secs(1));
        assert_eq!(result.status, CopyStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("ModelExists"));

        let mut task = CopyTask::new(0, request());
        task.phase = CopyPhase::TimedOut;
        assert_eq!(task.into_result(Duration::ZERO).status, CopyStatus::TimedOut);
    }

    #[test]
    fn test_unfinished_task_reports_failed() {
        let result = CopyTask::new(0, request()).into_result(Duration::ZERO);
        assert_eq!(result.status, CopyStatus::Failed);
        assert!(result.error.unwrap().contains("authorizing"));
    }
}
