//! Structured error types for the coordinator.
//!
//! `CoordinatorError` is returned by operation-level calls (`generate_job`,
//! `queue_job`, transitions). Adapter failures arrive as `anyhow::Error` and
//! are wrapped with the job they belong to so callers can decide what to do.
//!
//! Inbound response problems never surface as errors. They are described by
//! [`DiscardReason`], logged, and dropped.

use crate::job::JobId;

/// Errors surfaced to the immediate caller of a coordinator operation.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// No job with this identifier is in the table.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// A freshly generated identifier collided with an existing entry.
    #[error("generated job id {0} is already in use")]
    DuplicateId(JobId),

    /// The job snapshot could not be serialized.
    #[error("failed to encode job snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    /// Publishing to the queue failed; the job stays `Created`.
    #[error("failed to publish job {job_id}: {source}")]
    Publish {
        /// The job that was being dispatched.
        job_id: JobId,
        /// Adapter error.
        source: anyhow::Error,
    },

    /// The in-memory transition was applied but the snapshot was not stored.
    #[error("failed to persist job {job_id}: {source}")]
    Persist {
        /// The job whose snapshot was being written.
        job_id: JobId,
        /// Adapter error.
        source: anyhow::Error,
    },
}

impl CoordinatorError {
    /// The job this error refers to.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            CoordinatorError::NotFound(id) | CoordinatorError::DuplicateId(id) => Some(*id),
            CoordinatorError::Publish { job_id, .. } | CoordinatorError::Persist { job_id, .. } => {
                Some(*job_id)
            }
            CoordinatorError::Encode(_) => None,
        }
    }
}

/// Why an inbound response message was dropped.
///
/// Every variant is isolated to a single message; the consumer keeps going.
#[derive(Debug, thiserror::Error)]
pub enum DiscardReason {
    /// The `jobID` header was absent.
    #[error("jobID not found in message metadata")]
    MissingJobId,

    /// The `jobID` header was present but not a string.
    #[error("jobID in message metadata is not a string")]
    JobIdNotString,

    /// The `jobID` header was a string but not a valid identifier.
    #[error("jobID {0:?} is not a valid job identifier")]
    MalformedJobId(String),

    /// No job with this identifier is in the table.
    #[error("job {0} not found in job table")]
    UnknownJob(JobId),

    /// The message body was not a valid job response.
    #[error("failed to decode job response: {0}")]
    Undecodable(#[source] serde_json::Error),

    /// The reported state was neither `SUCCESS` nor `FAILURE`.
    #[error("unknown job response state {0:?}")]
    UnknownState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_job_id() {
        let id = JobId::new();
        assert_eq!(CoordinatorError::NotFound(id).job_id(), Some(id));

        let err = CoordinatorError::Publish {
            job_id: id,
            source: anyhow::anyhow!("broker down"),
        };
        assert_eq!(err.job_id(), Some(id));
        assert!(err.to_string().contains("broker down"));
    }

    #[test]
    fn test_discard_reason_display() {
        let reason = DiscardReason::UnknownState("PENDING".to_string());
        assert_eq!(reason.to_string(), "unknown job response state \"PENDING\"");
    }
}
