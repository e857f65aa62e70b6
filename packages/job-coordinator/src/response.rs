//! Inbound result signals and the metadata that correlates them to jobs.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DiscardReason;
use crate::job::JobId;

/// Metadata key carrying the job identifier on both outbound and inbound messages.
pub const CORRELATION_KEY: &str = "jobID";

/// Destination the response consumer listens on.
pub const RESPONSE_DESTINATION: &str = "job-responses";

/// Message metadata (queue headers).
///
/// Values are JSON so that brokers with typed header tables can be
/// represented; only string values are accepted as a `jobID`.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Builds the correlation metadata attached to a dispatched job.
pub fn correlation_metadata(job_id: JobId) -> Metadata {
    let mut metadata = Metadata::with_capacity(1);
    metadata.insert(
        CORRELATION_KEY.to_string(),
        serde_json::Value::String(job_id.to_string()),
    );
    metadata
}

/// A message delivered by the queue subscriber.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub metadata: Metadata,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(metadata: Metadata, payload: impl Into<Bytes>) -> Self {
        Self {
            metadata,
            payload: payload.into(),
        }
    }

    /// A message correlated to `job_id` carrying `payload` as its body.
    pub fn for_job(job_id: JobId, payload: impl Into<Bytes>) -> Self {
        Self::new(correlation_metadata(job_id), payload)
    }

    /// Extracts the correlated job identifier from the metadata.
    pub fn job_id(&self) -> Result<JobId, DiscardReason> {
        let value = self
            .metadata
            .get(CORRELATION_KEY)
            .ok_or(DiscardReason::MissingJobId)?;

        let raw = value.as_str().ok_or(DiscardReason::JobIdNotString)?;

        raw.parse::<JobId>()
            .map_err(|_| DiscardReason::MalformedJobId(raw.to_string()))
    }

    /// Decodes the body into a [`JobResponse`].
    pub fn response(&self) -> Result<JobResponse, DiscardReason> {
        serde_json::from_slice(&self.payload).map_err(DiscardReason::Undecodable)
    }
}

/// Outcome reported by an external consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success,
    Failure,
}

/// Result signal for exactly one job.
///
/// Accepts both the `jobState`/`jobData` and `state`/`payload` spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    #[serde(rename = "jobID", default)]
    pub job_id: Option<String>,

    #[serde(rename = "jobState", alias = "state")]
    pub state: String,

    /// Opaque result data; never interpreted here.
    #[serde(rename = "jobData", alias = "payload", default)]
    pub payload: serde_json::Value,
}

impl JobResponse {
    pub fn success(job_id: JobId) -> Self {
        Self::with_state(job_id, "SUCCESS")
    }

    pub fn failure(job_id: JobId) -> Self {
        Self::with_state(job_id, "FAILURE")
    }

    pub fn with_state(job_id: JobId, state: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            state: state.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Maps the reported state onto a terminal outcome.
    pub fn outcome(&self) -> Result<ResponseOutcome, DiscardReason> {
        match self.state.as_str() {
            "SUCCESS" => Ok(ResponseOutcome::Success),
            "FAILURE" => Ok(ResponseOutcome::Failure),
            other => Err(DiscardReason::UnknownState(other.to_string())),
        }
    }

    /// Wraps the response in a message correlated to `job_id`.
    pub fn into_message(self, job_id: JobId) -> Result<InboundMessage, serde_json::Error> {
        let body = serde_json::to_vec(&self)?;
        Ok(InboundMessage::for_job(job_id, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_from_metadata() {
        let id = JobId::new();
        let msg = InboundMessage::for_job(id, Bytes::new());
        assert_eq!(msg.job_id().unwrap(), id);
    }

    #[test]
    fn test_missing_job_id() {
        let msg = InboundMessage::new(Metadata::new(), Bytes::new());
        assert!(matches!(msg.job_id(), Err(DiscardReason::MissingJobId)));
    }

    #[test]
    fn test_non_string_job_id() {
        let mut metadata = Metadata::new();
        metadata.insert(CORRELATION_KEY.to_string(), json!(42));
        let msg = InboundMessage::new(metadata, Bytes::new());
        assert!(matches!(msg.job_id(), Err(DiscardReason::JobIdNotString)));
    }

    #[test]
    fn test_malformed_job_id() {
        let mut metadata = Metadata::new();
        metadata.insert(CORRELATION_KEY.to_string(), json!("abc"));
        let msg = InboundMessage::new(metadata, Bytes::new());
        assert!(matches!(
            msg.job_id(),
            Err(DiscardReason::MalformedJobId(raw)) if raw == "abc"
        ));
    }

    #[test]
    fn test_decode_original_field_names() {
        let id = JobId::new();
        let body = json!({ "jobID": id.to_string(), "jobState": "SUCCESS", "jobData": "<html>" });
        let msg = InboundMessage::for_job(id, serde_json::to_vec(&body).unwrap());

        let response = msg.response().unwrap();
        assert_eq!(response.outcome().unwrap(), ResponseOutcome::Success);
        assert_eq!(response.payload, json!("<html>"));
    }

    #[test]
    fn test_decode_short_field_names() {
        let body = json!({ "state": "FAILURE", "payload": { "reason": "timeout" } });
        let msg = InboundMessage::for_job(JobId::new(), serde_json::to_vec(&body).unwrap());

        let response = msg.response().unwrap();
        assert_eq!(response.outcome().unwrap(), ResponseOutcome::Failure);
        assert!(response.job_id.is_none());
    }

    #[test]
    fn test_undecodable_body() {
        let msg = InboundMessage::for_job(JobId::new(), &b"not json"[..]);
        assert!(matches!(msg.response(), Err(DiscardReason::Undecodable(_))));
    }

    #[test]
    fn test_unknown_state() {
        let response = JobResponse::with_state(JobId::new(), "RUNNING");
        assert!(matches!(
            response.outcome(),
            Err(DiscardReason::UnknownState(s)) if s == "RUNNING"
        ));
    }
}
