//! Job entity and its lifecycle state machine.
//!
//! ```text
//! Created ──► Queued ──► Complete
//!    │           └─────► Failed
//!    └──────────────────► Complete | Failed   (response raced ahead of dispatch)
//! ```
//!
//! `Complete` and `Failed` are terminal. A terminal job never moves back to
//! `Created` or `Queued`. A second terminal transition overwrites the first
//! and is reported to the caller as anomalous.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a job, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random (v4) identifier.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing `Uuid`.
    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner `Uuid`.
    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Created,
    Queued,
    Complete,
    Failed,
}

impl JobState {
    /// Whether no further transition is valid from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "CREATED",
            JobState::Queued => "QUEUED",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome of applying a transition to a job in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state moved forward.
    Applied,
    /// A terminal state was overwritten by another terminal state.
    Overwrote(JobState),
    /// The job had already moved past the requested state; nothing changed.
    Skipped(JobState),
}

impl Transition {
    /// Whether the in-memory job changed and needs a persisted snapshot.
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::Skipped(_))
    }
}

/// One unit of work tracked through its lifecycle.
///
/// Serialized with the field names `id`, `type`, `state`, `createdAt` and
/// `finishedAt` (unix seconds; absent until the job reaches a terminal state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    id: JobId,
    #[serde(rename = "type")]
    job_type: String,
    state: JobState,
    #[serde(with = "chrono::serde::ts_seconds")]
    created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job in the `Created` state with a fresh identifier.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self::with_id(JobId::new(), job_type, Utc::now())
    }

    /// Creates a job with an explicit identifier and creation time.
    pub fn with_id(id: JobId, job_type: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            state: JobState::Created,
            created_at,
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Category tag; also the queue destination the job is published to.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// `Created` → `Queued`. Any later state is left untouched.
    pub fn mark_queued(&mut self) -> Transition {
        match self.state {
            JobState::Created => {
                self.state = JobState::Queued;
                Transition::Applied
            }
            current => Transition::Skipped(current),
        }
    }

    /// Moves the job into `Complete`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Transition {
        self.finish(JobState::Complete, at)
    }

    /// Moves the job into `Failed`.
    pub fn fail(&mut self, at: DateTime<Utc>) -> Transition {
        self.finish(JobState::Failed, at)
    }

    fn finish(&mut self, terminal: JobState, at: DateTime<Utc>) -> Transition {
        debug_assert!(terminal.is_terminal());

        let previous = self.state;
        self.state = terminal;
        self.finished_at = Some(at);

        if previous.is_terminal() {
            Transition::Overwrote(previous)
        } else {
            Transition::Applied
        }
    }

    /// Whether the job reached a terminal state at or before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.state.is_terminal() && self.finished_at.is_some_and(|at| at <= cutoff)
    }

    /// Whether the job is still pending and was created at or before `cutoff`.
    pub fn pending_since(&self, cutoff: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.created_at <= cutoff
    }
}
