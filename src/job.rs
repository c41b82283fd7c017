//! Jobs: one unit of pipeline work per accepted input file.
//!
//! A job only ever moves forward through its states:
//!
//! ```text
//! Idle ──▶ Reading ──▶ Converting ──▶ Complete
//!             │             │
//!             └─────────────┴───────▶ Failed
//! ```
//!
//! `Complete` and `Failed` are terminal. Transitions are applied by the
//! control task only, when a stage reports back.

use crate::artifact::ArtifactRecord;
use crate::error::StageError;
use crate::pipeline::input::MediaType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-unique job identifier. Also identifies the artifact the job
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Where a job is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet dispatched.
    Idle,
    /// Chunked ingestion in progress.
    Reading,
    /// Decode, page composition and document assembly in progress.
    Converting,
    /// Artifact published.
    Complete,
    /// A stage failed; see [`Job::failure`].
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }

    /// Whether `self → next` is a legal edge of the state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Reading)
                | (Reading, Converting)
                | (Reading, Failed)
                | (Converting, Complete)
                | (Converting, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Reading => "reading",
            JobState::Converting => "converting",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Returned when a transition is not an edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{job}: illegal transition {from} → {to}")]
pub struct InvalidTransition {
    pub job: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// A job and everything known about it so far.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Name of the originating file.
    pub file_name: String,
    /// Media type of the originating file.
    pub media_type: MediaType,
    /// Declared byte length of the originating file.
    pub file_len: u64,
    pub state: JobState,
    /// Set once the job reaches [`JobState::Complete`].
    #[serde(skip)]
    pub artifact: Option<ArtifactRecord>,
    /// Set once the job reaches [`JobState::Failed`].
    pub failure: Option<StageError>,
}

impl Job {
    pub(crate) fn new(id: JobId, file_name: String, media_type: MediaType, file_len: u64) -> Self {
        Self {
            id,
            file_name,
            media_type,
            file_len,
            state: JobState::Idle,
            artifact: None,
            failure: None,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub(crate) fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                job: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn complete(&mut self, artifact: ArtifactRecord) -> Result<(), InvalidTransition> {
        self.advance(JobState::Complete)?;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: StageError) -> Result<(), InvalidTransition> {
        self.advance(JobState::Failed)?;
        self.failure = Some(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId(1), "a.png".into(), MediaType::Png, 10)
    }

    #[test]
    fn happy_path_transitions() {
        let mut j = job();
        j.advance(JobState::Reading).unwrap();
        j.advance(JobState::Converting).unwrap();
        j.advance(JobState::Complete).unwrap();
        assert!(j.state.is_terminal());
    }

    #[test]
    fn cannot_skip_reading() {
        let mut j = job();
        let err = j.advance(JobState::Converting).unwrap_err();
        assert_eq!(err.from, JobState::Idle);
        assert_eq!(j.state, JobState::Idle);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut j = job();
        j.advance(JobState::Reading).unwrap();
        j.fail(StageError::Read {
            file: "a.png".into(),
            detail: "gone".into(),
        })
        .unwrap();
        assert!(j.advance(JobState::Converting).is_err());
        assert!(j.advance(JobState::Reading).is_err());
        assert!(j.failure.is_some());
    }

    #[test]
    fn idle_cannot_fail_directly() {
        assert!(!JobState::Idle.can_transition_to(JobState::Failed));
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId(7).to_string(), "job-7");
    }
}
