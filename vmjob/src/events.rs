use crate::types::OutputBlob;
use serde::{Deserialize, Serialize};

/// Where a job is in its lifecycle.
///
/// Transitions only move forward: `Created -> Spawned -> Executing -> Terminated`.
/// A job whose hypervisor never started goes straight from `Created` to `Terminated`,
/// and one whose guest never became reachable from `Spawned` to `Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Spawned,
    Executing,
    Terminated,
}

/// Whether the script ran to a successful completion.
///
/// Independent from [`JobState`]: a job always terminates, success is a separate fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl JobStatus {
    pub fn created() -> Self {
        Self::in_state(JobState::Created)
    }

    pub fn in_state(state: JobState) -> Self {
        Self {
            state,
            outcome: None,
            teardown_error: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == JobState::Terminated
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(JobOutcome::Succeeded)) && self.teardown_error.is_none()
    }
}

/// A chunk of script output, tagged with the stream it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Stdout(OutputBlob),
    Stderr(OutputBlob),
}

impl Output {
    pub fn blob(&self) -> &OutputBlob {
        match self {
            Output::Stdout(blob) | Output::Stderr(blob) => blob,
        }
    }
}
