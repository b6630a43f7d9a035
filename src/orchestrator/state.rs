//! Build state machine and the events the orchestrator publishes.
//!
//! **Lifecycle**: `Idle → Validating → VerifyingFiles → Building` and then one of
//! the outcome states. Any pre-build state may also end early in `Failed` or
//! `Cancelled`. Outcome states are reported once and the orchestrator returns
//! to `Idle` for the next run.

use crate::error::{ResultCode, VerificationError};
use crate::models::ValidationReport;
use crate::system::verification::VerificationStatus;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Idle,
    /// Running the full validator
    Validating,
    /// Per-partition pre-flight pass; cancellation is polled here
    VerifyingFiles,
    /// lpmake is running
    Building,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Idle => "idle",
            BuildState::Validating => "validating",
            BuildState::VerifyingFiles => "verifying files",
            BuildState::Building => "building",
            BuildState::Succeeded => "succeeded",
            BuildState::Failed => "failed",
            BuildState::Cancelled => "cancelled",
        }
    }

    /// States that end a run.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            BuildState::Succeeded | BuildState::Failed | BuildState::Cancelled
        )
    }

    /// Valid transitions FROM this state.
    pub fn valid_next_states(&self) -> Vec<BuildState> {
        match self {
            BuildState::Idle => vec![BuildState::Validating],
            BuildState::Validating => vec![
                BuildState::VerifyingFiles,
                BuildState::Failed,
                BuildState::Cancelled,
            ],
            BuildState::VerifyingFiles => vec![
                BuildState::Building,
                BuildState::Failed,
                BuildState::Cancelled,
            ],
            BuildState::Building => vec![
                BuildState::Succeeded,
                BuildState::Failed,
                BuildState::Cancelled,
            ],
            BuildState::Succeeded | BuildState::Failed | BuildState::Cancelled => {
                vec![BuildState::Idle]
            }
        }
    }

    pub fn can_transition_to(&self, next: BuildState) -> bool {
        self.valid_next_states().contains(&next)
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final report of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub state: BuildState,
    pub code: ResultCode,
    pub message: String,
    /// Blocking findings or process diagnostics
    pub errors: Vec<String>,
    /// Set on success
    pub output_path: Option<PathBuf>,
    pub output_size: Option<u64>,
    pub duration: Duration,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == BuildState::Succeeded
    }
}

/// Everything a listener can observe about a run, in emission order.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    StateChanged { from: BuildState, to: BuildState },
    /// Synthetic progress, 0..=100
    Progress(u32),
    /// One line of lpmake output or an orchestrator status line
    Log(String),
    /// Non-blocking finding, including advisory verification failures
    Warning(String),
    ValidationReport(ValidationReport),
    Verification(Result<VerificationStatus, VerificationError>),
    Finished(BuildOutcome),
}
