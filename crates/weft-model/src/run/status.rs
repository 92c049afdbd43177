use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The lifecycle state of a run.
///
/// A run moves forward through this graph only; the legal edges are encoded
/// in [`RunStatus::can_transition_to`]. `Invalidated` is never a requested
/// transition target, it is reachable only through deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// The linked plan is deactivated; this run will not be scheduled.
    Deactivated,

    /// Waiting to be run.
    Waiting,

    /// Fulfilled to start: worker name and output volumes are decided.
    Ready,

    /// The worker is starting.
    Starting,

    /// The worker is running.
    Running,

    /// The worker has been observed to stop successfully.
    Completing,

    /// The worker has been observed (or is required) to stop unsuccessfully.
    Aborting,

    /// Finished successfully. Terminal.
    Done,

    /// Stopped with error. Terminal.
    Failed,

    /// Discarded. Terminal; reachable only via deletion.
    Invalidated,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a run status")]
pub struct UnknownRunStatus(String);

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Deactivated => "deactivated",
            RunStatus::Waiting => "waiting",
            RunStatus::Ready => "ready",
            RunStatus::Starting => "starting",
            RunStatus::Running => "running",
            RunStatus::Completing => "completing",
            RunStatus::Aborting => "aborting",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Invalidated => "invalidated",
        }
    }

    /// `false` only before any worker activity is possible.
    pub fn has_started(&self) -> bool {
        !matches!(
            self,
            RunStatus::Deactivated | RunStatus::Waiting | RunStatus::Ready | RunStatus::Starting
        )
    }

    /// `true` while a worker may be acting on behalf of the run.
    ///
    /// Data produced by a run in (or before) these states carries the
    /// `knit#transient:processing` marker.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            RunStatus::Running | RunStatus::Completing | RunStatus::Aborting
        )
    }

    /// `true` for statuses whose output data carries `knit#transient:failed`.
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Invalidated)
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(self, RunStatus::Invalidated)
    }

    /// `true` when requesting `next` from this status is a legal edge.
    ///
    /// Re-requesting the current status is accepted as a debounce no-op,
    /// except from terminal states. `Invalidated` is never a legal target.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if next == RunStatus::Invalidated {
            return false;
        }
        match self {
            RunStatus::Done | RunStatus::Failed | RunStatus::Invalidated => false,
            _ if *self == next => true,
            RunStatus::Deactivated => {
                matches!(next, RunStatus::Waiting | RunStatus::Aborting)
            }
            RunStatus::Waiting => {
                matches!(
                    next,
                    RunStatus::Deactivated | RunStatus::Ready | RunStatus::Aborting
                )
            }
            RunStatus::Ready => {
                matches!(
                    next,
                    RunStatus::Starting
                        | RunStatus::Running
                        | RunStatus::Completing
                        | RunStatus::Aborting
                )
            }
            RunStatus::Starting => {
                matches!(
                    next,
                    RunStatus::Running | RunStatus::Completing | RunStatus::Aborting
                )
            }
            RunStatus::Running => {
                matches!(next, RunStatus::Completing | RunStatus::Aborting)
            }
            RunStatus::Completing => next == RunStatus::Done,
            RunStatus::Aborting => next == RunStatus::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownRunStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deactivated" => Ok(RunStatus::Deactivated),
            "waiting" => Ok(RunStatus::Waiting),
            "ready" => Ok(RunStatus::Ready),
            "starting" => Ok(RunStatus::Starting),
            "running" => Ok(RunStatus::Running),
            "completing" => Ok(RunStatus::Completing),
            "aborting" => Ok(RunStatus::Aborting),
            "done" => Ok(RunStatus::Done),
            "failed" => Ok(RunStatus::Failed),
            "invalidated" => Ok(RunStatus::Invalidated),
            other => Err(UnknownRunStatus(other.to_string())),
        }
    }
}

/// The `(to, from)` status pair applied to a plan's runs when the plan's
/// activity flag is set to `activate`.
///
/// Activating a plan wakes its `Deactivated` runs to `Waiting`;
/// deactivating parks its `Waiting` runs as `Deactivated`.
pub fn statuses_for_plan_activation(activate: bool) -> (RunStatus, RunStatus) {
    if activate {
        (RunStatus::Waiting, RunStatus::Deactivated)
    } else {
        (RunStatus::Deactivated, RunStatus::Waiting)
    }
}
