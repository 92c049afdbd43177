use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::status::RunStatus;
use crate::plan::PseudoPlanName;

/// Resumable round-robin position for drain-style status progression.
///
/// A pick starts just after `head` (by run id) and wraps around, so no
/// eligible run is starved by earlier ones.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RunCursor {
    /// Id of the run picked last time; empty to start from the beginning.
    pub head: String,

    /// Interval to suspend a picked run when its status did not change.
    pub debounce: Duration,

    /// Pseudo plan names the picked run may be based on.
    pub pseudo: Vec<PseudoPlanName>,

    /// When true, only pseudo-plan-based runs are picked; otherwise
    /// image-based runs qualify as well.
    pub pseudo_only: bool,

    /// Statuses a run must be in to be picked.
    pub status: Vec<RunStatus>,
}

/// Query over runs. Empty dimensions match anything.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RunFindQuery {
    /// Match runs based on one of these plans.
    pub plan_id: Vec<String>,

    /// Match runs consuming one of these Data items.
    pub input_knit_id: Vec<String>,

    /// Match runs producing one of these Data items.
    pub output_knit_id: Vec<String>,

    /// Match runs in one of these statuses.
    pub status: Vec<RunStatus>,

    /// Match runs updated at or after this instant.
    pub updated_since: Option<OffsetDateTime>,

    /// Match runs updated before this instant.
    pub updated_until: Option<OffsetDateTime>,
}

/// The `(plan, input slot, data)` binding that triggered a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionTrigger {
    pub plan_id: String,
    pub input_id: u64,
    pub knit_id: String,
}

impl fmt::Display for ProjectionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plan{{{}}}.mountpoint{{{}}} = knit id {}",
            self.plan_id, self.input_id, self.knit_id
        )
    }
}
