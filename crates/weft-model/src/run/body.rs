use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::status::RunStatus;
use crate::data::KnitDataBody;
use crate::plan::{MountPoint, PlanBody};
use crate::tag::TagSet;

/// Exit record of a finished worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunExit {
    pub code: u8,
    pub message: String,
}

/// Core part of a run: status, bookkeeping, and the plan snapshot it was
/// instantiated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBody {
    /// Opaque storage identifier.
    pub run_id: String,

    pub status: RunStatus,

    /// Name of the worker acting for this run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,

    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    /// Exit record, once the worker has stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<RunExit>,

    /// The plan this run was instantiated from.
    pub plan: PlanBody,
}

/// Binds a run's declared slot to the actual Data, once known.
///
/// `data` is `None` while the slot is not yet fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub mount_point: MountPoint,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<KnitDataBody>,
}

/// The log slot of a run and the Data captured for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub id: u64,
    pub tags: TagSet,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<KnitDataBody>,
}

/// A run together with its slot assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    #[serde(flatten)]
    pub body: RunBody,

    pub inputs: Vec<Assignment>,

    pub outputs: Vec<Assignment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<RunLog>,
}
