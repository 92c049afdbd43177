use serde::{Deserialize, Serialize};

use crate::plan::{MountPoint, PlanBody};
use crate::run::RunBody;
use crate::tag::TagSet;

/// Core part of a Data item: its identity and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnitDataBody {
    /// Identity of the Data, also carried as its `knit#id` tag.
    pub knit_id: String,

    /// Backing volume reference, storage-layer detail.
    pub volume_ref: String,

    pub tags: TagSet,
}

impl KnitDataBody {
    /// `true` when both identity and backing volume are known.
    pub fn fulfilled(&self) -> bool {
        !self.knit_id.is_empty() && !self.volume_ref.is_empty()
    }
}

/// Records that a specific run produced or consumed Data at a specific
/// mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub mount_point: MountPoint,
    pub run: RunBody,
}

/// A candidate, not-yet-materialized binding between an unconsumed Data
/// item and a plan's input slot, awaiting run creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nomination {
    pub mount_point: MountPoint,
    pub plan: PlanBody,
}

/// A Data item together with its lineage projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnitData {
    #[serde(flatten)]
    pub body: KnitDataBody,

    /// The run that produced this Data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Dependency>,

    /// Runs that consume this Data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downstreams: Vec<Dependency>,

    /// Input slots this Data is nominated for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nominated_by: Vec<Nomination>,
}
