use std::fmt;

use serde::{Deserialize, Serialize};

use super::image::ImageIdentifier;
use super::mount::{LogPoint, MountPoint};
use super::on_node::OnNode;
use super::resources::Resources;

/// System-defined pseudo plan names.
///
/// Pseudo plans have no container image; they stand for data entering the
/// system from outside (manual upload, import from another deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PseudoPlanName {
    Uploaded,
    Imported,
}

impl PseudoPlanName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoPlanName::Uploaded => "knit#uploaded",
            PseudoPlanName::Imported => "knit#imported",
        }
    }
}

impl fmt::Display for PseudoPlanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main body of a plan: what it is, apart from its mount points.
///
/// Exactly one of `image` and `pseudo` is set. The storage-assigned
/// `plan_id` is a separate, non-semantic key; content identity for
/// deduplication is `(hash, image:version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBody {
    /// Opaque storage identifier.
    pub plan_id: String,

    /// Content hash over the canonicalized plan fields.
    ///
    /// A differing hash always means a different plan; an equal hash alone
    /// does not guarantee equivalence (hashes can collide).
    pub hash: String,

    /// When true, runs may be instantiated from this plan.
    /// Always true for pseudo plans.
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageIdentifier>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pseudo: Option<PseudoPlanName>,

    #[serde(default, skip_serializing_if = "Resources::is_empty")]
    pub resources: Resources,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_node: Vec<OnNode>,
}

impl PlanBody {
    /// `true` for system-defined pseudo plans.
    pub fn is_pseudo(&self) -> bool {
        self.pseudo.is_some()
    }

    /// Content equivalence ignoring the storage identifier.
    pub fn equiv(&self, other: &PlanBody) -> bool {
        self.active == other.active
            && self.hash == other.hash
            && self.image == other.image
            && self.pseudo == other.pseudo
            && self.on_node == other.on_node
            && self.resources == other.resources
    }
}

/// A plan together with its mount points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(flatten)]
    pub body: PlanBody,

    pub inputs: Vec<MountPoint>,

    pub outputs: Vec<MountPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogPoint>,
}

impl Plan {
    /// Content equivalence ignoring storage identifiers.
    pub fn equiv(&self, other: &Plan) -> bool {
        self.body.equiv(&other.body)
            && self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&other.inputs)
                .all(|(a, b)| a.equiv(b))
            && self.outputs.len() == other.outputs.len()
            && self
                .outputs
                .iter()
                .zip(&other.outputs)
                .all(|(a, b)| a.equiv(b))
            && match (&self.log, &other.log) {
                (None, None) => true,
                (Some(a), Some(b)) => a.equiv(b),
                _ => false,
            }
    }
}
