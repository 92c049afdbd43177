mod error;
pub use error::{PlanError, TagError};

mod tag;
pub use tag::{
    KEY_KNIT_ID, KEY_KNIT_TIMESTAMP, KEY_KNIT_TRANSIENT, SYSTEM_TAG_PREFIX, Tag, TagDelta, TagSet,
    VALUE_TRANSIENT_FAILED, VALUE_TRANSIENT_PROCESSING,
};

mod plan;
pub use plan::{
    ImageIdentifier, LogParam, LogPoint, MountPoint, MountPointParam, OnNode, OnNodeMode, Plan,
    PlanBody, PlanParam, PlanSpec, PseudoPlanName, Resources,
};

mod run;
pub use run::{
    Assignment, ProjectionTrigger, Run, RunBody, RunCursor, RunExit, RunFindQuery, RunLog,
    RunStatus, UnknownRunStatus, statuses_for_plan_activation,
};

mod data;
pub use data::{Dependency, KnitData, KnitDataBody, Nomination};
