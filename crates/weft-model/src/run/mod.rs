mod status;
pub use status::{RunStatus, UnknownRunStatus, statuses_for_plan_activation};

mod body;
pub use body::{Assignment, Run, RunBody, RunExit, RunLog};

mod cursor;
pub use cursor::{ProjectionTrigger, RunCursor, RunFindQuery};
