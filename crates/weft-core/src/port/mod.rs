//! Persistence ports.
//!
//! Every store is addressed through one of these traits; callers never see
//! the backing storage. Methods that return identifier lists (`find`) keep
//! the full records behind a follow-up `get`, so listings stay cheap.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use weft_model::{
    ImageIdentifier, KnitData, Plan, PlanSpec, ProjectionTrigger, PseudoPlanName, Resources, Run,
    RunCursor, RunExit, RunFindQuery, RunStatus, TagDelta, TagSet,
};

use crate::error::{CoreError, CoreResult};

/// Plan registry: registration, activation and lookup.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Fetch plans by id. Unknown ids are silently absent from the result.
    async fn get(&self, plan_ids: &[String]) -> CoreResult<HashMap<String, Plan>>;

    /// Persist a validated plan, or fail with
    /// [`CoreError::EquivPlanExists`] naming the content-equivalent plan
    /// already registered.
    async fn register(&self, spec: PlanSpec) -> CoreResult<Plan>;

    /// Flip a plan's active flag and move its not-yet-started runs
    /// between `waiting` and `deactivated` accordingly.
    async fn activate(&self, plan_id: &str, active: bool) -> CoreResult<Plan>;

    /// Merge resource limits into the plan (existing types are overwritten).
    async fn set_resource_limit(&self, plan_id: &str, resources: Resources) -> CoreResult<Plan>;

    /// Remove resource limits by type. Unknown types are ignored.
    async fn unset_resource_limit(&self, plan_id: &str, types: &[String]) -> CoreResult<Plan>;

    /// List plan ids matching every given criterion. `in_tags`/`out_tags`
    /// match plans having at least one input/output whose tag set contains
    /// all of them.
    async fn find(
        &self,
        active: Option<bool>,
        image: Option<&ImageIdentifier>,
        in_tags: &TagSet,
        out_tags: &TagSet,
    ) -> CoreResult<Vec<String>>;
}

/// Run lifecycle: creation, guarded status changes, lineage-protected
/// deletion and retry.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run of the named pseudo plan, already `running`, with a
    /// fresh output knit data bound to each of its outputs. The run is
    /// suspended from lifecycle pickup for `lifecycle_suspend`.
    async fn new_pseudo(
        &self,
        plan_name: PseudoPlanName,
        lifecycle_suspend: Duration,
    ) -> CoreResult<Run>;

    /// Materialize the next projected run, if any: `waiting` when its plan
    /// is active, `deactivated` otherwise. Reports the `(plan, input slot,
    /// knit id)` binding that triggered the projection, so a driving loop
    /// can account for what it just acted on. `Ok(None)` means the
    /// projection queue is empty.
    async fn new_projected(&self) -> CoreResult<Option<(Run, ProjectionTrigger)>>;

    /// Move a run along the lifecycle graph. Same-status is a no-op that
    /// only refreshes `updated_at`; an edge outside the graph fails with
    /// [`CoreError::InvalidRunStateChanging`]. Arriving at `done` or
    /// `failed` carries the same output-stamping side effects as
    /// [`RunStore::finish`].
    async fn set_status(&self, run_id: &str, status: RunStatus) -> CoreResult<()>;

    /// Record (or overwrite) the exit report of a run.
    async fn set_exit(&self, run_id: &str, exit: RunExit) -> CoreResult<()>;

    /// Exclusively pick the first run the cursor designates, hand it to
    /// `task`, and commit the status it returns.
    ///
    /// The returned cursor always points at the picked run (or is the
    /// input cursor when nothing was eligible) so the caller can resume
    /// after it. `Ok(true)` only when a status change was committed;
    /// `Ok(false)` when nothing was eligible or the task kept the status
    /// (the run is then suspended for the cursor's debounce interval);
    /// `Err` carries the task's or the commit's failure, with the run
    /// left untouched.
    async fn pick_and_set_status(
        &self,
        cursor: RunCursor,
        task: &(dyn for<'a> Fn(&'a Run) -> Result<RunStatus, CoreError> + Send + Sync),
    ) -> (RunCursor, CoreResult<bool>);

    /// Settle a run that reached `completing` or `aborting`: advance it to
    /// `done`/`failed` and stamp the system timestamp tag on its outputs.
    async fn finish(&self, run_id: &str) -> CoreResult<()>;

    /// List run ids matching every given criterion, ordered by update time.
    async fn find(&self, query: &RunFindQuery) -> CoreResult<Vec<String>>;

    /// Fetch runs by id. Unknown ids are silently absent from the result.
    async fn get(&self, run_ids: &[String]) -> CoreResult<HashMap<String, Run>>;

    /// Delete a run, refusing while it has live downstreams or an active
    /// worker. Root runs vanish; dependent runs leave an `invalidated`
    /// tombstone holding the lineage together.
    async fn delete(&self, run_id: &str) -> CoreResult<()>;

    /// Detach the worker record from a run, if any.
    async fn delete_worker(&self, run_id: &str) -> CoreResult<()>;

    /// Send a terminated run (`done` or `failed`) back to `waiting` with
    /// fresh output data. Refused for pseudo runs and while downstreams or
    /// a worker exist.
    async fn retry(&self, run_id: &str) -> CoreResult<()>;
}

/// Knit data lookup and user-tag editing.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch data by knit id, with upstream/downstream lineage attached.
    /// Unknown ids are silently absent from the result.
    async fn get(&self, knit_ids: &[String]) -> CoreResult<HashMap<String, KnitData>>;

    /// List knit ids whose tag set contains all of `tags`, optionally
    /// bounded by their system timestamp.
    async fn find(
        &self,
        tags: &TagSet,
        since: Option<OffsetDateTime>,
        until: Option<OffsetDateTime>,
    ) -> CoreResult<Vec<String>>;

    /// Apply a user-tag delta: removals first, then additions. Any system
    /// tag in the delta is refused.
    async fn update_tag(&self, knit_id: &str, delta: &TagDelta) -> CoreResult<()>;
}

/// A piece of storage whose owning record is gone and whose backing volume
/// still needs reclaiming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Garbage {
    pub knit_id: String,
    pub volume_ref: String,
}

/// Queue of volumes pending reclamation.
#[async_trait]
pub trait GarbageStore: Send + Sync {
    /// Pop one garbage item and hand it to `handler`. The item is removed
    /// only when the handler succeeds; on failure it stays queued for a
    /// later attempt. `Ok(false)` means the queue was empty.
    async fn pop(
        &self,
        handler: &(dyn for<'a> Fn(&'a Garbage) -> CoreResult<()> + Send + Sync),
    ) -> CoreResult<bool>;
}

/// Held lock on a named key. The key unlocks on drop.
pub struct KeyLease {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl KeyLease {
    pub(crate) fn new(guard: tokio::sync::OwnedMutexGuard<()>) -> Self {
        Self { _guard: guard }
    }
}

impl std::fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyLease")
    }
}

/// Named mutual exclusion across cooperating loops.
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Block until the named key is free, then hold it until the returned
    /// lease drops.
    async fn lock(&self, name: &str) -> KeyLease;
}
