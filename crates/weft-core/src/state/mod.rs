//! In-memory implementation of the persistence ports.
//!
//! One [`MemoryStore`] holds plans, runs, Data and the garbage queue behind
//! a single async mutex, so every port operation observes and commits a
//! consistent snapshot. Protection checks run before any mutation; an
//! operation either applies completely or leaves the store untouched.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use weft_model::{
    Assignment, Dependency, ImageIdentifier, KEY_KNIT_ID, KEY_KNIT_TRANSIENT, KnitData,
    KnitDataBody, LogPoint, MountPoint, Plan, PlanBody, PlanSpec, ProjectionTrigger,
    PseudoPlanName, Resources, Run, RunBody, RunCursor, RunExit, RunFindQuery, RunLog, RunStatus,
    Tag, TagDelta, TagError, TagSet, VALUE_TRANSIENT_FAILED, VALUE_TRANSIENT_PROCESSING,
    statuses_for_plan_activation,
};

use crate::error::{CoreError, CoreResult, ProtectionError};
use crate::port::{
    DataStore, Garbage, GarbageStore, KeyLease, Keychain, PlanStore, RunStore,
};


/// A run as stored: its body plus slot-to-Data bindings.
///
/// Mount points themselves live on the plan; the record only keeps
/// `(mount point id, knit id)` pairs.
#[derive(Debug, Clone)]
struct RunRecord {
    body: RunBody,
    inputs: Vec<(u64, String)>,
    outputs: Vec<(u64, String)>,
    log: Option<(u64, String)>,

    /// The run is invisible to `pick_and_set_status` before this instant.
    suspend_until: OffsetDateTime,
}

/// A Data item as stored. Only user tags are kept; system tags are derived
/// on read from the record and its producing run.
#[derive(Debug, Clone)]
struct DataRecord {
    knit_id: String,
    volume_ref: String,
    user_tags: TagSet,

    /// `knit#timestamp` tag, stamped when the producing run finishes.
    timestamp: Option<Tag>,

    /// Run id of the producer.
    produced_by: String,

    /// Output (or log) slot id the producer wrote this Data at.
    mount_point_id: u64,
}

/// A queued run-to-be: the triggering binding plus the Data bound to each
/// of the plan's inputs (the trigger's own binding included).
#[derive(Debug, Clone)]
struct Projection {
    trigger: ProjectionTrigger,
    bindings: Vec<(u64, String)>,
}

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    runs: HashMap<String, RunRecord>,
    data: HashMap<String, DataRecord>,
    projections: VecDeque<Projection>,
    garbage: VecDeque<Garbage>,
    mount_seq: u64,
}

impl Inner {
    fn next_mount_id(&mut self) -> u64 {
        self.mount_seq += 1;
        self.mount_seq
    }

    fn run(&self, run_id: &str) -> CoreResult<&RunRecord> {
        self.runs
            .get(run_id)
            .ok_or_else(|| CoreError::Missing(format!("run {run_id}")))
    }

    /// Run ids consuming any Data this run produced.
    fn downstreams_of(&self, run_id: &str) -> Vec<String> {
        let Some(rec) = self.runs.get(run_id) else {
            return Vec::new();
        };
        let produced: Vec<&str> = rec
            .outputs
            .iter()
            .chain(&rec.log)
            .map(|(_, knit_id)| knit_id.as_str())
            .collect();

        let mut found: Vec<String> = self
            .runs
            .values()
            .filter(|other| {
                other
                    .inputs
                    .iter()
                    .any(|(_, knit_id)| produced.contains(&knit_id.as_str()))
            })
            .map(|other| other.body.run_id.clone())
            .collect();
        found.sort();
        found
    }

    /// Derive the full tag set of a Data record: user tags, `knit#id`,
    /// `knit#timestamp` once stamped, and the transient marker reflecting
    /// the producing run's current status.
    fn derived_tags(&self, rec: &DataRecord) -> TagSet {
        let mut tags: Vec<Tag> = rec.user_tags.iter().cloned().collect();
        tags.push(Tag::from_parts(KEY_KNIT_ID, &rec.knit_id));
        if let Some(ts) = &rec.timestamp {
            tags.push(ts.clone());
        }
        if let Some(producer) = self.runs.get(&rec.produced_by) {
            match producer.body.status {
                RunStatus::Done => {}
                status if status.is_failed() => {
                    tags.push(Tag::from_parts(KEY_KNIT_TRANSIENT, VALUE_TRANSIENT_FAILED));
                }
                _ => {
                    tags.push(Tag::from_parts(
                        KEY_KNIT_TRANSIENT,
                        VALUE_TRANSIENT_PROCESSING,
                    ));
                }
            }
        }
        TagSet::new(tags)
    }

    fn data_body(&self, knit_id: &str) -> Option<KnitDataBody> {
        let rec = self.data.get(knit_id)?;
        Some(KnitDataBody {
            knit_id: rec.knit_id.clone(),
            volume_ref: rec.volume_ref.clone(),
            tags: self.derived_tags(rec),
        })
    }

    /// The mount (or log) point a run writes/reads at `mount_point_id`.
    fn point_of(&self, plan_id: &str, mount_point_id: u64) -> Option<MountPoint> {
        let plan = self.plans.get(plan_id)?;
        if let Some(mp) = plan
            .inputs
            .iter()
            .chain(&plan.outputs)
            .find(|mp| mp.id == mount_point_id)
        {
            return Some(mp.clone());
        }
        match &plan.log {
            Some(log) if log.id == mount_point_id => Some(MountPoint {
                id: log.id,
                path: "/log".to_string(),
                tags: log.tags.clone(),
            }),
            _ => None,
        }
    }

    fn assemble_run(&self, rec: &RunRecord) -> Run {
        let plan_id = &rec.body.plan.plan_id;
        let assignment = |(mp_id, knit_id): &(u64, String)| -> Option<Assignment> {
            Some(Assignment {
                mount_point: self.point_of(plan_id, *mp_id)?,
                data: self.data_body(knit_id),
            })
        };
        let log = rec.log.as_ref().and_then(|(id, knit_id)| {
            let plan = self.plans.get(plan_id)?;
            let point = plan.log.as_ref()?;
            Some(RunLog {
                id: *id,
                tags: point.tags.clone(),
                data: self.data_body(knit_id),
            })
        });
        Run {
            body: rec.body.clone(),
            inputs: rec.inputs.iter().filter_map(assignment).collect(),
            outputs: rec.outputs.iter().filter_map(assignment).collect(),
            log,
        }
    }

    fn assemble_data(&self, knit_id: &str) -> Option<KnitData> {
        let body = self.data_body(knit_id)?;
        let rec = self.data.get(knit_id)?;

        let upstream = self.runs.get(&rec.produced_by).and_then(|producer| {
            Some(Dependency {
                mount_point: self.point_of(&producer.body.plan.plan_id, rec.mount_point_id)?,
                run: producer.body.clone(),
            })
        });

        let mut downstreams: Vec<Dependency> = self
            .runs
            .values()
            .filter_map(|consumer| {
                let (mp_id, _) = consumer
                    .inputs
                    .iter()
                    .find(|(_, bound)| bound == knit_id)?;
                Some(Dependency {
                    mount_point: self.point_of(&consumer.body.plan.plan_id, *mp_id)?,
                    run: consumer.body.clone(),
                })
            })
            .collect();
        downstreams.sort_by(|a, b| a.run.run_id.cmp(&b.run.run_id));

        Some(KnitData {
            body,
            upstream,
            downstreams,
            nominated_by: Vec::new(),
        })
    }

    /// Create a fresh, unfulfilled-timestamp Data record for a run's slot.
    fn mint_data(&mut self, run_id: &str, mount_point_id: u64, user_tags: TagSet) -> String {
        let knit_id = Uuid::new_v4().to_string();
        let rec = DataRecord {
            knit_id: knit_id.clone(),
            volume_ref: format!("data-{knit_id}"),
            user_tags,
            timestamp: None,
            produced_by: run_id.to_string(),
            mount_point_id,
        };
        self.data.insert(knit_id.clone(), rec);
        knit_id
    }

    /// Move a run onto `next` (`done` or `failed`) and stamp the system
    /// timestamp tag on every not-yet-stamped output.
    fn finish_into(&mut self, run_id: &str, next: RunStatus) -> CoreResult<()> {
        let now = OffsetDateTime::now_utc();
        let stamp = Tag::timestamp(now).map_err(CoreError::Tag)?;

        let produced: Vec<String> = {
            let rec = self.run(run_id)?;
            rec.outputs
                .iter()
                .chain(&rec.log)
                .map(|(_, knit_id)| knit_id.clone())
                .collect()
        };
        for knit_id in &produced {
            if let Some(data) = self.data.get_mut(knit_id) {
                data.timestamp.get_or_insert_with(|| stamp.clone());
            }
        }
        if let Some(rec) = self.runs.get_mut(run_id) {
            rec.body.status = next;
            rec.body.updated_at = now;
        }
        debug!(run = %run_id, status = %next, "run finished");
        Ok(())
    }

    /// Remove Data records and queue their volumes for reclamation.
    fn discard_data(&mut self, knit_ids: &[String]) {
        for knit_id in knit_ids {
            if let Some(rec) = self.data.remove(knit_id) {
                self.garbage.push_back(Garbage {
                    knit_id: rec.knit_id,
                    volume_ref: rec.volume_ref,
                });
            }
        }
        self.projections.retain(|projection| {
            projection
                .bindings
                .iter()
                .all(|(_, bound)| !knit_ids.contains(bound))
        });
    }
}

/// In-memory store implementing every persistence port.
///
/// Intended for single-process deployments and tests; the port traits keep
/// callers oblivious to which backing they talk to.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    /// An empty store, pre-seeded with the system pseudo plans.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for name in [PseudoPlanName::Uploaded, PseudoPlanName::Imported] {
            let out_id = inner.next_mount_id();
            let plan = Plan {
                body: PlanBody {
                    plan_id: name.to_string(),
                    hash: name.to_string(),
                    active: true,
                    image: None,
                    pseudo: Some(name),
                    resources: Resources::new(),
                    on_node: Vec::new(),
                },
                inputs: Vec::new(),
                outputs: vec![MountPoint {
                    id: out_id,
                    path: "/out".to_string(),
                    tags: TagSet::default(),
                }],
                log: None,
            };
            inner.plans.insert(plan.body.plan_id.clone(), plan);
        }
        Self {
            inner: Mutex::new(inner),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a projected run. `trigger` names the binding that caused the
    /// projection; `more` binds the plan's remaining input slots. The run
    /// materializes on the next `new_projected` call, which reports the
    /// trigger back.
    pub async fn enqueue_projection(&self, trigger: ProjectionTrigger, more: Vec<(u64, String)>) {
        trace!(trigger = %trigger, "projection queued");
        let bindings = std::iter::once((trigger.input_id, trigger.knit_id.clone()))
            .chain(more)
            .collect();
        let mut inner = self.inner.lock().await;
        inner.projections.push_back(Projection { trigger, bindings });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get(&self, plan_ids: &[String]) -> CoreResult<HashMap<String, Plan>> {
        let inner = self.inner.lock().await;
        Ok(plan_ids
            .iter()
            .filter_map(|id| inner.plans.get(id).map(|plan| (id.clone(), plan.clone())))
            .collect())
    }

    async fn register(&self, spec: PlanSpec) -> CoreResult<Plan> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.plans.values().find(|plan| spec.equiv_plan(plan)) {
            return Err(CoreError::EquivPlanExists {
                plan_id: existing.body.plan_id.clone(),
            });
        }

        let plan_id = Uuid::new_v4().to_string();
        let inputs = spec
            .inputs()
            .iter()
            .map(|mp| MountPoint {
                id: inner.next_mount_id(),
                path: mp.path.clone(),
                tags: mp.tags.clone(),
            })
            .collect();
        let outputs = spec
            .outputs()
            .iter()
            .map(|mp| MountPoint {
                id: inner.next_mount_id(),
                path: mp.path.clone(),
                tags: mp.tags.clone(),
            })
            .collect();
        let log = spec.log().map(|log| LogPoint {
            id: inner.next_mount_id(),
            tags: log.tags.clone(),
        });
        let plan = Plan {
            body: PlanBody {
                plan_id: plan_id.clone(),
                hash: spec.hash().to_string(),
                active: spec.active(),
                image: Some(spec.image_identifier()),
                pseudo: None,
                resources: spec.resources().clone(),
                on_node: spec.on_node().to_vec(),
            },
            inputs,
            outputs,
            log,
        };
        inner.plans.insert(plan_id.clone(), plan.clone());
        debug!(plan = %plan_id, hash = %plan.body.hash, "plan registered");
        Ok(plan)
    }

    async fn activate(&self, plan_id: &str, active: bool) -> CoreResult<Plan> {
        let mut inner = self.inner.lock().await;
        {
            let plan = inner
                .plans
                .get_mut(plan_id)
                .ok_or_else(|| CoreError::Missing(format!("plan {plan_id}")))?;
            if plan.body.is_pseudo() {
                return Err(CoreError::Missing(format!("plan {plan_id}")));
            }
            plan.body.active = active;
        }

        let now = OffsetDateTime::now_utc();
        let (to, from) = statuses_for_plan_activation(active);
        for rec in inner.runs.values_mut() {
            if rec.body.plan.plan_id == plan_id && rec.body.status == from {
                rec.body.status = to;
                rec.body.updated_at = now;
            }
        }
        debug!(plan = %plan_id, active, "plan activity changed");
        Ok(inner.plans[plan_id].clone())
    }

    async fn set_resource_limit(&self, plan_id: &str, resources: Resources) -> CoreResult<Plan> {
        let mut inner = self.inner.lock().await;
        let plan = inner
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| CoreError::Missing(format!("plan {plan_id}")))?;
        for (resource, quantity) in resources.iter() {
            plan.body.resources.insert(resource, quantity);
        }
        Ok(plan.clone())
    }

    async fn unset_resource_limit(&self, plan_id: &str, types: &[String]) -> CoreResult<Plan> {
        let mut inner = self.inner.lock().await;
        let plan = inner
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| CoreError::Missing(format!("plan {plan_id}")))?;
        for resource in types {
            plan.body.resources.remove(resource);
        }
        Ok(plan.clone())
    }

    async fn find(
        &self,
        active: Option<bool>,
        image: Option<&ImageIdentifier>,
        in_tags: &TagSet,
        out_tags: &TagSet,
    ) -> CoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut found: Vec<String> = inner
            .plans
            .values()
            .filter(|plan| active.is_none_or(|want| plan.body.active == want))
            .filter(|plan| {
                image.is_none_or(|want| match &plan.body.image {
                    Some(have) => {
                        have.image == want.image
                            && (want.version.is_empty() || have.version == want.version)
                    }
                    None => false,
                })
            })
            .filter(|plan| {
                in_tags.is_empty()
                    || plan.inputs.iter().any(|mp| mp.tags.contains_all(in_tags))
            })
            .filter(|plan| {
                out_tags.is_empty()
                    || plan.outputs.iter().any(|mp| mp.tags.contains_all(out_tags))
            })
            .map(|plan| plan.body.plan_id.clone())
            .collect();
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn new_pseudo(
        &self,
        plan_name: PseudoPlanName,
        lifecycle_suspend: Duration,
    ) -> CoreResult<Run> {
        let mut inner = self.inner.lock().await;
        let plan = inner
            .plans
            .values()
            .find(|plan| plan.body.pseudo == Some(plan_name))
            .cloned()
            .ok_or_else(|| CoreError::Missing(format!("pseudo plan {plan_name}")))?;

        let run_id = Uuid::new_v4().to_string();
        let outputs: Vec<(u64, String)> = plan
            .outputs
            .iter()
            .map(|mp| (mp.id, inner.mint_data(&run_id, mp.id, mp.tags.clone())))
            .collect();

        let now = OffsetDateTime::now_utc();
        let rec = RunRecord {
            body: RunBody {
                run_id: run_id.clone(),
                status: RunStatus::Running,
                worker_name: None,
                updated_at: now,
                exit: None,
                plan: plan.body.clone(),
            },
            inputs: Vec::new(),
            outputs,
            log: None,
            suspend_until: now + lifecycle_suspend,
        };
        inner.runs.insert(run_id.clone(), rec);
        let run = inner.assemble_run(&inner.runs[&run_id]);
        debug!(run = %run_id, plan = %plan_name, "pseudo run created");
        Ok(run)
    }

    async fn new_projected(&self) -> CoreResult<Option<(Run, ProjectionTrigger)>> {
        let mut inner = self.inner.lock().await;
        loop {
            let Some(projection) = inner.projections.pop_front() else {
                return Ok(None);
            };
            let Some(plan) = inner.plans.get(&projection.trigger.plan_id).cloned() else {
                continue;
            };
            if projection
                .bindings
                .iter()
                .any(|(_, knit_id)| !inner.data.contains_key(knit_id))
            {
                // A bound input vanished; the projection is void.
                continue;
            }
            let Projection { trigger, bindings } = projection;

            let run_id = Uuid::new_v4().to_string();
            let outputs: Vec<(u64, String)> = plan
                .outputs
                .iter()
                .map(|mp| (mp.id, inner.mint_data(&run_id, mp.id, mp.tags.clone())))
                .collect();
            let log = plan
                .log
                .as_ref()
                .map(|point| (point.id, inner.mint_data(&run_id, point.id, point.tags.clone())));

            let now = OffsetDateTime::now_utc();
            let status = if plan.body.active {
                RunStatus::Waiting
            } else {
                RunStatus::Deactivated
            };
            let rec = RunRecord {
                body: RunBody {
                    run_id: run_id.clone(),
                    status,
                    worker_name: None,
                    updated_at: now,
                    exit: None,
                    plan: plan.body.clone(),
                },
                inputs: bindings,
                outputs,
                log,
                suspend_until: now,
            };
            inner.runs.insert(run_id.clone(), rec);
            let run = inner.assemble_run(&inner.runs[&run_id]);
            debug!(run = %run_id, plan = %plan.body.plan_id, status = %status, "run projected");
            return Ok(Some((run, trigger)));
        }
    }

    async fn set_status(&self, run_id: &str, status: RunStatus) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let current = inner.run(run_id)?.body.status;
        if !current.can_transition_to(status) {
            return Err(CoreError::InvalidRunStateChanging {
                from: current,
                to: status,
            });
        }
        if status == current {
            if let Some(rec) = inner.runs.get_mut(run_id) {
                rec.body.updated_at = OffsetDateTime::now_utc();
            }
            return Ok(());
        }
        if matches!(status, RunStatus::Done | RunStatus::Failed) {
            return inner.finish_into(run_id, status);
        }
        if let Some(rec) = inner.runs.get_mut(run_id) {
            rec.body.status = status;
            rec.body.updated_at = OffsetDateTime::now_utc();
        }
        debug!(run = %run_id, from = %current, to = %status, "run status changed");
        Ok(())
    }

    async fn set_exit(&self, run_id: &str, exit: RunExit) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.run(run_id)?;
        if let Some(rec) = inner.runs.get_mut(run_id) {
            rec.body.exit = Some(exit);
            rec.body.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn pick_and_set_status(
        &self,
        cursor: RunCursor,
        task: &(dyn for<'a> Fn(&'a Run) -> Result<RunStatus, CoreError> + Send + Sync),
    ) -> (RunCursor, CoreResult<bool>) {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        let mut eligible: Vec<String> = inner
            .runs
            .values()
            .filter(|rec| cursor.status.contains(&rec.body.status))
            .filter(|rec| rec.suspend_until <= now)
            .filter(|rec| match rec.body.plan.pseudo {
                Some(name) => cursor.pseudo.is_empty() || cursor.pseudo.contains(&name),
                None => !cursor.pseudo_only,
            })
            .map(|rec| rec.body.run_id.clone())
            .collect();
        eligible.sort();

        // Round-robin: ids after the head first, then wrap around.
        let picked = eligible
            .iter()
            .find(|id| id.as_str() > cursor.head.as_str())
            .or_else(|| eligible.first())
            .cloned();
        let Some(run_id) = picked else {
            return (cursor, Ok(false));
        };

        let next_cursor = RunCursor {
            head: run_id.clone(),
            ..cursor.clone()
        };
        let run = match inner.runs.get(&run_id) {
            Some(rec) => inner.assemble_run(rec),
            None => return (cursor, Ok(false)),
        };
        let current = run.body.status;

        let next = match task(&run) {
            Ok(next) => next,
            Err(err) => return (next_cursor, Err(err)),
        };

        if next == current {
            // No progress; debounce the run so the next sweep skips it.
            if let Some(rec) = inner.runs.get_mut(&run_id) {
                rec.suspend_until = now + cursor.debounce;
            }
            trace!(run = %run_id, status = %current, "run unchanged, debounced");
            return (next_cursor, Ok(false));
        }
        if !current.can_transition_to(next) {
            return (
                next_cursor,
                Err(CoreError::InvalidRunStateChanging {
                    from: current,
                    to: next,
                }),
            );
        }
        let committed = if matches!(next, RunStatus::Done | RunStatus::Failed) {
            inner.finish_into(&run_id, next)
        } else {
            if let Some(rec) = inner.runs.get_mut(&run_id) {
                rec.body.status = next;
                rec.body.updated_at = now;
            }
            debug!(run = %run_id, from = %current, to = %next, "run picked and advanced");
            Ok(())
        };
        (next_cursor, committed.map(|()| true))
    }

    async fn finish(&self, run_id: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let current = inner.run(run_id)?.body.status;
        let next = match current {
            RunStatus::Completing => RunStatus::Done,
            RunStatus::Aborting => RunStatus::Failed,
            other => {
                return Err(CoreError::InvalidRunStateChanging {
                    from: other,
                    to: RunStatus::Done,
                });
            }
        };
        inner.finish_into(run_id, next)
    }

    async fn find(&self, query: &RunFindQuery) -> CoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut found: Vec<(OffsetDateTime, String)> = inner
            .runs
            .values()
            .filter(|rec| {
                query.plan_id.is_empty() || query.plan_id.contains(&rec.body.plan.plan_id)
            })
            .filter(|rec| {
                query.input_knit_id.is_empty()
                    || rec
                        .inputs
                        .iter()
                        .any(|(_, knit_id)| query.input_knit_id.contains(knit_id))
            })
            .filter(|rec| {
                query.output_knit_id.is_empty()
                    || rec
                        .outputs
                        .iter()
                        .chain(&rec.log)
                        .any(|(_, knit_id)| query.output_knit_id.contains(knit_id))
            })
            .filter(|rec| query.status.is_empty() || query.status.contains(&rec.body.status))
            .filter(|rec| query.updated_since.is_none_or(|at| rec.body.updated_at >= at))
            .filter(|rec| query.updated_until.is_none_or(|at| rec.body.updated_at < at))
            .map(|rec| (rec.body.updated_at, rec.body.run_id.clone()))
            .collect();
        found.sort();
        Ok(found.into_iter().map(|(_, run_id)| run_id).collect())
    }

    async fn get(&self, run_ids: &[String]) -> CoreResult<HashMap<String, Run>> {
        let inner = self.inner.lock().await;
        Ok(run_ids
            .iter()
            .filter_map(|id| {
                inner
                    .runs
                    .get(id)
                    .map(|rec| (id.clone(), inner.assemble_run(rec)))
            })
            .collect())
    }

    async fn delete(&self, run_id: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let rec = inner.run(run_id)?;
        let status = rec.body.status;
        if status.is_invalidated() {
            return Err(CoreError::Missing(format!("run {run_id}")));
        }
        if !matches!(
            status,
            RunStatus::Waiting | RunStatus::Deactivated | RunStatus::Done | RunStatus::Failed
        ) || rec.body.worker_name.is_some()
        {
            return Err(ProtectionError::WorkerActive {
                run_id: run_id.to_string(),
                status,
            }
            .into());
        }
        let is_root = rec.inputs.is_empty();

        let downstreams = inner.downstreams_of(run_id);
        for downstream_id in &downstreams {
            if let Some(downstream) = inner.runs.get(downstream_id) {
                if !downstream.body.status.is_invalidated() {
                    return Err(ProtectionError::HasDownstreams {
                        run_id: run_id.to_string(),
                    }
                    .into());
                }
            }
        }

        // Only invalidated tombstones remain downstream; they go with us.
        for downstream_id in &downstreams {
            inner.runs.remove(downstream_id);
        }

        let produced: Vec<String> = {
            let rec = inner.run(run_id)?;
            rec.outputs
                .iter()
                .chain(&rec.log)
                .map(|(_, knit_id)| knit_id.clone())
                .collect()
        };
        inner.discard_data(&produced);

        if is_root {
            inner.runs.remove(run_id);
            debug!(run = %run_id, "root run deleted");
        } else if let Some(rec) = inner.runs.get_mut(run_id) {
            rec.body.status = RunStatus::Invalidated;
            rec.body.worker_name = None;
            rec.body.exit = None;
            rec.body.updated_at = OffsetDateTime::now_utc();
            rec.outputs.clear();
            rec.log = None;
            debug!(run = %run_id, "run invalidated");
        }
        Ok(())
    }

    async fn delete_worker(&self, run_id: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.run(run_id)?;
        if let Some(rec) = inner.runs.get_mut(run_id) {
            rec.body.worker_name = None;
        }
        Ok(())
    }

    async fn retry(&self, run_id: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        let rec = inner.run(run_id)?;
        if rec.body.plan.is_pseudo() {
            return Err(ProtectionError::RootRun {
                run_id: run_id.to_string(),
            }
            .into());
        }
        let status = rec.body.status;
        if !matches!(status, RunStatus::Done | RunStatus::Failed) {
            return Err(CoreError::InvalidRunStateChanging {
                from: status,
                to: RunStatus::Waiting,
            });
        }
        if rec.body.worker_name.is_some() {
            return Err(ProtectionError::WorkerActive {
                run_id: run_id.to_string(),
                status,
            }
            .into());
        }
        if !inner.downstreams_of(run_id).is_empty() {
            return Err(ProtectionError::HasDownstreams {
                run_id: run_id.to_string(),
            }
            .into());
        }

        let (plan_id, old_outputs, old_log, produced) = {
            let rec = inner.run(run_id)?;
            let produced: Vec<String> = rec
                .outputs
                .iter()
                .chain(&rec.log)
                .map(|(_, knit_id)| knit_id.clone())
                .collect();
            (
                rec.body.plan.plan_id.clone(),
                rec.outputs.clone(),
                rec.log.clone(),
                produced,
            )
        };
        inner.discard_data(&produced);

        let outputs: Vec<(u64, String)> = old_outputs
            .iter()
            .map(|(mp_id, _)| {
                let tags = inner
                    .point_of(&plan_id, *mp_id)
                    .map(|mp| mp.tags)
                    .unwrap_or_default();
                (*mp_id, inner.mint_data(run_id, *mp_id, tags))
            })
            .collect();
        let log = old_log.map(|(point_id, _)| {
            let tags = inner
                .point_of(&plan_id, point_id)
                .map(|mp| mp.tags)
                .unwrap_or_default();
            (point_id, inner.mint_data(run_id, point_id, tags))
        });

        let now = OffsetDateTime::now_utc();
        if let Some(rec) = inner.runs.get_mut(run_id) {
            rec.body.status = RunStatus::Waiting;
            rec.body.worker_name = None;
            rec.body.exit = None;
            rec.body.updated_at = now;
            rec.outputs = outputs;
            rec.log = log;
            rec.suspend_until = now;
        }
        debug!(run = %run_id, "run sent back to waiting");
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get(&self, knit_ids: &[String]) -> CoreResult<HashMap<String, KnitData>> {
        let inner = self.inner.lock().await;
        Ok(knit_ids
            .iter()
            .filter_map(|id| inner.assemble_data(id).map(|data| (id.clone(), data)))
            .collect())
    }

    async fn find(
        &self,
        tags: &TagSet,
        since: Option<OffsetDateTime>,
        until: Option<OffsetDateTime>,
    ) -> CoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut found: Vec<String> = inner
            .data
            .values()
            .filter(|rec| inner.derived_tags(rec).contains_all(tags))
            .filter(|rec| {
                since.is_none_or(|at| {
                    rec.timestamp
                        .as_ref()
                        .and_then(|tag| tag.instant())
                        .is_some_and(|stamped| stamped >= at)
                })
            })
            .filter(|rec| {
                until.is_none_or(|at| {
                    rec.timestamp
                        .as_ref()
                        .and_then(|tag| tag.instant())
                        .is_some_and(|stamped| stamped < at)
                })
            })
            .map(|rec| rec.knit_id.clone())
            .collect();
        found.sort();
        Ok(found)
    }

    async fn update_tag(&self, knit_id: &str, delta: &TagDelta) -> CoreResult<()> {
        for tag in delta.add.iter().chain(&delta.remove) {
            if tag.is_system() {
                return Err(CoreError::Tag(TagError::Unacceptable(format!(
                    "system tags cannot be edited: {tag}"
                ))));
            }
        }
        let mut inner = self.inner.lock().await;
        let rec = inner
            .data
            .get_mut(knit_id)
            .ok_or_else(|| CoreError::Missing(format!("data {knit_id}")))?;

        let mut tags: Vec<Tag> = rec
            .user_tags
            .iter()
            .filter(|tag| !delta.remove.contains(tag))
            .cloned()
            .collect();
        tags.extend(delta.add.iter().cloned());
        rec.user_tags = TagSet::new(tags);
        debug!(knit = %knit_id, "data tags updated");
        Ok(())
    }
}

#[async_trait]
impl GarbageStore for MemoryStore {
    async fn pop(
        &self,
        handler: &(dyn for<'a> Fn(&'a Garbage) -> CoreResult<()> + Send + Sync),
    ) -> CoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(garbage) = inner.garbage.pop_front() else {
            return Ok(false);
        };
        match handler(&garbage) {
            Ok(()) => {
                debug!(knit = %garbage.knit_id, volume = %garbage.volume_ref, "garbage reclaimed");
                Ok(true)
            }
            Err(err) => {
                // Leave it queued for another attempt.
                inner.garbage.push_front(garbage);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Keychain for MemoryStore {
    async fn lock(&self, name: &str) -> KeyLease {
        let key = {
            let mut keys = self.keys.lock().await;
            keys.entry(name.to_string()).or_default().clone()
        };
        KeyLease::new(key.lock_owned().await)
    }
}
