use thiserror::Error;

use weft_model::{PlanError, RunStatus, TagError};

/// Lineage-protection failures.
///
/// Each sub-kind names the precise obstacle so callers can give a remedy:
/// remove the downstream runs first, wait for the worker to stop, or accept
/// that a lineage root cannot be retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtectionError {
    #[error("run {run_id} is protected: depended on by downstream runs")]
    HasDownstreams { run_id: String },

    #[error("run {run_id} is protected: worker possibly running (status: {status})")]
    WorkerActive { run_id: String, status: RunStatus },

    #[error("run {run_id} is protected: it is the root of a lineage")]
    RootRun { run_id: String },
}

/// Failures surfaced by the persistence port.
///
/// All variants are terminal for the attempted operation; callers should
/// re-evaluate state rather than retry mechanically. `Missing` means the
/// referenced entity vanished between lookup and mutation and is to be
/// treated as not-found, not as a fatal condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    InvalidPlan(#[from] PlanError),

    #[error(transparent)]
    Tag(#[from] TagError),

    /// Registration collided with an existing plan of the same content.
    /// Callers should redirect to `plan_id` instead of retrying.
    #[error("there is an equivalent plan: {plan_id}")]
    EquivPlanExists { plan_id: String },

    #[error("cannot change run state: {from} -> {to}")]
    InvalidRunStateChanging { from: RunStatus, to: RunStatus },

    #[error(transparent)]
    Protected(#[from] ProtectionError),

    #[error("missing: {0}")]
    Missing(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
