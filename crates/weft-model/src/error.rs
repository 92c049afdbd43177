use thiserror::Error;

/// Rejection reasons for a single tag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("bad format knit#timestamp: {0}")]
    BadTimestamp(String),

    #[error("knit#transient should be one of \"processing\" or \"failed\": {0}")]
    BadTransient(String),

    #[error("unknown system tag: {0}")]
    UnknownSystemTag(String),

    #[error("not a KEY:VALUE expression: {0}")]
    BadExpression(String),

    #[error("the tag is not acceptable: {0}")]
    Unacceptable(String),
}

/// Validation failures of a plan parameter bundle.
///
/// Every variant is deterministic and caller-input-only: the same bundle
/// always fails the same way, so none of these are worth retrying.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid plan: on_node: invalid key: {0}")]
    InvalidOnNodeKey(String),

    #[error("invalid plan: on_node: invalid value: {0}")]
    InvalidOnNodeValue(String),

    #[error("unknown on_node mode: {0}")]
    UnknownOnNodeMode(String),

    #[error("invalid plan: nameless or versionless image: {0}")]
    NamelessImage(String),

    #[error("invalid plan: unreachable plan: no inputs")]
    UnreachablePlan,

    #[error("invalid plan: bad mountpoint path (path = {path}): {reason}")]
    BadMountPointPath { path: String, reason: String },

    #[error("invalid plan: mountpoints are overlapped: {0}, {1}")]
    OverlappedMountPoints(String, String),

    #[error("invalid plan: bad tag (path = {path}): {reason}")]
    BadMountPointTag { path: String, reason: String },
}
