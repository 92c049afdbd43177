use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

// Kubernetes label syntax:
// https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/#syntax-and-character-set
static LABEL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-zA-Z0-9]([-a-zA-Z0-9]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([-a-zA-Z0-9]{0,61}[a-zA-Z0-9])?)*/)?[a-zA-Z0-9]([-a-zA-Z0-9]{0,61}[a-zA-Z0-9])?$",
    )
    .expect("label key pattern is well-formed")
});
static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([-._a-zA-Z0-9]{0,61}[a-zA-Z0-9])?$")
        .expect("label value pattern is well-formed")
});

const MAX_KEY_PREFIX_LEN: usize = 253;

/// How strongly a plan is steered toward nodes bearing a label.
///
/// Escalating contract: `may` only tolerates the node's restricting taint,
/// `prefer` adds a soft affinity toward `key=value`, `must` makes that
/// affinity hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnNodeMode {
    May,
    Prefer,
    Must,
}

impl OnNodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnNodeMode::May => "may",
            OnNodeMode::Prefer => "prefer",
            OnNodeMode::Must => "must",
        }
    }
}

impl fmt::Display for OnNodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnNodeMode {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "may" => Ok(OnNodeMode::May),
            "prefer" => Ok(OnNodeMode::Prefer),
            "must" => Ok(OnNodeMode::Must),
            other => Err(PlanError::UnknownOnNodeMode(other.to_string())),
        }
    }
}

/// A node-placement hint: `(mode, key, value)` over a node label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnNode {
    pub mode: OnNodeMode,
    pub key: String,
    pub value: String,
}

impl OnNode {
    pub fn new<K, V>(mode: OnNodeMode, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            mode,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check key/value against the constrained label syntax.
    pub(crate) fn validate(&self) -> Result<(), PlanError> {
        if self.key.is_empty() {
            return Err(PlanError::InvalidOnNodeKey("key is empty".to_string()));
        }
        if !LABEL_KEY.is_match(&self.key) {
            return Err(PlanError::InvalidOnNodeKey(format!(
                "bad pattern: {}",
                self.key
            )));
        }
        if let Some((prefix, _)) = self.key.split_once('/') {
            if prefix.len() > MAX_KEY_PREFIX_LEN {
                return Err(PlanError::InvalidOnNodeKey(format!(
                    "too long (> {MAX_KEY_PREFIX_LEN} chars) prefix: {}",
                    self.key
                )));
            }
        }

        if self.value.is_empty() {
            return Err(PlanError::InvalidOnNodeValue("value is empty".to_string()));
        }
        if !LABEL_VALUE.is_match(&self.value) {
            return Err(PlanError::InvalidOnNodeValue(format!(
                "bad pattern: {}",
                self.value
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.key, self.value, self.mode)
    }
}
