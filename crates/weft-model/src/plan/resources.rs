use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-resource-type quantity map, e.g. `{"cpu": "500m", "memory": "1Gi"}`.
///
/// Quantities are opaque scalars compared by per-key equality.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(pub BTreeMap<String, String>);

impl Resources {
    /// Create an empty resource map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns `true` if no quantities are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert or overwrite a quantity.
    ///
    /// Returns `self` for chaining.
    pub fn insert<K, V>(&mut self, resource: K, quantity: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(resource.into(), quantity.into());
        self
    }

    /// Remove a quantity, returning it if it was set.
    pub fn remove(&mut self, resource: &str) -> Option<String> {
        self.0.remove(resource)
    }

    /// Get the quantity for a resource type, if present.
    pub fn get(&self, resource: &str) -> Option<&str> {
        self.0.get(resource).map(|s| s.as_str())
    }

    /// Iterate through all quantities as `(&str, &str)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
