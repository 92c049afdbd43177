use std::fmt;

use serde::{Deserialize, Serialize};

/// Container image reference, `image:version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIdentifier {
    pub image: String,
    pub version: String,
}

impl ImageIdentifier {
    /// Create a new image reference.
    pub fn new<I, V>(image: I, version: V) -> Self
    where
        I: Into<String>,
        V: Into<String>,
    {
        Self {
            image: image.into(),
            version: version.into(),
        }
    }

    /// `true` when both image and version are non-empty.
    pub fn fulfilled(&self) -> bool {
        !self.image.is_empty() && !self.version.is_empty()
    }
}

impl fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.version)
    }
}
