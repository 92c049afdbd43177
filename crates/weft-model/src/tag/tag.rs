use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::timestamp;
use crate::error::TagError;

/// Keys starting with this prefix are reserved for the system.
pub const SYSTEM_TAG_PREFIX: &str = "knit#";

/// Identifies the Data item itself.
pub const KEY_KNIT_ID: &str = "knit#id";

/// RFC 3339 instant at which the Data item was produced.
pub const KEY_KNIT_TIMESTAMP: &str = "knit#timestamp";

/// Marks Data that is not (yet) consumable.
pub const KEY_KNIT_TRANSIENT: &str = "knit#transient";

/// `knit#transient` value while the producing run is still in flight.
pub const VALUE_TRANSIENT_PROCESSING: &str = "processing";

/// `knit#transient` value once the producing run has failed.
pub const VALUE_TRANSIENT_FAILED: &str = "failed";

/// Key–value metadata attached to Data and mount points.
///
/// System tags (`knit#...`) are semantically validated at construction.
/// A parseable `knit#timestamp` value is canonicalized (UTC offset,
/// microsecond resolution) so that tags naming the same instant compare
/// equal byte-for-byte. Ordering is lexicographic on `(key, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Create a tag, validating reserved-prefix semantics.
    ///
    /// Fails when `key` names an unrecognized system tag, when a
    /// `knit#timestamp` value is not RFC 3339, or when a `knit#transient`
    /// value is neither `processing` nor `failed`.
    pub fn new<K, V>(key: K, value: V) -> Result<Self, TagError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let mut value = value.into();

        if key.starts_with(SYSTEM_TAG_PREFIX) {
            match key.as_str() {
                KEY_KNIT_ID => {}
                KEY_KNIT_TIMESTAMP => match timestamp::canonicalize(&value) {
                    Some(canonical) => value = canonical,
                    None => return Err(TagError::BadTimestamp(value)),
                },
                KEY_KNIT_TRANSIENT => match value.as_str() {
                    VALUE_TRANSIENT_PROCESSING | VALUE_TRANSIENT_FAILED => {}
                    _ => return Err(TagError::BadTransient(value)),
                },
                _ => return Err(TagError::UnknownSystemTag(key)),
            }
        }

        Ok(Self { key, value })
    }

    /// Rehydrate a tag without validation, e.g. from a storage record.
    ///
    /// A parseable `knit#timestamp` value is still canonicalized; an
    /// unparseable one is kept verbatim and compares by exact string only.
    pub fn from_parts<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let mut value = value.into();
        if key == KEY_KNIT_TIMESTAMP {
            if let Some(canonical) = timestamp::canonicalize(&value) {
                value = canonical;
            }
        }
        Self { key, value }
    }

    /// Parse the wire form `"KEY:VALUE"`.
    ///
    /// The first `:` separates key from value; values may contain `:`.
    pub fn parse(expression: &str) -> Result<Self, TagError> {
        let (key, value) = expression
            .split_once(':')
            .ok_or_else(|| TagError::BadExpression(expression.to_string()))?;
        Self::new(key, value)
    }

    /// Build a `knit#timestamp` tag for the given instant.
    pub fn timestamp(at: OffsetDateTime) -> Result<Self, TagError> {
        let value =
            timestamp::canonical(at).map_err(|e| TagError::BadTimestamp(e.to_string()))?;
        Ok(Self {
            key: KEY_KNIT_TIMESTAMP.to_string(),
            value,
        })
    }

    /// Get the key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// `true` when the key carries the reserved `knit#` prefix.
    pub fn is_system(&self) -> bool {
        self.key.starts_with(SYSTEM_TAG_PREFIX)
    }

    /// `true` for every non-reserved tag.
    pub fn is_user(&self) -> bool {
        !self.is_system()
    }

    /// The instant a `knit#timestamp` tag denotes, if it parses.
    pub fn instant(&self) -> Option<OffsetDateTime> {
        if self.key != KEY_KNIT_TIMESTAMP {
            return None;
        }
        timestamp::parse(&self.value).ok()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}
