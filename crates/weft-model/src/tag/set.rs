use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::tag::Tag;

/// A normalized collection of [`Tag`]s with set semantics.
///
/// Construction sorts by `(key, value)` and drops duplicates. Because tag
/// values are canonical (see [`Tag`]), two `knit#timestamp` tags naming the
/// same instant in different offsets collapse to one entry, while an
/// unparseable timestamp value dedups only by exact string match.
///
/// A `TagSet` is immutable once built; equality compares normalized forms.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    /// Normalize `tags` into a set.
    pub fn new(mut tags: Vec<Tag>) -> Self {
        tags.sort();
        tags.dedup();
        Self(tags)
    }

    /// Number of distinct tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no tags are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized tags, sorted by `(key, value)`.
    pub fn as_slice(&self) -> &[Tag] {
        &self.0
    }

    /// Iterate through all tags in normalized order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// System tags only, preserving sort order.
    pub fn system_tags(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter().filter(|t| t.is_system())
    }

    /// User tags only, preserving sort order.
    pub fn user_tags(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter().filter(|t| t.is_user())
    }

    /// `true` when `tag` is a member of this set.
    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.binary_search(tag).is_ok()
    }

    /// `true` when every tag of `other` is a member of this set.
    pub fn contains_all(&self, other: &TagSet) -> bool {
        other.iter().all(|t| self.contains(t))
    }
}

impl From<Vec<Tag>> for TagSet {
    fn from(tags: Vec<Tag>) -> Self {
        Self::new(tags)
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// Deserialization re-normalizes: wire payloads are not trusted to be sorted.
impl<'de> Deserialize<'de> for TagSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tags = Vec::<Tag>::deserialize(deserializer)?;
        Ok(Self::new(tags))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagSet[")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{tag}")?;
        }
        write!(f, "]")
    }
}

/// Tags to add to and remove from a Data item.
///
/// Only user tags may appear here; system tags are managed by the store.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<Tag>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<Tag>,
}
