use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tag::TagSet;

/// Declared input/output slot of a plan, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPointParam {
    /// Mount path inside the container.
    pub path: String,

    /// Tags required (input) or stamped (output) at this slot.
    pub tags: TagSet,
}

impl MountPointParam {
    pub fn new<P>(path: P, tags: TagSet) -> Self
    where
        P: Into<String>,
    {
        Self {
            path: path.into(),
            tags,
        }
    }

    /// Content equivalence against a stored mount point, ignoring its id.
    pub fn equiv(&self, other: &MountPoint) -> bool {
        self.path == other.path && self.tags == other.tags
    }
}

/// A registered mount point of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    /// Storage-assigned id, non-semantic.
    pub id: u64,

    /// Location in the filesystem.
    pub path: String,

    /// Tags set on this mount point.
    pub tags: TagSet,
}

impl MountPoint {
    /// Content equivalence ignoring storage ids.
    pub fn equiv(&self, other: &MountPoint) -> bool {
        self.path == other.path && self.tags == other.tags
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MountPoint{{id:{} path:{} tags:{}}}", self.id, self.path, self.tags)
    }
}

/// Declared log slot of a plan, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParam {
    pub tags: TagSet,
}

impl LogParam {
    pub fn new(tags: TagSet) -> Self {
        Self { tags }
    }

    /// Content equivalence against a stored log point, ignoring its id.
    pub fn equiv(&self, other: &LogPoint) -> bool {
        self.tags == other.tags
    }
}

/// A registered log slot of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPoint {
    /// Storage-assigned id, non-semantic.
    pub id: u64,

    pub tags: TagSet,
}

impl LogPoint {
    /// Content equivalence ignoring storage ids.
    pub fn equiv(&self, other: &LogPoint) -> bool {
        self.tags == other.tags
    }
}

/// `true` when one path, suffixed with `/`, is a prefix of the other.
///
/// Callers strip trailing slashes first; `/a` and `/a/b` overlap, `/a` and
/// `/ab` do not.
pub(crate) fn path_overlap(a: &str, b: &str) -> bool {
    let a_dir = format!("{}/", a.trim_end_matches('/'));
    let b_dir = format!("{}/", b.trim_end_matches('/'));
    a_dir.starts_with(&b_dir) || b_dir.starts_with(&a_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;

    #[test]
    fn nested_paths_overlap_in_both_directions() {
        assert!(path_overlap("/a", "/a/b"));
        assert!(path_overlap("/a/b", "/a"));
        assert!(path_overlap("/a", "/a"));
    }

    #[test]
    fn sibling_and_similar_prefixes_do_not_overlap() {
        assert!(!path_overlap("/a", "/ab"));
        assert!(!path_overlap("/a/b", "/a/c"));
    }

    #[test]
    fn param_equiv_ignores_mount_point_id() {
        let tags = TagSet::new(vec![Tag::new("a", "b").unwrap()]);
        let param = MountPointParam::new("/in", tags.clone());
        let registered = MountPoint {
            id: 42,
            path: "/in".to_string(),
            tags,
        };
        assert!(param.equiv(&registered));
    }
}
