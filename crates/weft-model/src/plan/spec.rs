use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::body::Plan;
use super::image::ImageIdentifier;
use super::mount::{LogParam, MountPointParam, path_overlap};
use super::on_node::OnNode;
use super::resources::Resources;
use crate::error::PlanError;
use crate::tag::{KEY_KNIT_ID, KEY_KNIT_TIMESTAMP, KEY_KNIT_TRANSIENT, Tag};

/// User-supplied plan description, not yet validated.
///
/// `validate` consumes the bundle and either returns an immutable
/// [`PlanSpec`] or the first validation failure.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanParam {
    pub image: String,
    pub version: String,
    pub active: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<MountPointParam>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<MountPointParam>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogParam>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_node: Vec<OnNode>,

    #[serde(default, skip_serializing_if = "Resources::is_empty")]
    pub resources: Resources,
}

impl PlanParam {
    /// Validate the bundle into a canonical, content-addressed [`PlanSpec`].
    ///
    /// Checks run in a fixed order and short-circuit on the first failure:
    /// scheduling hints, image naming, mount-point paths, input tag shape,
    /// pairwise path overlap, output/log tag shape. On success the content
    /// hash is computed from the sorted representation, so the digest does
    /// not depend on the order in which the caller supplied anything.
    pub fn validate(self) -> Result<PlanSpec, PlanError> {
        let PlanParam {
            image,
            version,
            active,
            mut inputs,
            mut outputs,
            log,
            mut on_node,
            resources,
        } = self;

        on_node.sort();
        for on in &on_node {
            on.validate()?;
        }

        if image.is_empty() || version.is_empty() {
            return Err(PlanError::NamelessImage(format!("{image}:{version}")));
        }

        inputs.sort_by(|a, b| a.path.cmp(&b.path));
        outputs.sort_by(|a, b| a.path.cmp(&b.path));

        if inputs.is_empty() {
            return Err(PlanError::UnreachablePlan);
        }

        for mp in inputs.iter_mut().chain(outputs.iter_mut()) {
            if mp.path.is_empty() {
                return Err(PlanError::BadMountPointPath {
                    path: mp.path.clone(),
                    reason: "path is empty".to_string(),
                });
            }
            mp.path = mp.path.trim_end_matches('/').to_string();
        }

        for (nth, input) in inputs.iter().enumerate() {
            check_clean_absolute(&input.path)?;

            if input.tags.is_empty() {
                return Err(PlanError::BadMountPointTag {
                    path: input.path.clone(),
                    reason: "no tags for input".to_string(),
                });
            }

            let mut knit_id: Option<&Tag> = None;
            let mut timestamp: Option<&Tag> = None;
            for tag in input.tags.system_tags() {
                match tag.key() {
                    KEY_KNIT_TRANSIENT => {
                        return Err(PlanError::BadMountPointTag {
                            path: input.path.clone(),
                            reason: "data with \"knit#transient\" are never used".to_string(),
                        });
                    }
                    KEY_KNIT_ID => {
                        if knit_id.is_some_and(|seen| seen != tag) {
                            return Err(PlanError::BadMountPointTag {
                                path: input.path.clone(),
                                reason: "\"knit#id:...\" found twice (or more)".to_string(),
                            });
                        }
                        knit_id = Some(tag);
                    }
                    KEY_KNIT_TIMESTAMP => {
                        if timestamp.is_some_and(|seen| seen != tag) {
                            return Err(PlanError::BadMountPointTag {
                                path: input.path.clone(),
                                reason: "\"knit#timestamp:...\" found twice (or more)"
                                    .to_string(),
                            });
                        }
                        timestamp = Some(tag);
                    }
                    _ => {
                        return Err(PlanError::BadMountPointTag {
                            path: input.path.clone(),
                            reason: format!("unknown system tag: {tag}"),
                        });
                    }
                }
            }

            for other in &inputs[nth + 1..] {
                if path_overlap(&input.path, &other.path) {
                    return Err(PlanError::OverlappedMountPoints(
                        input.path.clone(),
                        other.path.clone(),
                    ));
                }
            }
            for other in &outputs {
                if path_overlap(&input.path, &other.path) {
                    return Err(PlanError::OverlappedMountPoints(
                        input.path.clone(),
                        other.path.clone(),
                    ));
                }
            }
        }

        for (nth, output) in outputs.iter().enumerate() {
            check_clean_absolute(&output.path)?;

            if output.tags.system_tags().next().is_some() {
                return Err(PlanError::BadMountPointTag {
                    path: output.path.clone(),
                    reason: "output cannot have tag starting with \"knit#\" (reserved by system)"
                        .to_string(),
                });
            }
            for other in &outputs[nth + 1..] {
                if path_overlap(&output.path, &other.path) {
                    return Err(PlanError::OverlappedMountPoints(
                        output.path.clone(),
                        other.path.clone(),
                    ));
                }
            }
        }

        if let Some(log) = &log {
            if log.tags.system_tags().next().is_some() {
                return Err(PlanError::BadMountPointTag {
                    path: "log".to_string(),
                    reason: "log cannot have tag starting with \"knit#\" (reserved by system)"
                        .to_string(),
                });
            }
        }

        let hash = content_hash(&image, &version, &on_node, &inputs, &outputs, log.as_ref());

        Ok(PlanSpec {
            image,
            version,
            active,
            inputs,
            outputs,
            log,
            on_node,
            resources,
            hash,
        })
    }
}

fn check_clean_absolute(path: &str) -> Result<(), PlanError> {
    let absolute = path.starts_with('/');
    let clean = path
        .split('/')
        .skip(1)
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !absolute || !clean {
        return Err(PlanError::BadMountPointPath {
            path: path.to_string(),
            reason: "not absolute or not clean".to_string(),
        });
    }
    Ok(())
}

/// Deterministic digest over the canonicalized plan fields.
///
/// Feeds, in fixed order: image, version, each hint's display form, each
/// sorted input's path and tag strings, each sorted output's path and tag
/// strings, and a `/log` marker plus log tags when a log slot is declared.
fn content_hash(
    image: &str,
    version: &str,
    on_node: &[OnNode],
    inputs: &[MountPointParam],
    outputs: &[MountPointParam],
    log: Option<&LogParam>,
) -> String {
    let mut digest = Sha256::new();
    digest.update(image.as_bytes());
    digest.update(version.as_bytes());

    for on in on_node {
        digest.update(on.to_string().as_bytes());
    }
    for mp in inputs.iter().chain(outputs) {
        digest.update(mp.path.as_bytes());
        for tag in mp.tags.iter() {
            digest.update(tag.to_string().as_bytes());
        }
    }
    if let Some(log) = log {
        digest.update(b"/log");
        for tag in log.tags.iter() {
            digest.update(tag.to_string().as_bytes());
        }
    }

    hex::encode(digest.finalize())
}

/// A validated, immutable plan specification.
///
/// Only [`PlanParam::validate`] constructs this; mount points arrive sorted
/// by path, hints sorted by `(mode, key, value)`, and the content hash is
/// already fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSpec {
    image: String,
    version: String,
    active: bool,
    inputs: Vec<MountPointParam>,
    outputs: Vec<MountPointParam>,
    log: Option<LogParam>,
    on_node: Vec<OnNode>,
    resources: Resources,
    hash: String,
}

impl PlanSpec {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The image reference this spec names.
    pub fn image_identifier(&self) -> ImageIdentifier {
        ImageIdentifier::new(&self.image, &self.version)
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Input slots, sorted by path.
    pub fn inputs(&self) -> &[MountPointParam] {
        &self.inputs
    }

    /// Output slots, sorted by path.
    pub fn outputs(&self) -> &[MountPointParam] {
        &self.outputs
    }

    pub fn log(&self) -> Option<&LogParam> {
        self.log.as_ref()
    }

    /// Scheduling hints, sorted by `(mode, key, value)`.
    pub fn on_node(&self) -> &[OnNode] {
        &self.on_node
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// The content hash, reused as the plan's dedup key.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// `true` iff this spec and `plan` describe the same plan content.
    ///
    /// This is the duplicate-registration predicate: hash and image
    /// reference must match, and every slot must be content-equivalent
    /// regardless of storage identifiers.
    pub fn equiv_plan(&self, plan: &Plan) -> bool {
        if self.hash != plan.body.hash {
            return false;
        }
        match &plan.body.image {
            Some(image) => {
                if image.image != self.image || image.version != self.version {
                    return false;
                }
            }
            None => return false,
        }
        match (&self.log, &plan.log) {
            (None, None) => {}
            (Some(param), Some(point)) => {
                if !param.equiv(point) {
                    return false;
                }
            }
            _ => return false,
        }
        self.inputs.len() == plan.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&plan.inputs)
                .all(|(param, mp)| param.equiv(mp))
            && self.outputs.len() == plan.outputs.len()
            && self
                .outputs
                .iter()
                .zip(&plan.outputs)
                .all(|(param, mp)| param.equiv(mp))
            && self.on_node == plan.body.on_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::on_node::OnNodeMode;
    use crate::tag::{
        KEY_KNIT_ID, KEY_KNIT_TRANSIENT, Tag, TagSet, VALUE_TRANSIENT_PROCESSING,
    };

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| Tag::new(*k, *v).unwrap())
            .collect()
    }

    fn minimal_param() -> PlanParam {
        PlanParam {
            image: "repo/x".to_string(),
            version: "v1".to_string(),
            active: true,
            inputs: vec![MountPointParam::new("/in", tags(&[("a", "b")]))],
            outputs: vec![MountPointParam::new("/out", tags(&[("c", "d")]))],
            ..Default::default()
        }
    }

    #[test]
    fn minimal_plan_validates_and_hash_is_reproducible() {
        let first = minimal_param().validate().unwrap();
        let second = minimal_param().validate().unwrap();
        assert_eq!(first.hash(), second.hash());
        assert!(!first.hash().is_empty());
    }

    #[test]
    fn hash_is_invariant_under_presentation_order() {
        let mut param = minimal_param();
        param.inputs = vec![
            MountPointParam::new("/in/b", tags(&[("k", "2")])),
            MountPointParam::new("/in/a", tags(&[("k", "1")])),
        ];
        param.on_node = vec![
            OnNode::new(OnNodeMode::Must, "zone", "eu"),
            OnNode::new(OnNodeMode::May, "accelerator", "gpu"),
        ];
        let forward = param.clone().validate().unwrap();

        let mut reversed = param;
        reversed.inputs.reverse();
        reversed.on_node.reverse();
        let backward = reversed.validate().unwrap();

        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let base = minimal_param().validate().unwrap();

        let mut changed_tag = minimal_param();
        changed_tag.inputs = vec![MountPointParam::new("/in", tags(&[("a", "c")]))];
        assert_ne!(base.hash(), changed_tag.validate().unwrap().hash());

        let mut changed_path = minimal_param();
        changed_path.inputs = vec![MountPointParam::new("/input", tags(&[("a", "b")]))];
        assert_ne!(base.hash(), changed_path.validate().unwrap().hash());

        let mut changed_version = minimal_param();
        changed_version.version = "v2".to_string();
        assert_ne!(base.hash(), changed_version.validate().unwrap().hash());

        let mut changed_hint = minimal_param();
        changed_hint.on_node = vec![OnNode::new(OnNodeMode::May, "zone", "eu")];
        assert_ne!(base.hash(), changed_hint.validate().unwrap().hash());
    }

    #[test]
    fn trailing_slash_is_stripped_before_hashing() {
        let plain = minimal_param().validate().unwrap();
        let mut slashed = minimal_param();
        slashed.inputs = vec![MountPointParam::new("/in/", tags(&[("a", "b")]))];
        assert_eq!(plain.hash(), slashed.validate().unwrap().hash());
    }

    #[test]
    fn nameless_image_is_rejected() {
        let mut param = minimal_param();
        param.version = String::new();
        assert!(matches!(
            param.validate(),
            Err(PlanError::NamelessImage(_)),
        ));
    }

    #[test]
    fn zero_inputs_is_an_unreachable_plan() {
        let mut param = minimal_param();
        param.inputs = Vec::new();
        assert_eq!(param.validate().unwrap_err(), PlanError::UnreachablePlan);
    }

    #[test]
    fn input_without_tags_is_rejected() {
        let mut param = minimal_param();
        param.inputs = vec![MountPointParam::new("/in", TagSet::default())];
        assert!(matches!(
            param.validate(),
            Err(PlanError::BadMountPointTag { .. }),
        ));
    }

    #[test]
    fn relative_or_unclean_paths_are_rejected() {
        let mut relative = minimal_param();
        relative.inputs = vec![MountPointParam::new("in", tags(&[("a", "b")]))];
        assert!(matches!(
            relative.validate(),
            Err(PlanError::BadMountPointPath { .. }),
        ));

        let mut unclean = minimal_param();
        unclean.inputs = vec![MountPointParam::new("/in/../x", tags(&[("a", "b")]))];
        assert!(matches!(
            unclean.validate(),
            Err(PlanError::BadMountPointPath { .. }),
        ));
    }

    #[test]
    fn overlapping_mount_points_are_rejected() {
        let mut param = minimal_param();
        param.inputs = vec![
            MountPointParam::new("/a", tags(&[("k", "1")])),
            MountPointParam::new("/a/b", tags(&[("k", "2")])),
        ];
        assert!(matches!(
            param.validate(),
            Err(PlanError::OverlappedMountPoints(_, _)),
        ));

        let mut crossed = minimal_param();
        crossed.outputs = vec![MountPointParam::new("/in/sub", tags(&[("c", "d")]))];
        assert!(matches!(
            crossed.validate(),
            Err(PlanError::OverlappedMountPoints(_, _)),
        ));
    }

    #[test]
    fn transient_input_tag_is_rejected() {
        let mut param = minimal_param();
        param.inputs = vec![MountPointParam::new(
            "/in",
            tags(&[(KEY_KNIT_TRANSIENT, VALUE_TRANSIENT_PROCESSING)]),
        )];
        assert!(matches!(
            param.validate(),
            Err(PlanError::BadMountPointTag { .. }),
        ));
    }

    #[test]
    fn conflicting_knit_id_values_are_rejected_but_repeats_are_fine() {
        let mut conflicting = minimal_param();
        conflicting.inputs = vec![MountPointParam::new(
            "/in",
            tags(&[(KEY_KNIT_ID, "one"), (KEY_KNIT_ID, "two")]),
        )];
        assert!(matches!(
            conflicting.validate(),
            Err(PlanError::BadMountPointTag { .. }),
        ));

        let mut repeated = minimal_param();
        repeated.inputs = vec![MountPointParam::new(
            "/in",
            tags(&[(KEY_KNIT_ID, "one"), (KEY_KNIT_ID, "one"), ("a", "b")]),
        )];
        assert!(repeated.validate().is_ok());
    }

    #[test]
    fn output_with_system_tag_is_rejected() {
        let mut param = minimal_param();
        param.outputs = vec![MountPointParam::new(
            "/out",
            TagSet::new(vec![Tag::new(KEY_KNIT_ID, "x").unwrap()]),
        )];
        assert!(matches!(
            param.validate(),
            Err(PlanError::BadMountPointTag { .. }),
        ));
    }

    #[test]
    fn log_with_system_tag_is_rejected() {
        let mut param = minimal_param();
        param.log = Some(LogParam::new(TagSet::new(vec![
            Tag::new(KEY_KNIT_ID, "x").unwrap(),
        ])));
        assert!(matches!(
            param.validate(),
            Err(PlanError::BadMountPointTag { .. }),
        ));
    }

    #[test]
    fn invalid_on_node_hint_fails_first() {
        let mut param = minimal_param();
        param.image = String::new(); // would also fail, but hints come first
        param.on_node = vec![OnNode::new(OnNodeMode::May, "", "v")];
        assert!(matches!(
            param.validate(),
            Err(PlanError::InvalidOnNodeKey(_)),
        ));
    }

    #[test]
    fn log_presence_changes_the_hash() {
        let without = minimal_param().validate().unwrap();
        let mut with = minimal_param();
        with.log = Some(LogParam::new(tags(&[("log", "x")])));
        assert_ne!(without.hash(), with.validate().unwrap().hash());
    }
}
