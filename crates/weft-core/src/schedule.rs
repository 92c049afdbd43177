//! Translation of plan scheduling hints into scheduler-level placement.
//!
//! A one-way, stateless mapping: validation already happened during plan
//! validation, so this module only aggregates.

use std::collections::BTreeMap;

use weft_model::{OnNode, OnNodeMode};

/// Taint effect a toleration matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
}

/// Tolerates nodes restricted by `key=value` with the given effect.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Toleration {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

/// Scheduler-level placement derived from a plan's `on_node` hints.
///
/// Affinity terms aggregate values per label key, in key order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub tolerations: Vec<Toleration>,

    /// Soft affinity: prefer nodes where `key` has one of the values.
    pub preferred: BTreeMap<String, Vec<String>>,

    /// Hard affinity: require nodes where `key` has one of the values.
    pub required: BTreeMap<String, Vec<String>>,
}

/// Map hints to placement.
///
/// - `may` tolerates the node's restricting taint, nothing more: the run
///   *can* land there but is not steered to it.
/// - `prefer` additionally tolerates `PreferNoSchedule` and adds a soft
///   affinity toward `key=value`.
/// - `must` adds a hard affinity: the run cannot be placed on a node
///   lacking `key=value`.
pub fn placement_for(hints: &[OnNode]) -> Placement {
    let mut placement = Placement::default();

    for hint in hints {
        tolerate(&mut placement, hint, TaintEffect::NoSchedule);
        match hint.mode {
            OnNodeMode::May => {}
            OnNodeMode::Prefer => {
                tolerate(&mut placement, hint, TaintEffect::PreferNoSchedule);
                affine(&mut placement.preferred, hint);
            }
            OnNodeMode::Must => {
                tolerate(&mut placement, hint, TaintEffect::PreferNoSchedule);
                affine(&mut placement.required, hint);
            }
        }
    }

    placement
}

fn tolerate(placement: &mut Placement, hint: &OnNode, effect: TaintEffect) {
    let toleration = Toleration {
        key: hint.key.clone(),
        value: hint.value.clone(),
        effect,
    };
    if !placement.tolerations.contains(&toleration) {
        placement.tolerations.push(toleration);
    }
}

fn affine(terms: &mut BTreeMap<String, Vec<String>>, hint: &OnNode) {
    let values = terms.entry(hint.key.clone()).or_default();
    if !values.contains(&hint.value) {
        values.push(hint.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(mode: OnNodeMode, key: &str, value: &str) -> OnNode {
        OnNode::new(mode, key, value)
    }

    #[test]
    fn may_grants_only_a_toleration() {
        let p = placement_for(&[hint(OnNodeMode::May, "accelerator", "gpu")]);
        assert_eq!(
            p.tolerations,
            vec![Toleration {
                key: "accelerator".to_string(),
                value: "gpu".to_string(),
                effect: TaintEffect::NoSchedule,
            }],
        );
        assert!(p.preferred.is_empty());
        assert!(p.required.is_empty());
    }

    #[test]
    fn prefer_adds_soft_affinity_on_top() {
        let p = placement_for(&[hint(OnNodeMode::Prefer, "zone", "eu-1")]);
        assert_eq!(p.tolerations.len(), 2);
        assert_eq!(p.preferred.get("zone"), Some(&vec!["eu-1".to_string()]));
        assert!(p.required.is_empty());
    }

    #[test]
    fn must_adds_hard_affinity() {
        let p = placement_for(&[hint(OnNodeMode::Must, "zone", "eu-1")]);
        assert_eq!(p.tolerations.len(), 2);
        assert!(p.preferred.is_empty());
        assert_eq!(p.required.get("zone"), Some(&vec!["eu-1".to_string()]));
    }

    #[test]
    fn tolerations_dedup_across_hints() {
        let p = placement_for(&[
            hint(OnNodeMode::Prefer, "zone", "eu-1"),
            hint(OnNodeMode::Must, "zone", "eu-1"),
        ]);
        // NoSchedule and PreferNoSchedule once each.
        assert_eq!(p.tolerations.len(), 2);
    }

    #[test]
    fn affinity_values_aggregate_per_key() {
        let p = placement_for(&[
            hint(OnNodeMode::Must, "zone", "eu-1"),
            hint(OnNodeMode::Must, "zone", "eu-2"),
            hint(OnNodeMode::Must, "rack", "a"),
        ]);
        assert_eq!(
            p.required.get("zone"),
            Some(&vec!["eu-1".to_string(), "eu-2".to_string()]),
        );
        assert_eq!(p.required.get("rack"), Some(&vec!["a".to_string()]));
    }

    #[test]
    fn empty_hints_mean_unconstrained_placement() {
        assert_eq!(placement_for(&[]), Placement::default());
    }
}
