//! Node-affinity rewriting for outgoing pods: biases the recreated pod
//! toward its chosen host without making other placements infeasible.

use crate::core::pod::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, Pod,
    PreferredSchedulingTerm,
};

pub const NODE_AFFINITY_HOSTNAME_KEY: &str = "kubernetes.io/hostname";

fn hostname_requirement(host: &str) -> NodeSelectorRequirement {
    NodeSelectorRequirement {
        key: NODE_AFFINITY_HOSTNAME_KEY.to_string(),
        operator: "In".to_string(),
        values: vec![host.to_string()],
    }
}

fn node_affinity_of(pod: &mut Pod) -> &mut NodeAffinity {
    let affinity = pod.spec.affinity.get_or_insert_with(Affinity::default);
    affinity.node_affinity.get_or_insert_with(NodeAffinity::default)
}

/// Appends a hostname match to the last preferred scheduling term, creating
/// a weight-1 term when none exists. Preferred affinity nudges the scheduler
/// toward the host but stays satisfiable if the host fills up.
pub fn set_new_preferred_node_affinity(pod: &mut Pod, host: &str) {
    let node_affinity = node_affinity_of(pod);
    let preferred = &mut node_affinity.preferred_during_scheduling_ignored_during_execution;
    if preferred.is_empty() {
        preferred.push(PreferredSchedulingTerm {
            weight: 1,
            preference: NodeSelectorTerm::default(),
        });
    }
    if let Some(term) = preferred.last_mut() {
        term.preference.match_expressions.push(hostname_requirement(host));
    }
}

/// Appends a hostname match to the last required node-selector term,
/// creating one when none exists. The recreated pod can then only land on
/// the given host.
pub fn set_new_required_node_affinity(pod: &mut Pod, host: &str) {
    let node_affinity = node_affinity_of(pod);
    let required = node_affinity
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(NodeSelector::default);
    if required.node_selector_terms.is_empty() {
        required.node_selector_terms.push(NodeSelectorTerm::default());
    }
    if let Some(term) = required.node_selector_terms.last_mut() {
        term.match_expressions.push(hostname_requirement(host));
    }
}
