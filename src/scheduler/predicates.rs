//! Resource-independent fit predicates: node selectors, required node
//! affinity and taint toleration. Resource fit is the planner's business.

use crate::core::node::{Node, Taint, TAINT_EFFECT_NO_EXECUTE, TAINT_EFFECT_NO_SCHEDULE};
use crate::core::pod::{NodeSelectorRequirement, NodeSelectorTerm, Pod, Toleration};

/// Whether the pod could in principle run on this node: the node is
/// schedulable, the pod's node selector and required node affinity match the
/// node's labels, and every hard taint is tolerated.
pub fn pod_fits_current_node(pod: &Pod, node: &Node) -> bool {
    if node.spec.unschedulable {
        return false;
    }
    for (key, value) in pod.spec.node_selector.iter() {
        if node.metadata.labels.get(key) != Some(value) {
            return false;
        }
    }
    if !required_node_affinity_matches(pod, node) {
        return false;
    }
    tolerates_node_taints(pod, node)
}

/// Whether some node other than the pod's current one fits.
pub fn pod_fits_any_other_node(pod: &Pod, nodes: &[&Node]) -> bool {
    nodes
        .iter()
        .filter(|node| node.metadata.name != pod.spec.node_name)
        .any(|node| pod_fits_current_node(pod, node))
}

fn required_node_affinity_matches(pod: &Pod, node: &Node) -> bool {
    let Some(required) = pod
        .spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
    else {
        return true;
    };
    if required.node_selector_terms.is_empty() {
        return true;
    }
    // Terms are ORed; expressions within a term are ANDed.
    required
        .node_selector_terms
        .iter()
        .any(|term| node_selector_term_matches(term, node))
}

fn node_selector_term_matches(term: &NodeSelectorTerm, node: &Node) -> bool {
    term.match_expressions
        .iter()
        .all(|requirement| node_requirement_matches(requirement, node))
}

fn node_requirement_matches(requirement: &NodeSelectorRequirement, node: &Node) -> bool {
    let value = node.metadata.labels.get(&requirement.key);
    match requirement.operator.as_str() {
        "In" => value.map_or(false, |v| requirement.values.contains(v)),
        "NotIn" => value.map_or(true, |v| !requirement.values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" => numeric_compare(value, requirement, |actual, bound| actual > bound),
        "Lt" => numeric_compare(value, requirement, |actual, bound| actual < bound),
        _ => false,
    }
}

fn numeric_compare(
    value: Option<&String>,
    requirement: &NodeSelectorRequirement,
    compare: fn(i64, i64) -> bool,
) -> bool {
    let (Some(value), Some(bound)) = (value, requirement.values.first()) else {
        return false;
    };
    match (value.parse::<i64>(), bound.parse::<i64>()) {
        (Ok(actual), Ok(bound)) => compare(actual, bound),
        _ => false,
    }
}

fn tolerates_node_taints(pod: &Pod, node: &Node) -> bool {
    node.spec
        .taints
        .iter()
        .filter(|taint| {
            taint.effect == TAINT_EFFECT_NO_SCHEDULE || taint.effect == TAINT_EFFECT_NO_EXECUTE
        })
        .all(|taint| {
            pod.spec
                .tolerations
                .iter()
                .any(|toleration| tolerates(toleration, taint))
        })
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if !toleration.effect.is_empty() && toleration.effect != taint.effect {
        return false;
    }
    // An empty key with Exists tolerates everything.
    if toleration.key.is_empty() {
        return toleration.operator == "Exists";
    }
    if toleration.key != taint.key {
        return false;
    }
    match toleration.operator.as_str() {
        "Exists" => true,
        // Equal is the default operator.
        "Equal" | "" => toleration.value == taint.value,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::Node;
    use crate::core::pod::Pod;

    fn node_from_yaml(yaml: &str) -> Node {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn pod_from_yaml(yaml: &str) -> Pod {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_node_selector_must_match() {
        let pod = pod_from_yaml(
            r#"
            metadata: { name: p }
            spec:
              nodeSelector: { zone: east }
            "#,
        );
        let east = node_from_yaml(
            r#"
            metadata: { name: east-node, labels: { zone: east } }
            "#,
        );
        let west = node_from_yaml(
            r#"
            metadata: { name: west-node, labels: { zone: west } }
            "#,
        );
        assert!(pod_fits_current_node(&pod, &east));
        assert!(!pod_fits_current_node(&pod, &west));
    }

    #[test]
    fn test_unschedulable_node_never_fits() {
        let pod = pod_from_yaml("metadata: { name: p }\nspec: {}");
        let cordoned = node_from_yaml(
            r#"
            metadata: { name: cordoned }
            spec: { unschedulable: true }
            "#,
        );
        assert!(!pod_fits_current_node(&pod, &cordoned));
    }

    #[test]
    fn test_taints_require_toleration() {
        let node = node_from_yaml(
            r#"
            metadata: { name: tainted }
            spec:
              taints:
              - { key: dedicated, value: ml, effect: NoSchedule }
            "#,
        );
        let intolerant = pod_from_yaml("metadata: { name: p }\nspec: {}");
        assert!(!pod_fits_current_node(&intolerant, &node));

        let tolerant = pod_from_yaml(
            r#"
            metadata: { name: p }
            spec:
              tolerations:
              - { key: dedicated, operator: Equal, value: ml, effect: NoSchedule }
            "#,
        );
        assert!(pod_fits_current_node(&tolerant, &node));

        let prefer_only = node_from_yaml(
            r#"
            metadata: { name: soft }
            spec:
              taints:
              - { key: dedicated, value: ml, effect: PreferNoSchedule }
            "#,
        );
        assert!(pod_fits_current_node(&intolerant, &prefer_only));
    }

    #[test]
    fn test_required_node_affinity() {
        let pod = pod_from_yaml(
            r#"
            metadata: { name: p }
            spec:
              affinity:
                nodeAffinity:
                  requiredDuringSchedulingIgnoredDuringExecution:
                    nodeSelectorTerms:
                    - matchExpressions:
                      - { key: disktype, operator: In, values: [ssd] }
            "#,
        );
        let ssd = node_from_yaml("metadata: { name: fast, labels: { disktype: ssd } }");
        let hdd = node_from_yaml("metadata: { name: slow, labels: { disktype: hdd } }");
        assert!(pod_fits_current_node(&pod, &ssd));
        assert!(!pod_fits_current_node(&pod, &hdd));
    }

    #[test]
    fn test_any_other_node_skips_current() {
        let mut pod = pod_from_yaml("metadata: { name: p }\nspec: {}");
        pod.spec.node_name = "only".to_string();
        let only = node_from_yaml("metadata: { name: only }");
        assert!(!pod_fits_any_other_node(&pod, &[&only]));

        let other = node_from_yaml("metadata: { name: other }");
        assert!(pod_fits_any_other_node(&pod, &[&only, &other]));
    }
}
