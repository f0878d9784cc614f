//! PodInfo: a pod together with its pre-parsed affinity terms and aggregate
//! parse error, plus the request-based pod sort helpers.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::core::pod::{Pod, PodAffinityTerm, WeightedPodAffinityTerm};
use crate::core::resources::get_nonzero_requests;

/// A required (anti-)affinity term with its selector ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityTerm {
    pub namespaces: BTreeSet<String>,
    pub topology_key: String,
    pub term: PodAffinityTerm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAffinityTerm {
    pub weight: i32,
    pub term: AffinityTerm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodInfo {
    pub pod: Pod,
    pub required_affinity_terms: Vec<AffinityTerm>,
    pub required_anti_affinity_terms: Vec<AffinityTerm>,
    pub preferred_affinity_terms: Vec<WeightedAffinityTerm>,
    pub preferred_anti_affinity_terms: Vec<WeightedAffinityTerm>,
    /// Aggregate of affinity-term parse failures; a pod carrying one is
    /// treated as non-migratable downstream.
    pub parse_error: Option<String>,
}

impl PodInfo {
    pub fn new(pod: Pod) -> PodInfo {
        let mut info = PodInfo {
            pod: Pod::default(),
            required_affinity_terms: vec![],
            required_anti_affinity_terms: vec![],
            preferred_affinity_terms: vec![],
            preferred_anti_affinity_terms: vec![],
            parse_error: None,
        };
        info.update(pod);
        info
    }

    /// Rebuilds the cached terms, except when the passed pod is the exact
    /// same object (same uid): the parsed terms are immutable, so only the
    /// pod is swapped in place.
    pub fn update(&mut self, pod: Pod) {
        if !pod.metadata.uid.is_empty() && pod.metadata.uid == self.pod.metadata.uid {
            self.pod = pod;
            return;
        }

        let mut parse_errors: Vec<String> = vec![];

        let (required_affinity, preferred_affinity) = affinity_terms_of(&pod, false);
        let (required_anti_affinity, preferred_anti_affinity) = affinity_terms_of(&pod, true);

        self.required_affinity_terms =
            compile_terms(&pod, &required_affinity, "requiredAffinityTerms", &mut parse_errors);
        self.required_anti_affinity_terms = compile_terms(
            &pod,
            &required_anti_affinity,
            "requiredAntiAffinityTerms",
            &mut parse_errors,
        );
        self.preferred_affinity_terms = compile_weighted_terms(
            &pod,
            &preferred_affinity,
            "preferredAffinityTerms",
            &mut parse_errors,
        );
        self.preferred_anti_affinity_terms = compile_weighted_terms(
            &pod,
            &preferred_anti_affinity,
            "preferredAntiAffinityTerms",
            &mut parse_errors,
        );

        self.parse_error = if parse_errors.is_empty() {
            None
        } else {
            Some(parse_errors.join("; "))
        };
        self.pod = pod;
    }

    pub fn has_affinity(&self) -> bool {
        !self.required_affinity_terms.is_empty() || !self.preferred_affinity_terms.is_empty()
    }

    pub fn has_required_anti_affinity(&self) -> bool {
        !self.required_anti_affinity_terms.is_empty()
    }
}

fn affinity_terms_of(pod: &Pod, anti: bool) -> (Vec<PodAffinityTerm>, Vec<WeightedPodAffinityTerm>) {
    let Some(affinity) = pod.spec.affinity.as_ref() else {
        return (vec![], vec![]);
    };
    if anti {
        match affinity.pod_anti_affinity.as_ref() {
            Some(a) => (
                a.required_during_scheduling_ignored_during_execution.clone(),
                a.preferred_during_scheduling_ignored_during_execution.clone(),
            ),
            None => (vec![], vec![]),
        }
    } else {
        match affinity.pod_affinity.as_ref() {
            Some(a) => (
                a.required_during_scheduling_ignored_during_execution.clone(),
                a.preferred_during_scheduling_ignored_during_execution.clone(),
            ),
            None => (vec![], vec![]),
        }
    }
}

fn compile_term(pod: &Pod, term: &PodAffinityTerm) -> Result<AffinityTerm, String> {
    if let Some(selector) = term.label_selector.as_ref() {
        // Probing with the pod's own labels surfaces malformed requirements.
        selector.matches(&pod.metadata.labels)?;
    }
    let mut namespaces: BTreeSet<String> = term.namespaces.iter().cloned().collect();
    if namespaces.is_empty() {
        namespaces.insert(pod.metadata.namespace.clone());
    }
    Ok(AffinityTerm {
        namespaces,
        topology_key: term.topology_key.clone(),
        term: term.clone(),
    })
}

fn compile_terms(
    pod: &Pod,
    terms: &[PodAffinityTerm],
    kind: &str,
    parse_errors: &mut Vec<String>,
) -> Vec<AffinityTerm> {
    let mut compiled = vec![];
    for term in terms.iter() {
        match compile_term(pod, term) {
            Ok(t) => compiled.push(t),
            Err(e) => parse_errors.push(format!("{}: {}", kind, e)),
        }
    }
    compiled
}

fn compile_weighted_terms(
    pod: &Pod,
    terms: &[WeightedPodAffinityTerm],
    kind: &str,
    parse_errors: &mut Vec<String>,
) -> Vec<WeightedAffinityTerm> {
    let mut compiled = vec![];
    for weighted in terms.iter() {
        match compile_term(pod, &weighted.pod_affinity_term) {
            Ok(t) => compiled.push(WeightedAffinityTerm {
                weight: weighted.weight,
                term: t,
            }),
            Err(e) => parse_errors.push(format!("{}: {}", kind, e)),
        }
    }
    compiled
}

/// Stable pod identity key: `namespace/name`, or just the name for
/// cluster-scoped lookups without a namespace.
pub fn get_pod_key(pod: &Pod) -> Result<String, String> {
    if pod.metadata.name.is_empty() {
        return Err("pod has no name".to_string());
    }
    if pod.metadata.namespace.is_empty() {
        return Ok(pod.metadata.name.clone());
    }
    Ok(format!("{}/{}", pod.metadata.namespace, pod.metadata.name))
}

/// Non-zero-defaulted cpu request of a pod: sum over runtime containers,
/// max over init containers.
pub fn get_cpu_requests(pod: &Pod) -> i64 {
    let mut non0_cpu = 0i64;
    for container in pod.spec.containers.iter() {
        let (cpu, _) = get_nonzero_requests(&container.resources.requests);
        non0_cpu += cpu;
    }
    for init_container in pod.spec.init_containers.iter() {
        let (cpu, _) = get_nonzero_requests(&init_container.resources.requests);
        non0_cpu = non0_cpu.max(cpu);
    }
    non0_cpu
}

/// Non-zero-defaulted memory request of a pod, same aggregation as cpu.
pub fn get_memory_requests(pod: &Pod) -> i64 {
    let mut non0_mem = 0i64;
    for container in pod.spec.containers.iter() {
        let (_, memory) = get_nonzero_requests(&container.resources.requests);
        non0_mem += memory;
    }
    for init_container in pod.spec.init_containers.iter() {
        let (_, memory) = get_nonzero_requests(&init_container.resources.requests);
        non0_mem = non0_mem.max(memory);
    }
    non0_mem
}

/// Returns a copy of the pod list sorted ascending by cpu request. The input
/// slice is left untouched.
pub fn sort_pods_based_on_cpu(pod_infos: &[Rc<PodInfo>]) -> Vec<Rc<PodInfo>> {
    let mut sorted: Vec<Rc<PodInfo>> = pod_infos.to_vec();
    sorted.sort_by_key(|info| get_cpu_requests(&info.pod));
    sorted
}

/// Returns a copy of the pod list sorted ascending by memory request. The
/// input slice is left untouched.
pub fn sort_pods_based_on_memory(pod_infos: &[Rc<PodInfo>]) -> Vec<Rc<PodInfo>> {
    let mut sorted: Vec<Rc<PodInfo>> = pod_infos.to_vec();
    sorted.sort_by_key(|info| get_memory_requests(&info.pod));
    sorted
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::core::pod::Pod;

    fn pod_with_cpu_mem(name: &str, cpu: &str, memory: &str) -> Pod {
        serde_yaml::from_str(&format!(
            r#"
            metadata: {{ name: {} }}
            spec:
              containers:
              - name: main
                resources: {{ requests: {{ cpu: {}, memory: {} }} }}
            "#,
            name, cpu, memory
        ))
        .unwrap()
    }

    #[test]
    fn test_get_pod_key() {
        let mut pod = pod_with_cpu_mem("keyed", "100m", "64Mi");
        pod.metadata.namespace = "ns".to_string();
        assert_eq!("ns/keyed", get_pod_key(&pod).unwrap());
        pod.metadata.name = String::new();
        assert!(get_pod_key(&pod).is_err());
    }

    #[test]
    fn test_sort_pods_returns_sorted_copy_and_keeps_input_order() {
        let pods: Vec<Rc<PodInfo>> = vec![
            Rc::new(PodInfo::new(pod_with_cpu_mem("big", "900m", "64Mi"))),
            Rc::new(PodInfo::new(pod_with_cpu_mem("small", "100m", "512Mi"))),
            Rc::new(PodInfo::new(pod_with_cpu_mem("mid", "400m", "128Mi"))),
        ];

        let by_cpu = sort_pods_based_on_cpu(&pods);
        let cpu_names: Vec<&str> = by_cpu.iter().map(|p| p.pod.metadata.name.as_str()).collect();
        assert_eq!(vec!["small", "mid", "big"], cpu_names);

        let by_mem = sort_pods_based_on_memory(&pods);
        let mem_names: Vec<&str> = by_mem.iter().map(|p| p.pod.metadata.name.as_str()).collect();
        assert_eq!(vec!["big", "mid", "small"], mem_names);

        // The original list keeps its insertion order.
        let input_names: Vec<&str> = pods.iter().map(|p| p.pod.metadata.name.as_str()).collect();
        assert_eq!(vec!["big", "small", "mid"], input_names);
    }

    #[test]
    fn test_affinity_parse_error_is_aggregated() {
        let pod: Pod = serde_yaml::from_str(
            r#"
            metadata: { name: picky, namespace: ns }
            spec:
              affinity:
                podAntiAffinity:
                  requiredDuringSchedulingIgnoredDuringExecution:
                  - topologyKey: kubernetes.io/hostname
                    labelSelector:
                      matchExpressions:
                      - { key: app, operator: In, values: [] }
            "#,
        )
        .unwrap();
        let info = PodInfo::new(pod);
        assert!(info.parse_error.is_some());
        assert!(info.required_anti_affinity_terms.is_empty());
    }

    #[test]
    fn test_update_same_uid_keeps_cached_terms() {
        let mut pod: Pod = serde_yaml::from_str(
            r#"
            metadata: { name: sticky, namespace: ns, uid: u-1 }
            spec:
              affinity:
                podAffinity:
                  requiredDuringSchedulingIgnoredDuringExecution:
                  - topologyKey: kubernetes.io/hostname
                    labelSelector:
                      matchLabels: { app: web }
            "#,
        )
        .unwrap();
        let mut info = PodInfo::new(pod.clone());
        assert_eq!(1, info.required_affinity_terms.len());

        pod.spec.node_name = "node-9".to_string();
        info.update(pod);
        assert_eq!("node-9", info.pod.spec.node_name);
        assert_eq!(1, info.required_affinity_terms.len());
    }
}
