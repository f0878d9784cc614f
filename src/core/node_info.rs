//! Node-level aggregated information: resource bookkeeping over the pods a
//! node hosts, plus the cpu/memory ratio and entropy metrics driving the
//! balancer.

use std::rc::Rc;
use std::sync::atomic::{AtomicI64, Ordering};

use log::error;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::pod_info::{get_pod_key, PodInfo};
use crate::core::resources::{calculate_resource, Resource, MIB};

/// Ratio reported for a node whose available memory rounds down to zero MiB.
pub const RATIO_NO_MEMORY_SENTINEL: f64 = 1_000_000.0;

static GENERATION: AtomicI64 = AtomicI64::new(0);

// Process-global so that a node deleted and recreated under the same name can
// never reuse a generation number.
fn next_generation() -> i64 {
    GENERATION.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Debug, PartialEq)]
pub enum NodeInfoError {
    MissingPodKey(String),
    PodNotFound { pod: String, node: String },
}

#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    node: Option<Node>,

    /// Pods running on the node.
    pub pods: Vec<Rc<PodInfo>>,
    /// The subset of pods with affinity.
    pub pods_with_affinity: Vec<Rc<PodInfo>>,
    /// The subset of pods with required anti-affinity.
    pub pods_with_required_anti_affinity: Vec<Rc<PodInfo>>,

    /// Total real requests of all pods on this node.
    pub requested: Resource,
    /// Total requests with the non-zero minimum applied to each container's
    /// cpu and memory, so that many zero-request pods cannot pile up on one
    /// node.
    pub non_zero_requested: Resource,
    /// The node's allocatable, denormalized out of the resource-list map.
    pub allocatable: Resource,
    /// `allocatable - non_zero_requested` for cpu and memory; scalar deltas
    /// track the real requests.
    pub available: Resource,

    /// Bumped on every mutation.
    pub generation: i64,
}

impl NodeInfo {
    pub fn new() -> NodeInfo {
        NodeInfo {
            node: None,
            pods: vec![],
            pods_with_affinity: vec![],
            pods_with_required_anti_affinity: vec![],
            requested: Resource::default(),
            non_zero_requested: Resource::default(),
            allocatable: Resource::default(),
            available: Resource::default(),
            generation: next_generation(),
        }
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    pub fn node_name(&self) -> &str {
        self.node
            .as_ref()
            .map(|n| n.metadata.name.as_str())
            .unwrap_or("")
    }

    /// Sets the node object and primes allocatable/available from its status.
    /// Must run before pods are added.
    pub fn set_node(&mut self, node: Node) {
        self.allocatable = Resource::from_resource_list(&node.status.allocatable);
        self.available = Resource::from_resource_list(&node.status.allocatable);
        self.node = Some(node);
        self.generation = next_generation();
    }

    /// Drops the node object, leaving all tracking information in place.
    pub fn remove_node(&mut self) {
        self.node = None;
        self.generation = next_generation();
    }

    pub fn add_pod(&mut self, pod: Pod) {
        self.add_pod_info(Rc::new(PodInfo::new(pod)));
    }

    pub fn add_pod_info(&mut self, pod_info: Rc<PodInfo>) {
        let (resource, non0_cpu, non0_mem) = calculate_resource(&pod_info.pod);

        self.requested.add(&resource);
        self.non_zero_requested.milli_cpu += non0_cpu;
        self.non_zero_requested.memory += non0_mem;
        for (name, quantity) in resource.scalar_resources.iter() {
            *self
                .non_zero_requested
                .scalar_resources
                .entry(name.clone())
                .or_insert(0) += quantity;
        }

        self.available.milli_cpu -= non0_cpu;
        self.available.memory -= non0_mem;
        for (name, quantity) in resource.scalar_resources.iter() {
            *self
                .available
                .scalar_resources
                .entry(name.clone())
                .or_insert(0) -= quantity;
        }

        if pod_info.has_affinity() {
            self.pods_with_affinity.push(Rc::clone(&pod_info));
        }
        if pod_info.has_required_anti_affinity() {
            self.pods_with_required_anti_affinity.push(Rc::clone(&pod_info));
        }
        self.pods.push(pod_info);
        self.generation = next_generation();
    }

    /// Subtracts the pod's bookkeeping and drops it from the pod lists.
    /// A pod that is not tracked here fails with `PodNotFound` and leaves
    /// every field untouched.
    pub fn remove_pod(&mut self, pod: &Pod) -> Result<(), NodeInfoError> {
        let key = get_pod_key(pod).map_err(NodeInfoError::MissingPodKey)?;

        let Some(index) = self.position_of(&key) else {
            return Err(NodeInfoError::PodNotFound {
                pod: pod.metadata.name.clone(),
                node: self.node_name().to_string(),
            });
        };

        remove_from_slice(&mut self.pods_with_affinity, &key);
        remove_from_slice(&mut self.pods_with_required_anti_affinity, &key);
        self.pods.swap_remove(index);

        let (resource, non0_cpu, non0_mem) = calculate_resource(pod);
        self.requested.sub(&resource);
        self.non_zero_requested.milli_cpu -= non0_cpu;
        self.non_zero_requested.memory -= non0_mem;
        for (name, quantity) in resource.scalar_resources.iter() {
            *self
                .non_zero_requested
                .scalar_resources
                .entry(name.clone())
                .or_insert(0) -= quantity;
        }
        self.available.milli_cpu += non0_cpu;
        self.available.memory += non0_mem;
        for (name, quantity) in resource.scalar_resources.iter() {
            *self
                .available
                .scalar_resources
                .entry(name.clone())
                .or_insert(0) += quantity;
        }

        self.generation = next_generation();
        Ok(())
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.pods.iter().position(|info| {
            match get_pod_key(&info.pod) {
                Ok(k) => k == key,
                Err(err) => {
                    error!("cannot get pod key on node {}: {}", self.node_name(), err);
                    false
                }
            }
        })
    }

    /// Shallow copy of the pod lists, deep copy of the resource vectors.
    pub fn clone_info(&self) -> NodeInfo {
        NodeInfo {
            node: self.node.clone(),
            pods: self.pods.clone(),
            pods_with_affinity: self.pods_with_affinity.clone(),
            pods_with_required_anti_affinity: self.pods_with_required_anti_affinity.clone(),
            requested: self.requested.clone(),
            non_zero_requested: self.non_zero_requested.clone(),
            allocatable: self.allocatable.clone(),
            available: self.available.clone(),
            generation: self.generation,
        }
    }

    /// Keeps pods whose node name differs from this node, plus pods that are
    /// on this node and also tracked in `pods`. Used so that what-if
    /// simulations never double-count a pod removed from the snapshot.
    pub fn filter_out_pods(&self, pods: &[Pod]) -> Vec<Pod> {
        let Some(node) = self.node.as_ref() else {
            return pods.to_vec();
        };
        let mut filtered = Vec::with_capacity(pods.len());
        for pod in pods.iter() {
            if pod.spec.node_name != node.metadata.name {
                filtered.push(pod.clone());
                continue;
            }
            let Ok(key) = get_pod_key(pod) else {
                continue;
            };
            if self.position_of(&key).is_some() {
                filtered.push(pod.clone());
            }
        }
        filtered
    }
}

fn remove_from_slice(pods: &mut Vec<Rc<PodInfo>>, key: &str) {
    if let Some(index) = pods
        .iter()
        .position(|info| get_pod_key(&info.pod).as_deref() == Ok(key))
    {
        pods.swap_remove(index);
    }
}

/// Available memory quantized to whole MiB, the unit of the ratio metrics.
fn available_mib(resource: &Resource) -> i64 {
    resource.memory / MIB
}

/// Millicores per MiB of available memory. A node with no whole MiB left
/// reports the large sentinel; a node with no cpu left reports zero.
pub fn get_cpu_memory_ratio(node_info: &NodeInfo) -> f64 {
    let mib = available_mib(&node_info.available);
    if mib == 0 {
        return RATIO_NO_MEMORY_SENTINEL;
    }
    if node_info.available.milli_cpu == 0 {
        return 0.0;
    }
    node_info.available.milli_cpu as f64 / mib as f64
}

/// Cluster-wide ratio: total available millicores over total available MiB.
pub fn get_pivot_ratio(node_infos: &[NodeInfo]) -> f64 {
    let mut total_cpu = 0i64;
    let mut total_mem = 0i64;
    for node_info in node_infos.iter() {
        total_cpu += node_info.available.milli_cpu;
        total_mem += node_info.available.memory;
    }
    let mib = total_mem / MIB;
    if mib == 0 {
        return RATIO_NO_MEMORY_SENTINEL;
    }
    total_cpu as f64 / mib as f64
}

pub fn get_distance_from_pivot(node_info: &NodeInfo, pivot_ratio: f64) -> f64 {
    (pivot_ratio - get_cpu_memory_ratio(node_info)).abs()
}

/// Fragmentation entropy: the sum of each node's distance from the pivot.
/// Lower is better.
pub fn get_system_entropy(node_infos: &[NodeInfo]) -> f64 {
    let pivot_ratio = get_pivot_ratio(node_infos);
    node_infos
        .iter()
        .map(|node_info| (pivot_ratio - get_cpu_memory_ratio(node_info)).abs())
        .sum()
}

pub fn sort_nodes_based_on_ratio(node_infos: &mut [NodeInfo]) {
    node_infos.sort_by(|a, b| {
        get_cpu_memory_ratio(a)
            .total_cmp(&get_cpu_memory_ratio(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::Node;
    use crate::core::pod::Pod;

    fn make_node(name: &str, cpu: &str, memory: &str) -> Node {
        serde_yaml::from_str(&format!(
            r#"
            metadata: {{ name: {} }}
            status:
              allocatable: {{ cpu: {:?}, memory: {:?} }}
            "#,
            name, cpu, memory
        ))
        .unwrap()
    }

    fn make_pod(name: &str, cpu: &str, memory: &str) -> Pod {
        serde_yaml::from_str(&format!(
            r#"
            metadata: {{ name: {}, namespace: default }}
            spec:
              containers:
              - name: main
                resources: {{ requests: {{ cpu: {:?}, memory: {:?} }} }}
            "#,
            name, cpu, memory
        ))
        .unwrap()
    }

    fn populated_node_info() -> NodeInfo {
        let mut node_info = NodeInfo::new();
        node_info.set_node(make_node("node-1", "2000m", "4096Mi"));
        node_info.add_pod(make_pod("a", "500m", "1024Mi"));
        node_info.add_pod(make_pod("b", "300m", "512Mi"));
        node_info
    }

    #[test]
    fn test_available_plus_requested_equals_allocatable() {
        let node_info = populated_node_info();
        assert_eq!(
            node_info.allocatable.milli_cpu,
            node_info.available.milli_cpu + node_info.non_zero_requested.milli_cpu
        );
        assert_eq!(
            node_info.allocatable.memory,
            node_info.available.memory + node_info.non_zero_requested.memory
        );
    }

    #[test]
    fn test_remove_pod_restores_vectors() {
        let mut node_info = populated_node_info();
        let before_available = node_info.available.clone();
        let extra = make_pod("extra", "700m", "256Mi");
        node_info.add_pod(extra.clone());
        node_info.remove_pod(&extra).unwrap();
        assert_eq!(before_available, node_info.available);
        assert_eq!(2, node_info.pods.len());
    }

    #[test]
    fn test_remove_missing_pod_is_not_found_and_mutates_nothing() {
        let mut node_info = populated_node_info();
        let generation = node_info.generation;
        let requested = node_info.requested.clone();
        let stranger = make_pod("stranger", "100m", "64Mi");
        let err = node_info.remove_pod(&stranger).unwrap_err();
        assert_eq!(
            NodeInfoError::PodNotFound {
                pod: "stranger".to_string(),
                node: "node-1".to_string()
            },
            err
        );
        assert_eq!(generation, node_info.generation);
        assert_eq!(requested, node_info.requested);
    }

    #[test]
    fn test_clone_is_isolated_from_the_original() {
        let node_info = populated_node_info();
        let mut clone = node_info.clone_info();
        clone.add_pod(make_pod("clone-only", "100m", "128Mi"));
        assert_eq!(2, node_info.pods.len());
        assert_eq!(3, clone.pods.len());
        assert_ne!(node_info.available, clone.available);
    }

    #[test]
    fn test_generation_is_monotonic_across_node_infos() {
        let first = NodeInfo::new();
        let second = NodeInfo::new();
        assert!(second.generation > first.generation);
    }

    #[test]
    fn test_affinity_subsets_track_membership() {
        let mut node_info = NodeInfo::new();
        node_info.set_node(make_node("node-1", "2000m", "4096Mi"));
        let clingy: Pod = serde_yaml::from_str(
            r#"
            metadata: { name: clingy, namespace: default }
            spec:
              affinity:
                podAffinity:
                  requiredDuringSchedulingIgnoredDuringExecution:
                  - topologyKey: kubernetes.io/hostname
                    labelSelector: { matchLabels: { app: web } }
              containers:
              - name: main
                resources: { requests: { cpu: 100m, memory: 64Mi } }
            "#,
        )
        .unwrap();
        node_info.add_pod(clingy.clone());
        assert_eq!(1, node_info.pods_with_affinity.len());
        node_info.remove_pod(&clingy).unwrap();
        assert!(node_info.pods_with_affinity.is_empty());
        assert!(node_info.pods.is_empty());
    }

    #[test]
    fn test_ratio_edge_cases() {
        let mut starved = NodeInfo::new();
        starved.set_node(make_node("starved", "1000m", "512Ki"));
        assert_eq!(RATIO_NO_MEMORY_SENTINEL, get_cpu_memory_ratio(&starved));

        let mut cpu_less = NodeInfo::new();
        cpu_less.set_node(make_node("cpu-less", "0m", "1024Mi"));
        assert_eq!(0.0, get_cpu_memory_ratio(&cpu_less));
    }

    #[test]
    fn test_entropy_and_pivot() {
        let mut left = NodeInfo::new();
        left.set_node(make_node("left", "300m", "1024Mi"));
        let mut right = NodeInfo::new();
        right.set_node(make_node("right", "900m", "1024Mi"));
        let nodes = vec![left, right];

        let pivot = get_pivot_ratio(&nodes);
        assert!((pivot - 1200.0 / 2048.0).abs() < 1e-9);

        let entropy = get_system_entropy(&nodes);
        let expected = (pivot - 300.0 / 1024.0).abs() + (pivot - 900.0 / 1024.0).abs();
        assert!((entropy - expected).abs() < 1e-9);
    }

    #[test]
    fn test_filter_out_pods() {
        let node_info = populated_node_info();
        let tracked = make_pod("a", "500m", "1024Mi");
        let mut on_node_untracked = make_pod("ghost", "100m", "64Mi");
        on_node_untracked.spec.node_name = "node-1".to_string();
        let mut elsewhere = make_pod("other", "100m", "64Mi");
        elsewhere.spec.node_name = "node-2".to_string();

        let mut on_node_tracked = tracked.clone();
        on_node_tracked.spec.node_name = "node-1".to_string();

        let filtered = node_info.filter_out_pods(&[
            on_node_tracked.clone(),
            on_node_untracked,
            elsewhere.clone(),
        ]);
        let names: Vec<&str> = filtered.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(vec!["a", "other"], names);
    }
}
