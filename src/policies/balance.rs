//! Balance policy: reduces fragmentation entropy by swapping pod pairs
//! between nodes on opposite sides of the cluster pivot ratio.

use std::rc::Rc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::client::interface::{CancelToken, ClientError, ClusterClient};
use crate::config::{validate_balance_params, StrategyParameters, DEFAULT_BALANCE_ITERATIONS};
use crate::core::node_info::{
    get_cpu_memory_ratio, get_distance_from_pivot, get_pivot_ratio, get_system_entropy,
    sort_nodes_based_on_ratio, NodeInfo,
};
use crate::core::node::Node;
use crate::core::pod_info::{sort_pods_based_on_cpu, sort_pods_based_on_memory, PodInfo};
use crate::core::policy::MigrationPolicy;
use crate::core::resources::calculate_resource;
use crate::core::snapshot::{get_system_snapshot, log_usage};
use crate::scheduler::migration::MigrationExecutor;

/// Strategy entry point: validates parameters and runs the balance loop with
/// the configured iteration cap.
pub fn balance_pods_for_defragmentation(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    params: &StrategyParameters,
    nodes: &[Node],
    policy: &MigrationPolicy,
    settle_interval: Duration,
) {
    if let Err(err) = validate_balance_params(params) {
        error!("invalid balance parameters: {}", err);
        return;
    }
    info!("trying to balance the cpu/memory consumption across nodes");

    let mut policy = policy.clone();
    if let Some(threshold) = params.threshold_priority {
        policy.critical_priority_threshold = threshold;
    }

    let iterations = params.effective_iterations(DEFAULT_BALANCE_ITERATIONS);
    if let Err(err) = balance_policy(client, cancel, nodes, &policy, iterations, settle_interval) {
        error!("balance the cpu/memory consumption across nodes: {}", err);
    }
}

/// Outer loop: one `balance_workload` pass per iteration against a fresh
/// snapshot, until the iteration cap is reached or every node sits on the
/// same side of the pivot.
pub fn balance_policy(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    nodes: &[Node],
    policy: &MigrationPolicy,
    iterations: i32,
    settle_interval: Duration,
) -> Result<(), ClientError> {
    let mut snapshot = get_system_snapshot(client, cancel, nodes);
    // The convergence pivot is fixed at loop entry; swaps then walk node
    // ratios across it until every node sits on one side.
    let pivot_ratio = get_pivot_ratio(&snapshot);
    let entropy_at_start = get_system_entropy(&snapshot);
    log_usage(&snapshot);
    info!("system entropy before balancing: {:.6}", entropy_at_start);

    let mut current_iteration = 0;
    while current_iteration < iterations {
        cancel.check()?;
        if is_scheduling_done(&snapshot, pivot_ratio) {
            info!("all nodes are on one side of the pivot ratio, no more balancing possible");
            break;
        }
        info!("this is iteration {}", current_iteration + 1);

        match balance_workload(client, cancel, nodes, policy) {
            Ok(true) => thread::sleep(settle_interval),
            Ok(false) => {}
            Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
            Err(err) => warn!("failed to balance workload: {}", err),
        }

        snapshot = get_system_snapshot(client, cancel, nodes);
        log_usage(&snapshot);
        info!(
            "system entropy after iteration {}: {:.6}",
            current_iteration + 1,
            get_system_entropy(&snapshot)
        );
        current_iteration += 1;
    }

    Ok(())
}

/// One balancing pass: walk node pairs from the two ends of the ratio-sorted
/// snapshot, probe pod pairs on a deep-cloned snapshot, and apply at most one
/// entropy-reducing swap.
pub fn balance_workload(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    nodes: &[Node],
    policy: &MigrationPolicy,
) -> Result<bool, ClientError> {
    let mut node_infos = get_system_snapshot(client, cancel, nodes);
    if node_infos.len() < 2 {
        return Ok(false);
    }

    let pivot_ratio = get_pivot_ratio(&node_infos);
    let entropy_before = get_system_entropy(&node_infos);
    sort_nodes_based_on_ratio(&mut node_infos);

    let mut left = 0usize;
    let mut right = node_infos.len() - 1;
    info!(
        "left ratio:{:.6} right ratio:{:.6} pivot ratio:{:.6}",
        get_cpu_memory_ratio(&node_infos[left]),
        get_cpu_memory_ratio(&node_infos[right]),
        pivot_ratio
    );

    let mut accepted: Option<(Rc<PodInfo>, Rc<PodInfo>, Vec<NodeInfo>)> = None;
    // The pair search is O(N * M^2) in the worst case; the step budget keeps
    // index resets from walking the same pairs forever.
    let mut steps = node_infos.len() * node_infos.len() + 2;

    while left < right
        && get_cpu_memory_ratio(&node_infos[left]) < pivot_ratio
        && get_cpu_memory_ratio(&node_infos[right]) > pivot_ratio
    {
        if steps == 0 {
            break;
        }
        steps -= 1;

        let left_distance = get_distance_from_pivot(&node_infos[left], pivot_ratio);
        let right_distance = get_distance_from_pivot(&node_infos[right], pivot_ratio);

        // The left node is memory-rich and cpu-poor: its cheapest cpu pods
        // go first. Mirror logic on the right for memory.
        let cpu_pods = sort_pods_based_on_cpu(&node_infos[left].pods);
        let mem_pods = sort_pods_based_on_memory(&node_infos[right].pods);

        let mut left_pod = 0usize;
        let mut right_pod = 0usize;
        while left_pod < cpu_pods.len() && right_pod < mem_pods.len() {
            if !policy.is_migratable(&cpu_pods[left_pod]) {
                left_pod += 1;
                continue;
            }
            if !policy.is_migratable(&mem_pods[right_pod]) {
                right_pod += 1;
                continue;
            }

            let mut trial: Vec<NodeInfo> = node_infos.iter().map(|n| n.clone_info()).collect();
            if swap_if_possible(&mut trial, left, right, &cpu_pods[left_pod], &mem_pods[right_pod]) {
                accepted = Some((
                    Rc::clone(&cpu_pods[left_pod]),
                    Rc::clone(&mem_pods[right_pod]),
                    trial,
                ));
                break;
            }

            // Advance on whichever side is currently farther from the pivot.
            if left_distance < right_distance {
                if left_pod < cpu_pods.len() - 1 {
                    left_pod += 1;
                } else {
                    left_pod = 0;
                    right_pod += 1;
                }
            } else if right_pod < mem_pods.len() - 1 {
                right_pod += 1;
            } else {
                right_pod = 0;
                left_pod += 1;
            }
        }

        if accepted.is_some() {
            break;
        }

        if left_distance < right_distance {
            if left + 1 < right && get_cpu_memory_ratio(&node_infos[left + 1]) < pivot_ratio {
                left += 1;
            } else if right > 0 {
                left = 0;
                right -= 1;
            } else {
                break;
            }
        } else if right > left + 1 && get_cpu_memory_ratio(&node_infos[right - 1]) > pivot_ratio {
            right -= 1;
        } else {
            right = node_infos.len() - 1;
            left += 1;
        }
    }

    let Some((pod_a, pod_b, trial)) = accepted else {
        return Ok(false);
    };

    let node_a = node_infos[left]
        .node()
        .expect("snapshot nodes always carry the node object")
        .clone();
    let node_b = node_infos[right]
        .node()
        .expect("snapshot nodes always carry the node object")
        .clone();

    let executor = MigrationExecutor::new(client, cancel);
    executor.swap_pods(&pod_a.pod, &node_a, &pod_b.pod, &node_b)?;
    info!(
        "swapped pod {}/{} on node {} with pod {}/{} on node {}, entropy {:.6} -> {:.6}",
        pod_a.pod.metadata.namespace,
        pod_a.pod.metadata.name,
        node_a.metadata.name,
        pod_b.pod.metadata.namespace,
        pod_b.pod.metadata.name,
        node_b.metadata.name,
        entropy_before,
        get_system_entropy(&trial),
    );
    Ok(true)
}

/// All nodes strictly on one side of the pivot: no swap along the
/// cpu/memory axis can improve entropy any further.
pub fn is_scheduling_done(node_infos: &[NodeInfo], pivot_ratio: f64) -> bool {
    let mut positive = 0usize;
    let mut negative = 0usize;
    for node_info in node_infos.iter() {
        let delta = pivot_ratio - get_cpu_memory_ratio(node_info);
        if delta > 0.0 {
            positive += 1;
        } else if delta < 0.0 {
            negative += 1;
        }
    }
    positive == node_infos.len() || negative == node_infos.len()
}

/// Probes one swap on the trial snapshot. Accepted only when both pods have
/// identical scalar footprints and the post-swap entropy is strictly lower.
/// On rejection the caller discards the trial, so the live snapshot is never
/// touched.
pub fn swap_if_possible(
    trial: &mut [NodeInfo],
    left: usize,
    right: usize,
    pod_a: &Rc<PodInfo>,
    pod_b: &Rc<PodInfo>,
) -> bool {
    let (res_a, _, _) = calculate_resource(&pod_a.pod);
    let (res_b, _, _) = calculate_resource(&pod_b.pod);
    // Exact scalar parity: same key set, same quantities, both directions.
    if res_a.scalar_resources != res_b.scalar_resources {
        return false;
    }

    let entropy_before = get_system_entropy(trial);

    if trial[left].remove_pod(&pod_a.pod).is_err() {
        return false;
    }
    if trial[right].remove_pod(&pod_b.pod).is_err() {
        return false;
    }
    trial[left].add_pod_info(Rc::clone(pod_b));
    trial[right].add_pod_info(Rc::clone(pod_a));

    get_system_entropy(trial) < entropy_before
}
