//! Placement planner: finds a host for a pod that does not fit anywhere,
//! displacing smaller pods when needed. The planner is pure: it simulates
//! every move on the snapshot and records the migrations for the executor to
//! carry out in order.

use std::collections::HashSet;
use std::rc::Rc;

use log::{debug, info};

use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::pod_info::{get_pod_key, PodInfo};
use crate::core::policy::MigrationPolicy;
use crate::core::resources::{calculate_resource, Resource, MIB};
use crate::scheduler::cantor;
use crate::scheduler::predicates::{pod_fits_any_other_node, pod_fits_current_node};

/// One move the executor must perform. `from_node` is empty for a pending
/// pod that was never bound; `to_node` is empty for a displaced pod with no
/// feasible host of its own, whose eviction leaves rebinding to the cluster
/// scheduler.
#[derive(Debug, Clone)]
pub struct PlannedMigration {
    pub pod_info: Rc<PodInfo>,
    pub from_node: Option<String>,
    pub to_node: Option<String>,
}

/// The ordered migrations that make the placed pod fit on `target`; the
/// placed pod's own move is always last.
#[derive(Debug, Clone)]
pub struct PlacementPlan {
    pub migrations: Vec<PlannedMigration>,
    pub target: String,
}

#[derive(Debug, PartialEq)]
pub enum PlaceError {
    Infeasible,
}

pub struct PlacementPlanner<'a> {
    policy: &'a MigrationPolicy,
}

impl<'a> PlacementPlanner<'a> {
    pub fn new(policy: &'a MigrationPolicy) -> PlacementPlanner<'a> {
        PlacementPlanner { policy }
    }

    /// Two-pass cascade: single-pod displacement first, the multi-pod
    /// fallback second. On success the snapshot reflects all planned moves;
    /// on failure it is left untouched.
    pub fn place_pod(
        &self,
        pending: &Rc<PodInfo>,
        snapshot: &mut Vec<NodeInfo>,
    ) -> Result<PlacementPlan, PlaceError> {
        // Recursion is bounded by the number of pods in the snapshot; the
        // in-flight set breaks displacement cycles.
        let budget = snapshot.iter().map(|n| n.pods.len()).sum::<usize>().max(1);

        for multi in [false, true] {
            let mut work: Vec<NodeInfo> = snapshot.iter().map(|n| n.clone_info()).collect();
            let mut plan: Vec<PlannedMigration> = vec![];
            let mut in_flight: HashSet<String> = HashSet::new();
            if let Ok(key) = get_pod_key(&pending.pod) {
                in_flight.insert(key);
            }

            let placed = if multi {
                self.place_capacity_with_multiple_migration(
                    pending,
                    &mut work,
                    &mut in_flight,
                    &mut plan,
                    budget,
                )
            } else {
                self.place_capacity(pending, &mut work, &mut in_flight, &mut plan, budget)
            };

            if placed {
                let target = plan
                    .last()
                    .and_then(|m| m.to_node.clone())
                    .expect("a successful placement ends with the placed pod's own move");
                for migration in plan.iter() {
                    info!(
                        "planned migration of pod {}/{} from {:?} to {:?}",
                        migration.pod_info.pod.metadata.namespace,
                        migration.pod_info.pod.metadata.name,
                        migration.from_node,
                        migration.to_node,
                    );
                }
                *snapshot = work;
                return Ok(PlacementPlan {
                    migrations: plan,
                    target,
                });
            }
        }

        Err(PlaceError::Infeasible)
    }

    /// Single-pod displacement search: direct placement if some node already
    /// fits, otherwise displace the smallest covering pod from the best
    /// candidate and recursively re-place it.
    fn place_capacity(
        &self,
        pod_info: &Rc<PodInfo>,
        work: &mut Vec<NodeInfo>,
        in_flight: &mut HashSet<String>,
        plan: &mut Vec<PlannedMigration>,
        depth: usize,
    ) -> bool {
        if depth == 0 || !check_placement_eligibility(&pod_info.pod, work) {
            return false;
        }

        if let Some(to_index) = compute_normal_placement(&pod_info.pod, work) {
            apply_move(pod_info, work, plan, to_index);
            return true;
        }

        for candidate in compute_placement_priority(&pod_info.pod, work) {
            if candidate == pod_info.pod.spec.node_name {
                continue;
            }
            let Some(index) = work.iter().position(|n| n.node_name() == candidate) else {
                continue;
            };
            let eligible = self.compute_eligible_pods(pod_info, &work[index], in_flight);
            let Some(victim) = compute_minimum_migrateable_pod(eligible) else {
                continue;
            };

            let saved_work: Vec<NodeInfo> = work.iter().map(|n| n.clone_info()).collect();
            let plan_mark = plan.len();
            let victim_key = match get_pod_key(&victim.pod) {
                Ok(key) => key,
                Err(err) => {
                    debug!("skipping victim without key: {}", err);
                    continue;
                }
            };
            in_flight.insert(victim_key.clone());

            if self.place_capacity(&victim, work, in_flight, plan, depth - 1)
                && fits_node(&pod_info.pod, &work[index])
            {
                apply_move(pod_info, work, plan, index);
                return true;
            }

            *work = saved_work;
            plan.truncate(plan_mark);
            in_flight.remove(&victim_key);
        }

        false
    }

    /// Multi-pod fallback: accumulate the smallest set of pods that jointly
    /// cover the candidate's deficit, re-place each of them, then claim the
    /// freed capacity.
    fn place_capacity_with_multiple_migration(
        &self,
        pod_info: &Rc<PodInfo>,
        work: &mut Vec<NodeInfo>,
        in_flight: &mut HashSet<String>,
        plan: &mut Vec<PlannedMigration>,
        depth: usize,
    ) -> bool {
        if depth == 0 || !check_placement_eligibility(&pod_info.pod, work) {
            return false;
        }

        if let Some(to_index) = compute_normal_placement(&pod_info.pod, work) {
            apply_move(pod_info, work, plan, to_index);
            return true;
        }

        for candidate in compute_placement_priority(&pod_info.pod, work) {
            if candidate == pod_info.pod.spec.node_name {
                continue;
            }
            let Some(index) = work.iter().position(|n| n.node_name() == candidate) else {
                continue;
            };
            let pool = self.compute_multiple_eligible_pods(pod_info, &work[index], in_flight);
            let Some(victims) = compute_minimum_migrateable_pods(&pod_info.pod, &pool, &work[index])
            else {
                continue;
            };
            let victims = sort_migrateable_pods(victims);

            let saved_work: Vec<NodeInfo> = work.iter().map(|n| n.clone_info()).collect();
            let plan_mark = plan.len();
            let saved_in_flight = in_flight.clone();
            for victim in victims.iter() {
                if let Ok(key) = get_pod_key(&victim.pod) {
                    in_flight.insert(key);
                }
            }

            // Displacement is best-effort: a victim that cannot be re-placed
            // anywhere is still evicted, and the cluster scheduler rebinds
            // its replacement wherever capacity appears.
            for victim in victims.iter() {
                let placed = self.place_capacity(victim, work, in_flight, plan, depth - 1)
                    || self.place_capacity_with_multiple_migration(
                        victim,
                        work,
                        in_flight,
                        plan,
                        depth - 1,
                    );
                if !placed {
                    apply_eviction(victim, work, plan, index);
                }
            }

            if fits_node(&pod_info.pod, &work[index]) {
                apply_move(pod_info, work, plan, index);
                return true;
            }

            *work = saved_work;
            plan.truncate(plan_mark);
            *in_flight = saved_in_flight;
        }

        false
    }

    /// Pods on the node that individually cover its deficit for the placed
    /// pod while consuming strictly less than it, so displacing one of them
    /// always helps.
    fn compute_eligible_pods(
        &self,
        place: &PodInfo,
        node_info: &NodeInfo,
        in_flight: &HashSet<String>,
    ) -> Vec<Rc<PodInfo>> {
        let Some(node) = node_info.node() else {
            return vec![];
        };
        if !pod_fits_current_node(&place.pod, node) {
            return vec![];
        }

        let (place_res, place_cpu, place_mem) = calculate_resource(&place.pod);
        let diff_cpu = place_cpu - node_info.available.milli_cpu;
        let diff_mem = place_mem - node_info.available.memory;

        let mut eligible = vec![];
        for pod_info in node_info.pods.iter() {
            if get_pod_key(&pod_info.pod)
                .map(|key| in_flight.contains(&key))
                .unwrap_or(true)
            {
                continue;
            }
            if !self.policy.is_migratable(pod_info) {
                continue;
            }
            let (migrate_res, migrate_cpu, migrate_mem) = calculate_resource(&pod_info.pod);
            let mut scalars_ok = true;
            for (name, place_quantity) in place_res.scalar_resources.iter() {
                if !node_info.available.scalar_resources.contains_key(name) {
                    continue;
                }
                let deficit = place_quantity - node_info.available.scalar(name);
                let migrate_quantity = migrate_res.scalar(name);
                if migrate_quantity < deficit || migrate_quantity >= *place_quantity {
                    scalars_ok = false;
                    break;
                }
            }
            if scalars_ok
                && migrate_cpu >= diff_cpu
                && migrate_mem >= diff_mem
                && migrate_cpu < place_cpu
                && migrate_mem < place_mem
            {
                eligible.push(Rc::clone(pod_info));
            }
        }
        eligible
    }

    /// Pods individually smaller than the placed pod on cpu, memory and
    /// every shared scalar resource. Candidates for joint displacement.
    fn compute_multiple_eligible_pods(
        &self,
        place: &PodInfo,
        node_info: &NodeInfo,
        in_flight: &HashSet<String>,
    ) -> Vec<Rc<PodInfo>> {
        let Some(node) = node_info.node() else {
            return vec![];
        };
        if !pod_fits_current_node(&place.pod, node) {
            return vec![];
        }

        let (place_res, place_cpu, place_mem) = calculate_resource(&place.pod);
        let mut eligible = vec![];
        for pod_info in node_info.pods.iter() {
            if get_pod_key(&pod_info.pod)
                .map(|key| in_flight.contains(&key))
                .unwrap_or(true)
            {
                continue;
            }
            if !self.policy.is_migratable(pod_info) {
                continue;
            }
            let (migrate_res, migrate_cpu, migrate_mem) = calculate_resource(&pod_info.pod);
            let scalars_ok = place_res.scalar_resources.iter().all(|(name, place_quantity)| {
                match migrate_res.scalar_resources.get(name) {
                    Some(migrate_quantity) => migrate_quantity < place_quantity,
                    None => true,
                }
            });
            if scalars_ok && migrate_cpu < place_cpu && migrate_mem < place_mem {
                eligible.push(Rc::clone(pod_info));
            }
        }
        eligible
    }
}

/// Cluster-wide feasibility gate: total available cpu, total allocatable
/// memory and every allocatable scalar must cover the pod's request, and at
/// least one other node must pass the fit predicate.
fn check_placement_eligibility(pod: &Pod, work: &[NodeInfo]) -> bool {
    let mut cpu_sum = 0i64;
    let mut memory_sum = 0i64;
    let mut scalar_sums = Resource::default();
    let mut nodes = vec![];
    for node_info in work.iter() {
        cpu_sum += node_info.available.milli_cpu;
        memory_sum += node_info.allocatable.memory;
        for (name, quantity) in node_info.allocatable.scalar_resources.iter() {
            *scalar_sums.scalar_resources.entry(name.clone()).or_insert(0) += quantity;
        }
        if let Some(node) = node_info.node() {
            nodes.push(node);
        }
    }

    let (resource, non0_cpu, non0_mem) = calculate_resource(pod);
    let scalars_available = resource
        .scalar_resources
        .iter()
        .all(|(name, quantity)| scalar_sums.scalar(name) >= *quantity);

    cpu_sum >= non0_cpu
        && memory_sum >= non0_mem
        && scalars_available
        && pod_fits_any_other_node(pod, &nodes)
}

/// First node other than the pod's own that passes the fit predicate and has
/// the request available outright.
fn compute_normal_placement(pod: &Pod, work: &[NodeInfo]) -> Option<usize> {
    for (index, node_info) in work.iter().enumerate() {
        let Some(node) = node_info.node() else {
            continue;
        };
        if node.metadata.name == pod.spec.node_name || !pod_fits_current_node(pod, node) {
            continue;
        }
        if fits_node(pod, node_info) {
            return Some(index);
        }
    }
    None
}

fn fits_node(pod: &Pod, node_info: &NodeInfo) -> bool {
    let (resource, non0_cpu, non0_mem) = calculate_resource(pod);
    let scalars_ok = resource
        .scalar_resources
        .iter()
        .all(|(name, quantity)| node_info.available.scalar(name) >= *quantity);
    non0_cpu <= node_info.available.milli_cpu
        && non0_mem <= node_info.available.memory
        && scalars_ok
}

/// Node names sorted ascending by the Cantor-paired gap score: the smaller
/// the encoded distance between the pod's request and the node's available
/// vector, the better the candidate.
fn compute_placement_priority(pod: &Pod, work: &[NodeInfo]) -> Vec<String> {
    let (resource, non0_cpu, non0_mem) = calculate_resource(pod);
    let mut scored: Vec<(String, i64)> = work
        .iter()
        .map(|node_info| {
            let cpu_gap = (non0_cpu - node_info.available.milli_cpu).abs();
            let mem_gap_mib = (non0_mem - node_info.available.memory).abs() / MIB;
            let mut score = 0i64;
            for (name, quantity) in resource.scalar_resources.iter() {
                let scalar_gap = (quantity - node_info.available.scalar(name)).abs();
                score += cantor::pair(scalar_gap, cpu_gap);
                score += cantor::pair(scalar_gap, mem_gap_mib);
            }
            score += cantor::pair(cpu_gap, mem_gap_mib);
            (node_info.node_name().to_string(), score)
        })
        .collect();
    scored.sort_by(|a, b| a.1.cmp(&b.1));
    scored.into_iter().map(|(name, _)| name).collect()
}

/// The smallest eligible pod by a (scalar..., cpu) lexicographic comparison.
fn compute_minimum_migrateable_pod(mut eligible: Vec<Rc<PodInfo>>) -> Option<Rc<PodInfo>> {
    if eligible.len() <= 1 {
        return eligible.pop();
    }
    eligible.sort_by(|a, b| {
        let (res_a, cpu_a, _) = calculate_resource(&a.pod);
        let (res_b, cpu_b, _) = calculate_resource(&b.pod);
        for (name, quantity_a) in res_a.scalar_resources.iter() {
            if let Some(quantity_b) = res_b.scalar_resources.get(name) {
                if quantity_a != quantity_b {
                    return quantity_a.cmp(quantity_b);
                }
            }
        }
        cpu_a.cmp(&cpu_b)
    });
    eligible.into_iter().next()
}

/// Greedy accumulation in candidate order until the aggregate covers the
/// node's deficit on cpu, memory and every requested scalar. A deficit of
/// exactly zero on one axis keeps accumulating until the pool is exhausted;
/// the exhausted set is returned only when it really covers the deficit.
fn compute_minimum_migrateable_pods(
    place: &Pod,
    pool: &[Rc<PodInfo>],
    node_info: &NodeInfo,
) -> Option<Vec<Rc<PodInfo>>> {
    let (place_res, place_cpu, place_mem) = calculate_resource(place);
    let cpu_diff = place_cpu - node_info.available.milli_cpu;
    let mem_diff = place_mem - node_info.available.memory;

    let scalars_covered = |chosen: &[Rc<PodInfo>]| {
        place_res
            .scalar_resources
            .iter()
            .all(|(name, quantity)| total_scalar(chosen, name) >= *quantity)
    };

    let mut chosen: Vec<Rc<PodInfo>> = vec![];
    for pod_info in pool.iter() {
        chosen.push(Rc::clone(pod_info));
        if !scalars_covered(&chosen) {
            continue;
        }

        let total_cpu = total_cpu_millicores(&chosen);
        let total_mem = total_memory_bytes(&chosen);
        let covered = if cpu_diff > 0 && mem_diff > 0 {
            total_cpu >= cpu_diff && total_mem >= mem_diff
        } else if cpu_diff > 0 && mem_diff < 0 {
            total_cpu >= cpu_diff
        } else if mem_diff > 0 && cpu_diff < 0 {
            total_mem >= mem_diff
        } else {
            false
        };
        if covered {
            return Some(chosen);
        }
    }

    if !chosen.is_empty()
        && scalars_covered(&chosen)
        && total_cpu_millicores(&chosen) >= cpu_diff.max(0)
        && total_memory_bytes(&chosen) >= mem_diff.max(0)
    {
        return Some(chosen);
    }
    None
}

fn total_cpu_millicores(pod_infos: &[Rc<PodInfo>]) -> i64 {
    pod_infos
        .iter()
        .map(|pod_info| calculate_resource(&pod_info.pod).1)
        .sum()
}

fn total_memory_bytes(pod_infos: &[Rc<PodInfo>]) -> i64 {
    pod_infos
        .iter()
        .map(|pod_info| calculate_resource(&pod_info.pod).2)
        .sum()
}

fn total_scalar(pod_infos: &[Rc<PodInfo>], name: &str) -> i64 {
    pod_infos
        .iter()
        .map(|pod_info| calculate_resource(&pod_info.pod).0.scalar(name))
        .sum()
}

/// Stable output order for an accumulated victim set: ascending by the same
/// Cantor-pair key the candidate scoring uses.
fn sort_migrateable_pods(mut pods: Vec<Rc<PodInfo>>) -> Vec<Rc<PodInfo>> {
    pods.sort_by_key(|pod_info| {
        let (resource, cpu, mem) = calculate_resource(&pod_info.pod);
        let mem_mib = (mem / MIB).abs();
        let mut score = 0i64;
        for quantity in resource.scalar_resources.values() {
            score += cantor::pair(quantity.abs(), cpu.abs());
            score += cantor::pair(quantity.abs(), mem_mib);
        }
        score += cantor::pair(cpu.abs(), mem_mib);
        score
    });
    pods
}

/// Simulates the move on the snapshot and records it for the executor.
fn apply_move(
    pod_info: &Rc<PodInfo>,
    work: &mut [NodeInfo],
    plan: &mut Vec<PlannedMigration>,
    to_index: usize,
) {
    let from_name = pod_info.pod.spec.node_name.clone();
    let mut from_node = None;
    if !from_name.is_empty() {
        if let Some(from_index) = work.iter().position(|n| n.node_name() == from_name) {
            match work[from_index].remove_pod(&pod_info.pod) {
                Ok(()) => from_node = Some(from_name),
                Err(err) => debug!(
                    "pod {} not tracked on its node {}: {:?}",
                    pod_info.pod.metadata.name, from_name, err
                ),
            }
        }
    }
    work[to_index].add_pod_info(Rc::clone(pod_info));
    plan.push(PlannedMigration {
        pod_info: Rc::clone(pod_info),
        from_node,
        to_node: Some(work[to_index].node_name().to_string()),
    });
}

/// Simulates a destination-less displacement: the victim leaves the node and
/// its rebinding is left to the cluster scheduler.
fn apply_eviction(
    pod_info: &Rc<PodInfo>,
    work: &mut [NodeInfo],
    plan: &mut Vec<PlannedMigration>,
    from_index: usize,
) {
    match work[from_index].remove_pod(&pod_info.pod) {
        Ok(()) => plan.push(PlannedMigration {
            pod_info: Rc::clone(pod_info),
            from_node: Some(work[from_index].node_name().to_string()),
            to_node: None,
        }),
        Err(err) => debug!(
            "victim {} not tracked on node {}: {:?}",
            pod_info.pod.metadata.name,
            work[from_index].node_name(),
            err
        ),
    }
}
