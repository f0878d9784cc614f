//! Place policy: finds hosts for pending pods, executing the planner's
//! migrations through the orchestrator.

use std::collections::HashMap;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use log::{error, info};
use thiserror::Error;

use crate::client::interface::{CancelToken, ClientError, ClusterClient, PodListOptions};
use crate::config::{validate_place_params, StrategyParameters, DEFAULT_PLACE_ITERATIONS};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::pod_info::PodInfo;
use crate::core::policy::{is_pending_pod, MigrationPolicy};
use crate::core::snapshot::{get_system_snapshot, log_usage};
use crate::scheduler::migration::MigrationExecutor;
use crate::scheduler::placement::{PlaceError, PlacementPlan, PlacementPlanner};

#[derive(Debug, Error)]
pub enum PlaceFailure {
    #[error("place pod failed")]
    Infeasible,
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Strategy entry point: validates parameters and runs the pending-pod loop
/// with the configured iteration cap.
pub fn place_pods_for_defragmentation(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    params: &StrategyParameters,
    nodes: &[Node],
    policy: &MigrationPolicy,
    settle_interval: Duration,
) {
    if let Err(err) = validate_place_params(params) {
        error!("invalid place parameters: {}", err);
        return;
    }
    info!("trying to place pending pods across nodes");

    let mut policy = policy.clone();
    if let Some(threshold) = params.threshold_priority {
        policy.critical_priority_threshold = threshold;
    }

    let iterations = params.effective_iterations(DEFAULT_PLACE_ITERATIONS);
    if let Err(err) =
        place_policy(client, cancel, params, nodes, &policy, iterations, settle_interval)
    {
        error!("place pending pods across nodes: {}", err);
    }
}

/// Each round: list the pending placeable pods, take the lowest-priority
/// oldest one, plan and execute its placement, settle, re-snapshot. Stops
/// early once no pending pod remains.
pub fn place_policy(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    params: &StrategyParameters,
    nodes: &[Node],
    policy: &MigrationPolicy,
    iterations: i32,
    settle_interval: Duration,
) -> Result<(), ClientError> {
    let options = PodListOptions {
        include_namespaces: params.include_namespaces(),
        exclude_namespaces: params.exclude_namespaces(),
        label_selector: params.label_selector.clone(),
    };

    let mut snapshot = get_system_snapshot(client, cancel, nodes);
    let mut current_iteration = 0;
    while current_iteration < iterations {
        cancel.check()?;
        let pods = client.list_pods(cancel, &options)?;
        let mut pending: Vec<Pod> = pods
            .into_iter()
            .filter(|pod| is_pending_pod(pod) && policy.is_placeable(pod))
            .collect();
        if pending.is_empty() {
            info!("no pending pod");
            break;
        }
        pending.sort_by(|a, b| {
            let priority_a = a.spec.priority.unwrap_or(0);
            let priority_b = b.spec.priority.unwrap_or(0);
            priority_a
                .cmp(&priority_b)
                .then_with(|| a.metadata.creation_timestamp.cmp(&b.metadata.creation_timestamp))
        });

        log_usage(&snapshot);
        let pod_info = Rc::new(PodInfo::new(pending.remove(0)));
        match place_workload(client, cancel, &pod_info, &mut snapshot, policy) {
            Ok(_) => {}
            Err(PlaceFailure::Client(ClientError::Cancelled)) => {
                return Err(ClientError::Cancelled)
            }
            Err(err) => error!(
                "place {}/{}: {}",
                pod_info.pod.metadata.namespace, pod_info.pod.metadata.name, err
            ),
        }

        thread::sleep(settle_interval);
        snapshot = get_system_snapshot(client, cancel, nodes);
        log_usage(&snapshot);
        current_iteration += 1;
    }

    Ok(())
}

/// Plans a placement for one pod and executes the planned migrations in
/// order. No orchestrator write happens when planning fails.
pub fn place_workload(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    pod_info: &Rc<PodInfo>,
    snapshot: &mut Vec<NodeInfo>,
    policy: &MigrationPolicy,
) -> Result<PlacementPlan, PlaceFailure> {
    info!(
        "start to place pending pod {}/{}",
        pod_info.pod.metadata.namespace, pod_info.pod.metadata.name
    );

    let nodes_by_name: HashMap<String, Node> = snapshot
        .iter()
        .filter_map(|node_info| node_info.node().cloned())
        .map(|node| (node.metadata.name.clone(), node))
        .collect();

    let planner = PlacementPlanner::new(policy);
    let plan = planner.place_pod(pod_info, snapshot).map_err(|err| match err {
        PlaceError::Infeasible => PlaceFailure::Infeasible,
    })?;

    let executor = MigrationExecutor::new(client, cancel);
    for migration in plan.migrations.iter() {
        let from = migration
            .from_node
            .as_ref()
            .and_then(|name| nodes_by_name.get(name));
        let to = migration
            .to_node
            .as_ref()
            .and_then(|name| nodes_by_name.get(name));
        info!(
            "migrate pod {}/{} from {:?} to {:?}",
            migration.pod_info.pod.metadata.namespace,
            migration.pod_info.pod.metadata.name,
            migration.from_node,
            migration.to_node
        );
        executor.migrate_pod(&migration.pod_info.pod, from, to, false)?;
    }

    info!(
        "placed pod {}/{} onto node {}",
        pod_info.pod.metadata.namespace, pod_info.pod.metadata.name, plan.target
    );
    Ok(plan)
}
