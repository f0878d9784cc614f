use std::rc::Rc;
use std::time::Duration;

use kube_defrag::client::interface::CancelToken;
use kube_defrag::core::node_info::{get_pivot_ratio, get_system_entropy, NodeInfo};
use kube_defrag::core::policy::MigrationPolicy;
use kube_defrag::core::snapshot::get_system_snapshot;
use kube_defrag::policies::balance::{
    balance_policy, balance_workload, is_scheduling_done, swap_if_possible,
};
use kube_defrag::test_util::helpers::{
    make_node, make_pod, with_scalar_request, Action, FakeClusterClient,
};

// A cpu-heavy pod on the memory-poor side and a memory-heavy pod on the
// cpu-poor side; swapping them pulls both node ratios toward the pivot.
fn unbalanced_cluster() -> FakeClusterClient {
    let nodes = vec![
        make_node("node-a", "4000m", "8192Mi"),
        make_node("node-b", "4000m", "4096Mi"),
    ];
    let pods = vec![
        make_pod("alpha", "node-a", "1000m", "512Mi"),
        make_pod("beta", "node-b", "400m", "2048Mi"),
    ];
    FakeClusterClient::new(nodes, pods)
}

fn snapshot_of(client: &FakeClusterClient) -> Vec<NodeInfo> {
    let cancel = CancelToken::new();
    let nodes = client.nodes.borrow().clone();
    get_system_snapshot(client, &cancel, &nodes)
}

#[test]
fn test_swap_reduces_entropy_and_runs_two_migrations() {
    let client = unbalanced_cluster();
    let nodes = client.nodes.borrow().clone();
    let cancel = CancelToken::new();
    let policy = MigrationPolicy::default();

    let swapped = balance_workload(&client, &cancel, &nodes, &policy).unwrap();
    assert!(swapped);

    // Both pods are uncontrolled: each migration is delete-then-recreate.
    let actions = client.recorded_actions();
    let deletes: Vec<&Action> = actions
        .iter()
        .filter(|a| matches!(a, Action::DeletePod { .. }))
        .collect();
    let creates: Vec<&Action> = actions
        .iter()
        .filter(|a| matches!(a, Action::CreatePod { .. }))
        .collect();
    assert_eq!(2, deletes.len());
    assert_eq!(2, creates.len());

    // The recreated pods carry a preferred-affinity bias toward the other
    // node and cleared scheduler fields.
    let pods = client.pods.borrow();
    let alpha = pods.iter().find(|p| p.metadata.name == "alpha").unwrap();
    assert!(alpha.spec.node_name.is_empty());
    assert!(alpha.metadata.uid.is_empty());
    let preferred = &alpha
        .spec
        .affinity
        .as_ref()
        .unwrap()
        .node_affinity
        .as_ref()
        .unwrap()
        .preferred_during_scheduling_ignored_during_execution;
    assert_eq!(
        vec!["node-b".to_string()],
        preferred[0].preference.match_expressions[0].values
    );
}

#[test]
fn test_swap_if_possible_accepts_only_strict_entropy_reduction() {
    let client = unbalanced_cluster();
    let snapshot = snapshot_of(&client);
    let entropy_before = get_system_entropy(&snapshot);

    let alpha = Rc::clone(&snapshot[0].pods[0]);
    let beta = Rc::clone(&snapshot[1].pods[0]);

    let mut trial: Vec<NodeInfo> = snapshot.iter().map(|n| n.clone_info()).collect();
    assert!(swap_if_possible(&mut trial, 0, 1, &alpha, &beta));
    assert!(get_system_entropy(&trial) < entropy_before);

    // The probed copy changed; the live snapshot did not.
    assert_eq!(entropy_before, get_system_entropy(&snapshot));
    assert_eq!("alpha", snapshot[0].pods[0].pod.metadata.name);
}

// Identical nodes hosting identical pods: a swap cannot strictly reduce
// entropy, so nothing happens.
#[test]
fn test_symmetric_cluster_swaps_nothing() {
    let nodes = vec![
        make_node("node-a", "4000m", "8192Mi"),
        make_node("node-b", "4000m", "8192Mi"),
    ];
    let pods = vec![
        make_pod("alpha", "node-a", "1000m", "512Mi"),
        make_pod("beta", "node-b", "1000m", "512Mi"),
    ];
    let client = FakeClusterClient::new(nodes.clone(), pods);
    let cancel = CancelToken::new();
    let policy = MigrationPolicy::default();

    let swapped = balance_workload(&client, &cancel, &nodes, &policy).unwrap();
    assert!(!swapped);
    assert!(client.recorded_actions().is_empty());

    // A directly probed swap is rejected (no strict entropy reduction) and
    // the live snapshot stays bit-identical.
    let snapshot = snapshot_of(&client);
    let alpha = Rc::clone(&snapshot[0].pods[0]);
    let beta = Rc::clone(&snapshot[1].pods[0]);
    let entropy_before = get_system_entropy(&snapshot);
    let mut trial: Vec<NodeInfo> = snapshot.iter().map(|n| n.clone_info()).collect();
    assert!(!swap_if_possible(&mut trial, 0, 1, &alpha, &beta));
    assert_eq!(entropy_before, get_system_entropy(&snapshot));
    assert_eq!(snapshot[0].available, snapshot_of(&client)[0].available);
}

// Scalar footprints must match exactly: a gpu on one side blocks the swap.
#[test]
fn test_swap_skipped_on_scalar_mismatch() {
    let nodes = vec![
        make_node("node-a", "4000m", "8192Mi"),
        make_node("node-b", "4000m", "4096Mi"),
    ];
    let pods = vec![
        with_scalar_request(
            make_pod("alpha", "node-a", "1000m", "512Mi"),
            "example.com/gpu",
            1,
        ),
        make_pod("beta", "node-b", "400m", "2048Mi"),
    ];
    let client = FakeClusterClient::new(nodes.clone(), pods);
    let cancel = CancelToken::new();
    let policy = MigrationPolicy::default();

    let swapped = balance_workload(&client, &cancel, &nodes, &policy).unwrap();
    assert!(!swapped);
    assert!(client.recorded_actions().is_empty());
}

#[test]
fn test_scheduling_done_when_all_nodes_share_a_side() {
    let client = unbalanced_cluster();
    let snapshot = snapshot_of(&client);
    let pivot = get_pivot_ratio(&snapshot);
    assert!(!is_scheduling_done(&snapshot, pivot));

    // Two empty nodes with the same shape sit on the same side of any pivot
    // computed against a skewed reference.
    let nodes = vec![
        make_node("node-a", "4000m", "1024Mi"),
        make_node("node-b", "4000m", "1024Mi"),
    ];
    let client = FakeClusterClient::new(nodes, vec![]);
    let snapshot = snapshot_of(&client);
    assert!(is_scheduling_done(&snapshot, 1.0));
}

// Equal node ratios leave no pair straddling the pivot: the policy loop
// mutates nothing across its iterations.
#[test]
fn test_balance_policy_noop_after_convergence() {
    let nodes = vec![
        make_node("node-a", "2000m", "4096Mi"),
        make_node("node-b", "2000m", "4096Mi"),
    ];
    let pods = vec![
        make_pod("alpha", "node-a", "500m", "512Mi"),
        make_pod("beta", "node-b", "500m", "512Mi"),
    ];
    let client = FakeClusterClient::new(nodes.clone(), pods);
    let cancel = CancelToken::new();
    let policy = MigrationPolicy::default();

    balance_policy(
        &client,
        &cancel,
        &nodes,
        &policy,
        3,
        Duration::from_millis(0),
    )
    .unwrap();
    assert!(client.recorded_actions().is_empty());
}
