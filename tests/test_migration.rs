use kube_defrag::client::interface::{CancelToken, ClusterClient, ControllerKind};
use kube_defrag::core::common::{ObjectMeta, OwnerReference, ReplicaSet};
use kube_defrag::scheduler::migration::MigrationExecutor;
use kube_defrag::test_util::helpers::{make_node, make_pod, with_owner, Action, FakeClusterClient};

fn replica_set_owned_by_deployment(name: &str, deployment: &str) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
            owner_references: vec![OwnerReference {
                kind: "Deployment".to_string(),
                name: deployment.to_string(),
                controller: Some(true),
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

// A deployment-managed pod migrates through the deployment's scale
// subresource: +1, delete, -1.
#[test]
fn test_deployment_pod_migrates_through_scale() {
    let node_a = make_node("node-a", "2000m", "4096Mi");
    let node_b = make_node("node-b", "2000m", "4096Mi");
    let pod = with_owner(
        make_pod("web-0", "node-a", "500m", "512Mi"),
        "ReplicaSet",
        "web-rs",
    );
    let client = FakeClusterClient::new(vec![node_a.clone(), node_b.clone()], vec![pod.clone()])
        .with_replica_set(replica_set_owned_by_deployment("web-rs", "web"))
        .with_scale(ControllerKind::Deployment, "default", "web", 3);
    let cancel = CancelToken::new();
    let executor = MigrationExecutor::new(&client, &cancel);

    executor
        .migrate_pod(&pod, Some(&node_a), Some(&node_b), false)
        .unwrap();

    assert_eq!(
        vec![
            Action::UpdateScale {
                kind: ControllerKind::Deployment,
                name: "web".to_string(),
                replicas: 4,
            },
            Action::DeletePod {
                namespace: "default".to_string(),
                name: "web-0".to_string(),
                grace_period_seconds: 0,
            },
            Action::UpdateScale {
                kind: ControllerKind::Deployment,
                name: "web".to_string(),
                replicas: 3,
            },
        ],
        client.recorded_actions()
    );
}

// If the scale-up write fails, the victim must not be deleted.
#[test]
fn test_failed_scale_up_prevents_the_delete() {
    let node_a = make_node("node-a", "2000m", "4096Mi");
    let node_b = make_node("node-b", "2000m", "4096Mi");
    let pod = with_owner(
        make_pod("web-0", "node-a", "500m", "512Mi"),
        "ReplicaSet",
        "web-rs",
    );
    let client = FakeClusterClient::new(vec![node_a.clone(), node_b.clone()], vec![pod.clone()])
        .with_replica_set(replica_set_owned_by_deployment("web-rs", "web"))
        .with_scale(ControllerKind::Deployment, "default", "web", 3);
    *client.fail_scale_updates.borrow_mut() = true;
    let cancel = CancelToken::new();
    let executor = MigrationExecutor::new(&client, &cancel);

    assert!(executor
        .migrate_pod(&pod, Some(&node_a), Some(&node_b), false)
        .is_err());
    assert!(client
        .recorded_actions()
        .iter()
        .all(|a| !matches!(a, Action::DeletePod { .. })));
    assert!(client.get_pod(&cancel, "default", "web-0").is_ok());
}

// An uncontrolled pod is deleted and recreated with scheduler fields
// cleared.
#[test]
fn test_bare_pod_is_deleted_and_recreated() {
    let node_a = make_node("node-a", "2000m", "4096Mi");
    let node_b = make_node("node-b", "2000m", "4096Mi");
    let pod = make_pod("solo", "node-a", "500m", "512Mi");
    let client = FakeClusterClient::new(vec![node_a.clone(), node_b.clone()], vec![pod.clone()]);
    let cancel = CancelToken::new();
    let executor = MigrationExecutor::new(&client, &cancel);

    executor
        .migrate_pod(&pod, Some(&node_a), Some(&node_b), false)
        .unwrap();

    let actions = client.recorded_actions();
    assert!(matches!(actions[0], Action::DeletePod { .. }));
    assert!(matches!(actions[1], Action::CreatePod { .. }));

    let recreated = client.get_pod(&cancel, "default", "solo").unwrap();
    assert!(recreated.metadata.uid.is_empty());
    assert!(recreated.metadata.resource_version.is_empty());
    assert!(recreated.spec.node_name.is_empty());
    // Not a swap: no affinity bias is added.
    assert!(recreated.spec.affinity.is_none());
}

// Job and operator-owned pods are delete-only; their controllers recreate
// replacement tasks.
#[test]
fn test_job_and_operator_pods_are_delete_only() {
    let node_a = make_node("node-a", "2000m", "4096Mi");
    let node_b = make_node("node-b", "2000m", "4096Mi");
    for kind in ["Job", "TFJob", "SomethingCustom"] {
        let pod = with_owner(
            make_pod("task-0", "node-a", "500m", "512Mi"),
            kind,
            "trainer",
        );
        let client =
            FakeClusterClient::new(vec![node_a.clone(), node_b.clone()], vec![pod.clone()]);
        let cancel = CancelToken::new();
        let executor = MigrationExecutor::new(&client, &cancel);

        executor
            .migrate_pod(&pod, Some(&node_a), Some(&node_b), false)
            .unwrap();

        assert_eq!(
            vec![Action::DeletePod {
                namespace: "default".to_string(),
                name: "task-0".to_string(),
                grace_period_seconds: 0,
            }],
            client.recorded_actions(),
            "owner kind {}",
            kind
        );
    }
}

// A pending pod has no source node; the executor has nothing to mutate.
#[test]
fn test_pending_pod_migration_is_a_noop() {
    let node_b = make_node("node-b", "2000m", "4096Mi");
    let pod = make_pod("pending", "", "500m", "512Mi");
    let client = FakeClusterClient::new(vec![node_b.clone()], vec![pod.clone()]);
    let cancel = CancelToken::new();
    let executor = MigrationExecutor::new(&client, &cancel);

    executor.migrate_pod(&pod, None, Some(&node_b), false).unwrap();
    assert!(client.recorded_actions().is_empty());
}

// Swapping replica-set pods scales both controllers, skips the inline
// deletes, and issues the late deletes at the end.
#[test]
fn test_swap_replica_set_pods_defers_the_deletes() {
    let node_a = make_node("node-a", "2000m", "4096Mi");
    let node_b = make_node("node-b", "2000m", "4096Mi");
    let pod_a = with_owner(
        make_pod("left-0", "node-a", "500m", "512Mi"),
        "ReplicaSet",
        "left-rs",
    );
    let pod_b = with_owner(
        make_pod("right-0", "node-b", "400m", "1024Mi"),
        "ReplicaSet",
        "right-rs",
    );
    let client = FakeClusterClient::new(
        vec![node_a.clone(), node_b.clone()],
        vec![pod_a.clone(), pod_b.clone()],
    )
    .with_replica_set(ReplicaSet {
        metadata: ObjectMeta {
            name: "left-rs".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        },
    })
    .with_replica_set(ReplicaSet {
        metadata: ObjectMeta {
            name: "right-rs".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        },
    })
    .with_scale(ControllerKind::ReplicaSet, "default", "left-rs", 2)
    .with_scale(ControllerKind::ReplicaSet, "default", "right-rs", 2);
    let cancel = CancelToken::new();
    let executor = MigrationExecutor::new(&client, &cancel);

    executor
        .swap_pods(&pod_a, &node_a, &pod_b, &node_b)
        .unwrap();

    assert_eq!(
        vec![
            Action::UpdateScale {
                kind: ControllerKind::ReplicaSet,
                name: "left-rs".to_string(),
                replicas: 3,
            },
            Action::UpdateScale {
                kind: ControllerKind::ReplicaSet,
                name: "left-rs".to_string(),
                replicas: 2,
            },
            Action::UpdateScale {
                kind: ControllerKind::ReplicaSet,
                name: "right-rs".to_string(),
                replicas: 3,
            },
            Action::UpdateScale {
                kind: ControllerKind::ReplicaSet,
                name: "right-rs".to_string(),
                replicas: 2,
            },
            Action::DeletePod {
                namespace: "default".to_string(),
                name: "right-0".to_string(),
                grace_period_seconds: 0,
            },
            Action::DeletePod {
                namespace: "default".to_string(),
                name: "left-0".to_string(),
                grace_period_seconds: 0,
            },
        ],
        client.recorded_actions()
    );
}
