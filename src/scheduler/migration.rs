//! Migration executor: reshapes orchestrator state so a pod ends up on its
//! target node, coordinating with the pod's owning controller. Failures
//! mid-sequence are surfaced, never rolled back; the cluster's controllers
//! are expected to reconverge.

use log::{error, info};

use crate::client::interface::{CancelToken, ClientError, ClusterClient, ControllerKind};
use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::policy::OPERATOR_JOB_KINDS;
use crate::scheduler::affinity::set_new_preferred_node_affinity;

/// How the pod's owner expects migrations to be carried out.
#[derive(Debug, Clone, PartialEq)]
enum ControllerClass {
    /// Replica-managed: migrate through the scale subresource.
    Scaled(ControllerKind),
    /// The job controller recreates replacement tasks after a delete.
    Job,
    /// Operator-owned (or unrecognized): delete-only, the operator owns
    /// recreation.
    Operator,
}

#[derive(Debug, Clone)]
struct Controller {
    class: ControllerClass,
    name: String,
}

pub struct MigrationExecutor<'a> {
    client: &'a dyn ClusterClient,
    cancel: &'a CancelToken,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(client: &'a dyn ClusterClient, cancel: &'a CancelToken) -> MigrationExecutor<'a> {
        MigrationExecutor { client, cancel }
    }

    /// Walks the pod's owner references; the first one decides the protocol.
    /// A ReplicaSet additionally resolves its own owner, which may be a
    /// Deployment.
    fn resolve_controller(&self, pod: &Pod) -> Option<Controller> {
        let owner = pod.metadata.owner_references.first()?;
        match owner.kind.as_str() {
            "ReplicationController" => Some(Controller {
                class: ControllerClass::Scaled(ControllerKind::ReplicationController),
                name: owner.name.clone(),
            }),
            "ReplicaSet" => {
                let mut controller = Controller {
                    class: ControllerClass::Scaled(ControllerKind::ReplicaSet),
                    name: owner.name.clone(),
                };
                match self.client.get_replica_set(
                    self.cancel,
                    &pod.metadata.namespace,
                    &owner.name,
                ) {
                    Ok(replica_set) => {
                        if let Some(rs_owner) = replica_set
                            .metadata
                            .owner_references
                            .iter()
                            .find(|o| o.kind == "Deployment")
                        {
                            controller = Controller {
                                class: ControllerClass::Scaled(ControllerKind::Deployment),
                                name: rs_owner.name.clone(),
                            };
                        }
                    }
                    Err(err) => {
                        error!(
                            "failed to get replica set {}/{}: {}",
                            pod.metadata.namespace, owner.name, err
                        );
                    }
                }
                Some(controller)
            }
            "Job" => Some(Controller {
                class: ControllerClass::Job,
                name: owner.name.clone(),
            }),
            kind if OPERATOR_JOB_KINDS.contains(kind) => Some(Controller {
                class: ControllerClass::Operator,
                name: pod.metadata.name.clone(),
            }),
            _ => Some(Controller {
                class: ControllerClass::Operator,
                name: pod.metadata.name.clone(),
            }),
        }
    }

    /// Moves one pod from `from` toward `to`. A pod without a source node is
    /// pending: the displacements already freed capacity for it and the
    /// cluster scheduler will bind it, so there is nothing to mutate. A pod
    /// without a destination is evicted and rebinds wherever the scheduler
    /// finds room.
    pub fn migrate_pod(
        &self,
        pod: &Pod,
        from: Option<&Node>,
        to: Option<&Node>,
        is_swap: bool,
    ) -> Result<(), ClientError> {
        let Some(from) = from else {
            return Ok(());
        };

        match self.resolve_controller(pod) {
            None => {
                info!(
                    "delete pod {}/{} on node {}",
                    pod.metadata.namespace, pod.metadata.name, from.metadata.name
                );
                self.delete_pod(pod)?;
                info!(
                    "reschedule pod {}/{} to node {:?}",
                    pod.metadata.namespace,
                    pod.metadata.name,
                    to.map(|n| n.metadata.name.as_str())
                );
                self.reschedule_pod(pod, to.map(|n| n.metadata.name.as_str()), is_swap)?;
            }
            Some(Controller {
                class: ControllerClass::Scaled(kind),
                name,
            }) => {
                self.migrate_through_scale(pod, from, kind, &name, is_swap)?;
            }
            Some(Controller {
                class: ControllerClass::Job | ControllerClass::Operator,
                ..
            }) => {
                self.delete_pod(pod)?;
            }
        }
        Ok(())
    }

    /// Scale up by one so the controller schedules a replacement before the
    /// victim vanishes, delete the victim (skipped during swaps, where the
    /// late delete happens in `swap_pods`), then scale back down.
    fn migrate_through_scale(
        &self,
        pod: &Pod,
        from: &Node,
        kind: ControllerKind,
        name: &str,
        is_swap: bool,
    ) -> Result<(), ClientError> {
        let namespace = &pod.metadata.namespace;
        let mut scale = self.client.get_scale(self.cancel, kind, namespace, name)?;
        let original_replicas = scale.replicas;

        scale.replicas = original_replicas + 1;
        self.client
            .update_scale(self.cancel, kind, namespace, name, &scale)?;

        if !is_swap {
            info!(
                "delete pod {}/{} on node {} ({} {})",
                namespace,
                pod.metadata.name,
                from.metadata.name,
                kind.as_str(),
                name
            );
            self.delete_pod(pod)?;
        }

        scale.resource_version = String::new();
        scale.replicas = original_replicas;
        self.client
            .update_scale(self.cancel, kind, namespace, name, &scale)?;
        Ok(())
    }

    /// Swap protocol: move A toward B's node, then B toward A's node, both
    /// flagged as swaps so replica-managed victims are not deleted inline.
    /// The originals of replica-managed pods are deleted afterwards to cover
    /// controllers that had not reconciled yet. A failed second migration
    /// does not roll back the first.
    pub fn swap_pods(
        &self,
        pod_a: &Pod,
        node_a: &Node,
        pod_b: &Pod,
        node_b: &Node,
    ) -> Result<(), ClientError> {
        self.migrate_pod(pod_a, Some(node_a), Some(node_b), true)?;
        self.migrate_pod(pod_b, Some(node_b), Some(node_a), true)?;

        for pod in [pod_b, pod_a] {
            let replica_managed = pod
                .metadata
                .owner_references
                .iter()
                .any(|owner| owner.kind == "ReplicationController" || owner.kind == "ReplicaSet");
            if replica_managed {
                if let Err(err) = self.delete_pod(pod) {
                    error!(
                        "error deleting swapped pod {}/{}: {}",
                        pod.metadata.namespace, pod.metadata.name, err
                    );
                }
            }
        }
        Ok(())
    }

    /// Recreates a mutated copy of the pod for a fresh scheduling decision,
    /// optionally biased toward the target host during swaps.
    fn reschedule_pod(
        &self,
        pod: &Pod,
        to_node: Option<&str>,
        is_swap: bool,
    ) -> Result<(), ClientError> {
        let mut reschedule = pod.clone();
        reschedule.reset_for_reschedule();
        if is_swap {
            if let Some(to_node) = to_node {
                set_new_preferred_node_affinity(&mut reschedule, to_node);
            }
        }
        self.client.create_pod(self.cancel, &reschedule)?;
        Ok(())
    }

    fn delete_pod(&self, pod: &Pod) -> Result<(), ClientError> {
        self.client
            .delete_pod(self.cancel, &pod.metadata.namespace, &pod.metadata.name, 0)
            .map_err(|err| {
                error!(
                    "error deleting pod {}/{}: {}",
                    pod.metadata.namespace, pod.metadata.name, err
                );
                err
            })
    }
}
