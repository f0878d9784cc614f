//! Shared test helpers: an in-memory fake cluster client that records every
//! mutation, plus yaml-flavored node and pod builders.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::client::interface::{
    CancelToken, ClientError, ClusterClient, ControllerKind, PodListOptions, Scale,
};
use crate::core::common::{LabelSelector, OwnerReference, ReplicaSet};
use crate::core::node::Node;
use crate::core::pod::{Pod, PodPhase};

/// Every orchestrator mutation the fake observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreatePod {
        namespace: String,
        name: String,
    },
    DeletePod {
        namespace: String,
        name: String,
        grace_period_seconds: i64,
    },
    UpdateScale {
        kind: ControllerKind,
        name: String,
        replicas: i32,
    },
}

#[derive(Default)]
pub struct FakeClusterClient {
    pub nodes: RefCell<Vec<Node>>,
    pub pods: RefCell<Vec<Pod>>,
    pub replica_sets: RefCell<Vec<ReplicaSet>>,
    pub scales: RefCell<HashMap<(ControllerKind, String, String), Scale>>,
    pub actions: RefCell<Vec<Action>>,
    /// Node names whose pod listing fails, to exercise the snapshot
    /// soft-skip path.
    pub fail_pod_listing_for: RefCell<HashSet<String>>,
    /// When set, the next scale update fails.
    pub fail_scale_updates: RefCell<bool>,
}

impl FakeClusterClient {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> FakeClusterClient {
        FakeClusterClient {
            nodes: RefCell::new(nodes),
            pods: RefCell::new(pods),
            ..Default::default()
        }
    }

    pub fn with_scale(
        self,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> FakeClusterClient {
        self.scales.borrow_mut().insert(
            (kind, namespace.to_string(), name.to_string()),
            Scale {
                replicas,
                resource_version: "1".to_string(),
            },
        );
        self
    }

    pub fn with_replica_set(self, replica_set: ReplicaSet) -> FakeClusterClient {
        self.replica_sets.borrow_mut().push(replica_set);
        self
    }

    pub fn recorded_actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }
}

impl ClusterClient for FakeClusterClient {
    fn list_nodes(
        &self,
        cancel: &CancelToken,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Node>, ClientError> {
        cancel.check()?;
        let nodes = self.nodes.borrow();
        let mut result = vec![];
        for node in nodes.iter().filter(|n| n.is_ready()) {
            let selected = match selector {
                Some(selector) => selector
                    .matches(&node.metadata.labels)
                    .map_err(ClientError::Api)?,
                None => true,
            };
            if selected {
                result.push(node.clone());
            }
        }
        Ok(result)
    }

    fn list_pods_on_node(
        &self,
        cancel: &CancelToken,
        node_name: &str,
    ) -> Result<Vec<Pod>, ClientError> {
        cancel.check()?;
        if self.fail_pod_listing_for.borrow().contains(node_name) {
            return Err(ClientError::Api(format!(
                "listing pods on {} is broken",
                node_name
            )));
        }
        Ok(self
            .pods
            .borrow()
            .iter()
            .filter(|pod| {
                pod.spec.node_name == node_name
                    && pod.status.phase != PodPhase::Succeeded
                    && pod.status.phase != PodPhase::Failed
            })
            .cloned()
            .collect())
    }

    fn list_pods(
        &self,
        cancel: &CancelToken,
        options: &PodListOptions,
    ) -> Result<Vec<Pod>, ClientError> {
        cancel.check()?;
        let mut result = vec![];
        for pod in self.pods.borrow().iter() {
            if pod.status.phase == PodPhase::Succeeded || pod.status.phase == PodPhase::Failed {
                continue;
            }
            if !options.include_namespaces.is_empty()
                && !options.include_namespaces.contains(&pod.metadata.namespace)
            {
                continue;
            }
            if options.exclude_namespaces.contains(&pod.metadata.namespace) {
                continue;
            }
            if let Some(selector) = options.label_selector.as_ref() {
                if !selector
                    .matches(&pod.metadata.labels)
                    .map_err(ClientError::Api)?
                {
                    continue;
                }
            }
            result.push(pod.clone());
        }
        Ok(result)
    }

    fn get_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<Pod, ClientError> {
        cancel.check()?;
        self.pods
            .borrow()
            .iter()
            .find(|pod| pod.metadata.namespace == namespace && pod.metadata.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "Pod".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn create_pod(&self, cancel: &CancelToken, pod: &Pod) -> Result<Pod, ClientError> {
        cancel.check()?;
        self.actions.borrow_mut().push(Action::CreatePod {
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
        });
        self.pods.borrow_mut().push(pod.clone());
        Ok(pod.clone())
    }

    fn delete_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClientError> {
        cancel.check()?;
        let mut pods = self.pods.borrow_mut();
        let Some(index) = pods
            .iter()
            .position(|pod| pod.metadata.namespace == namespace && pod.metadata.name == name)
        else {
            return Err(ClientError::NotFound {
                kind: "Pod".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };
        pods.remove(index);
        self.actions.borrow_mut().push(Action::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            grace_period_seconds,
        });
        Ok(())
    }

    fn get_replica_set(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, ClientError> {
        cancel.check()?;
        self.replica_sets
            .borrow()
            .iter()
            .find(|rs| rs.metadata.namespace == namespace && rs.metadata.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "ReplicaSet".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn get_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<Scale, ClientError> {
        cancel.check()?;
        self.scales
            .borrow()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: kind.as_str().to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn update_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        scale: &Scale,
    ) -> Result<Scale, ClientError> {
        cancel.check()?;
        if *self.fail_scale_updates.borrow() {
            return Err(ClientError::Api("scale update is broken".to_string()));
        }
        let key = (kind, namespace.to_string(), name.to_string());
        let mut scales = self.scales.borrow_mut();
        let Some(existing) = scales.get_mut(&key) else {
            return Err(ClientError::NotFound {
                kind: kind.as_str().to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };
        existing.replicas = scale.replicas;
        self.actions.borrow_mut().push(Action::UpdateScale {
            kind,
            name: name.to_string(),
            replicas: scale.replicas,
        });
        Ok(existing.clone())
    }
}

/// A ready node with the given allocatable cpu (millicores) and memory.
pub fn make_node(name: &str, cpu: &str, memory: &str) -> Node {
    serde_yaml::from_str(&format!(
        r#"
        metadata:
          name: {}
          labels: {{ "kubernetes.io/hostname": {} }}
        status:
          allocatable: {{ cpu: {:?}, memory: {:?} }}
          capacity: {{ cpu: {:?}, memory: {:?} }}
          conditions:
          - {{ type: Ready, status: "True" }}
        "#,
        name, name, cpu, memory, cpu, memory
    ))
    .unwrap()
}

pub fn make_node_with_scalar(
    name: &str,
    cpu: &str,
    memory: &str,
    scalar_name: &str,
    scalar: i64,
) -> Node {
    let mut node = make_node(name, cpu, memory);
    node.status.allocatable.insert(
        scalar_name.to_string(),
        crate::core::resources::Quantity::new(scalar.to_string()),
    );
    node
}

/// A running pod bound to `node` with a single container request.
pub fn make_pod(name: &str, node: &str, cpu: &str, memory: &str) -> Pod {
    let mut pod: Pod = serde_yaml::from_str(&format!(
        r#"
        metadata: {{ name: {}, namespace: default, uid: uid-{} }}
        spec:
          containers:
          - name: main
            resources: {{ requests: {{ cpu: {:?}, memory: {:?} }} }}
        status: {{ phase: Running }}
        "#,
        name, name, cpu, memory
    ))
    .unwrap();
    pod.spec.node_name = node.to_string();
    if node.is_empty() {
        pod.status.phase = PodPhase::Pending;
    }
    pod
}

pub fn with_scalar_request(mut pod: Pod, scalar_name: &str, scalar: i64) -> Pod {
    pod.spec.containers[0].resources.requests.insert(
        scalar_name.to_string(),
        crate::core::resources::Quantity::new(scalar.to_string()),
    );
    pod
}

pub fn with_owner(mut pod: Pod, kind: &str, name: &str) -> Pod {
    pod.metadata.owner_references.push(OwnerReference {
        kind: kind.to_string(),
        name: name.to_string(),
        controller: Some(true),
        ..Default::default()
    });
    pod
}

/// A pending pod: unbound, phase Pending, flagged unschedulable.
pub fn make_pending_pod(name: &str, cpu: &str, memory: &str) -> Pod {
    let mut pod = make_pod(name, "", cpu, memory);
    pod.status.phase = PodPhase::Pending;
    pod.status.conditions.push(crate::core::pod::PodCondition {
        condition_type: "PodScheduled".to_string(),
        status: "False".to_string(),
        reason: "Unschedulable".to_string(),
        message: "0/2 nodes are available: insufficient resources.".to_string(),
    });
    pod
}
