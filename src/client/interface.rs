//! The orchestrator api surface the controller consumes, as a trait so the
//! planner and executor stay independent of the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::core::common::{LabelSelector, ReplicaSet};
use crate::core::node::Node;
use crate::core::pod::Pod;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("api request failed: {0}")]
    Api(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),
}

/// Cooperative cancellation flag threaded through every api call. An expired
/// token surfaces as `ClientError::Cancelled` at the next api boundary; no
/// rollback of in-flight migrations is attempted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ClientError> {
        if self.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }
}

/// Options for cluster-wide pod listing. Include and exclude namespace lists
/// are mutually exclusive; phase filtering (no Succeeded/Failed) is always
/// applied by the implementation.
#[derive(Debug, Clone, Default)]
pub struct PodListOptions {
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    pub label_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    ReplicationController,
    ReplicaSet,
    Deployment,
}

impl ControllerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerKind::ReplicationController => "ReplicationController",
            ControllerKind::ReplicaSet => "ReplicaSet",
            ControllerKind::Deployment => "Deployment",
        }
    }
}

/// The scale subresource of a replica-managed controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scale {
    pub replicas: i32,
    pub resource_version: String,
}

pub trait ClusterClient {
    /// Lists ready nodes, optionally restricted by a label selector.
    fn list_nodes(
        &self,
        cancel: &CancelToken,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Node>, ClientError>;

    /// Lists the pods bound to a node whose phase is neither Succeeded nor
    /// Failed.
    fn list_pods_on_node(
        &self,
        cancel: &CancelToken,
        node_name: &str,
    ) -> Result<Vec<Pod>, ClientError>;

    /// Lists pods across the cluster subject to the given options, excluding
    /// Succeeded/Failed phases.
    fn list_pods(
        &self,
        cancel: &CancelToken,
        options: &PodListOptions,
    ) -> Result<Vec<Pod>, ClientError>;

    fn get_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<Pod, ClientError>;

    fn create_pod(&self, cancel: &CancelToken, pod: &Pod) -> Result<Pod, ClientError>;

    fn delete_pod(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClientError>;

    fn get_replica_set(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, ClientError>;

    fn get_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<Scale, ClientError>;

    fn update_scale(
        &self,
        cancel: &CancelToken,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        scale: &Scale,
    ) -> Result<Scale, ClientError>;
}
