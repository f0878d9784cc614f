//! Migratability and placeability policy: pure pod predicates deciding which
//! pods the planner and balancer may ever touch.

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::core::pod::{Pod, PodPhase};
use crate::core::pod_info::PodInfo;

/// Priority at and above which a pod is considered cluster-critical.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

lazy_static! {
    /// Job-like kinds whose controllers recreate replacement tasks on their
    /// own, so a plain delete is the whole migration protocol.
    pub static ref OPERATOR_JOB_KINDS: HashSet<&'static str> = HashSet::from([
        "TFJob",
        "PyTorchJob",
        "XGBoostJob",
        "MPIJob",
        "MXJob",
        "PaddleJob",
    ]);
}

/// Which pods the controller refuses to move. All exclusions default to on;
/// operators can relax individual ones through strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPolicy {
    pub skip_daemon_set_pods: bool,
    pub skip_mirror_pods: bool,
    pub skip_pods_with_local_storage: bool,
    pub skip_pods_with_host_ports: bool,
    pub critical_priority_threshold: i32,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        MigrationPolicy {
            skip_daemon_set_pods: true,
            skip_mirror_pods: true,
            skip_pods_with_local_storage: true,
            skip_pods_with_host_ports: true,
            critical_priority_threshold: SYSTEM_CRITICAL_PRIORITY,
        }
    }
}

impl MigrationPolicy {
    /// Whether a running pod may be displaced or swapped. Pods whose
    /// affinity terms failed to parse are never migratable.
    pub fn is_migratable(&self, pod_info: &PodInfo) -> bool {
        if pod_info.parse_error.is_some() {
            return false;
        }
        self.is_placeable(&pod_info.pod)
    }

    /// Whether a pod is a candidate for placement at all.
    pub fn is_placeable(&self, pod: &Pod) -> bool {
        if self.skip_daemon_set_pods && is_owned_by_kind(pod, "DaemonSet") {
            return false;
        }
        if self.skip_mirror_pods && pod.metadata.annotations.contains_key(MIRROR_POD_ANNOTATION) {
            return false;
        }
        if self.skip_pods_with_local_storage && has_local_storage(pod) {
            return false;
        }
        if self.skip_pods_with_host_ports && uses_host_ports(pod) {
            return false;
        }
        if pod.spec.priority.unwrap_or(0) >= self.critical_priority_threshold {
            return false;
        }
        true
    }
}

pub fn is_owned_by_kind(pod: &Pod, kind: &str) -> bool {
    pod.metadata
        .owner_references
        .iter()
        .any(|owner| owner.kind == kind)
}

pub fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .volumes
        .iter()
        .any(|volume| volume.host_path.is_some() || volume.empty_dir.is_some())
}

pub fn uses_host_ports(pod: &Pod) -> bool {
    pod.spec
        .containers
        .iter()
        .chain(pod.spec.init_containers.iter())
        .any(|container| container.ports.iter().any(|port| port.host_port != 0))
}

/// A pending pod for placement purposes: unbound, phase Pending, and
/// reported unschedulable for lack of fitting nodes.
pub fn is_pending_pod(pod: &Pod) -> bool {
    if !pod.spec.node_name.is_empty() || pod.status.phase != PodPhase::Pending {
        return false;
    }
    pod.status
        .conditions
        .iter()
        .any(|condition| condition.message.contains("nodes are available"))
}
