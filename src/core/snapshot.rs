//! Cluster snapshot: a per-iteration, in-memory view of every node and the
//! running pods it hosts, plus aggregate resource-usage reporting.

use log::{info, warn};
use prettytable::{row, Table};

use crate::client::interface::{CancelToken, ClusterClient};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::resources::{Resource, MIB};

/// Builds one `NodeInfo` per node by listing its running pods. A node whose
/// pod listing fails is skipped with a warning; the snapshot never fails as
/// a whole because of a single node.
pub fn get_system_snapshot(
    client: &dyn ClusterClient,
    cancel: &CancelToken,
    nodes: &[Node],
) -> Vec<NodeInfo> {
    let mut node_infos = vec![];
    for node in nodes.iter() {
        let pods = match client.list_pods_on_node(cancel, &node.metadata.name) {
            Ok(pods) => pods,
            Err(err) => {
                warn!(
                    "node {} will not be processed, error accessing its pods: {}",
                    node.metadata.name, err
                );
                continue;
            }
        };
        let mut node_info = NodeInfo::new();
        node_info.set_node(node.clone());
        for pod in pods {
            node_info.add_pod(pod);
        }
        node_infos.push(node_info);
    }
    node_infos
}

/// Cluster-wide aggregates over a snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResourceUsage {
    pub total: Resource,
    pub used: Resource,
    pub available: Resource,
}

pub fn get_node_resource_usage(node_infos: &[NodeInfo]) -> ResourceUsage {
    let mut usage = ResourceUsage::default();
    for node_info in node_infos.iter() {
        usage.total.add(&node_info.allocatable);
        usage.used.add(&node_info.non_zero_requested);
        usage.available.add(&node_info.available);
    }
    usage
}

/// Logs the usage aggregates and the node/pod tree the way operators read
/// them between iterations.
pub fn log_usage(node_infos: &[NodeInfo]) {
    let usage = get_node_resource_usage(node_infos);
    info!(
        "nodes resource usage: total-cpu:{:.3}, total-memory:{:.3}Mi, used-cpu:{:.3}, used-memory:{:.3}Mi, available-cpu:{:.3}, available-memory:{:.3}Mi",
        usage.total.milli_cpu as f64 / 1000.0,
        usage.total.memory as f64 / MIB as f64,
        usage.used.milli_cpu as f64 / 1000.0,
        usage.used.memory as f64 / MIB as f64,
        usage.available.milli_cpu as f64 / 1000.0,
        usage.available.memory as f64 / MIB as f64,
    );
    if usage.total.milli_cpu > 0 && usage.total.memory > 0 {
        info!(
            "nodes usage: used-cpu(%):{:.2}%, used-memory(%):{:.2}%, fragment-cpu(%):{:.2}%, fragment-memory(%):{:.2}%",
            100.0 * usage.used.milli_cpu as f64 / usage.total.milli_cpu as f64,
            100.0 * usage.used.memory as f64 / usage.total.memory as f64,
            100.0 * usage.available.milli_cpu as f64 / usage.total.milli_cpu as f64,
            100.0 * usage.available.memory as f64 / usage.total.memory as f64,
        );
    }
    for (name, total) in usage.total.scalar_resources.iter() {
        info!(
            "nodes scalar usage: {}: total:{}, used:{}, available:{}",
            name,
            total,
            usage.used.scalar(name),
            usage.available.scalar(name),
        );
    }
    for node_info in node_infos.iter() {
        info!("- node {}", node_info.node_name());
        for pod_info in node_info.pods.iter() {
            info!(
                " |- pod {}/{}",
                pod_info.pod.metadata.namespace, pod_info.pod.metadata.name
            );
        }
    }
}

/// Renders per-node availability as a table for the CLI.
pub fn usage_table(node_infos: &[NodeInfo]) -> Table {
    let mut table = Table::new();
    table.add_row(row![
        "Node",
        "Pods",
        "Alloc CPU (m)",
        "Alloc Mem (Mi)",
        "Avail CPU (m)",
        "Avail Mem (Mi)"
    ]);
    for node_info in node_infos.iter() {
        table.add_row(row![
            node_info.node_name(),
            node_info.pods.len(),
            node_info.allocatable.milli_cpu,
            node_info.allocatable.memory / MIB,
            node_info.available.milli_cpu,
            node_info.available.memory / MIB,
        ]);
    }
    table
}
