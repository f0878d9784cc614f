//! Node object model: allocatable capacity, taints and readiness conditions.

use serde::{Deserialize, Serialize};

use crate::core::common::ObjectMeta;
use crate::core::resources::ResourceList;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub metadata: ObjectMeta,
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub taints: Vec<Taint>,
    pub unschedulable: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatus {
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

pub const TAINT_EFFECT_NO_SCHEDULE: &str = "NoSchedule";
pub const TAINT_EFFECT_PREFER_NO_SCHEDULE: &str = "PreferNoSchedule";
pub const TAINT_EFFECT_NO_EXECUTE: &str = "NoExecute";

impl Node {
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }
}

#[cfg(test)]
mod tests {
    use super::Node;

    #[test]
    fn test_ready_condition() {
        let node: Node = serde_yaml::from_str(
            r#"
            metadata:
              name: node-1
            status:
              allocatable:
                cpu: "2"
                memory: 4Gi
              conditions:
              - type: Ready
                status: "True"
            "#,
        )
        .unwrap();
        assert!(node.is_ready());

        let unready: Node = serde_yaml::from_str(
            r#"
            metadata:
              name: node-2
            status:
              conditions:
              - type: Ready
                status: "False"
            "#,
        )
        .unwrap();
        assert!(!unready.is_ready());
    }
}
