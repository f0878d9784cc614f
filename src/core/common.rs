//! Shared object-model types: metadata, owner references and label selectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object metadata subset consumed by the controller, in api wire form.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: String,
    /// RFC 3339 timestamp; lexicographic order equals chronological order.
    pub creation_timestamp: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: Option<bool>,
}

/// ReplicaSet subset: only metadata is consulted, to resolve a Deployment ancestor.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSet {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

pub const SELECTOR_OP_IN: &str = "In";
pub const SELECTOR_OP_NOT_IN: &str = "NotIn";
pub const SELECTOR_OP_EXISTS: &str = "Exists";
pub const SELECTOR_OP_DOES_NOT_EXIST: &str = "DoesNotExist";

impl LabelSelector {
    /// Parses the `k=v,k2!=v2,k3,!k4` expression syntax used by the CLI
    /// node-selector flag.
    pub fn parse(expr: &str) -> Result<LabelSelector, String> {
        let mut selector = LabelSelector::default();
        for part in expr.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((key, value)) = part.split_once("!=") {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SELECTOR_OP_NOT_IN.to_string(),
                    values: vec![value.trim().to_string()],
                });
            } else if let Some((key, value)) = part.split_once("==") {
                selector
                    .match_labels
                    .insert(key.trim().to_string(), value.trim().to_string());
            } else if let Some((key, value)) = part.split_once('=') {
                selector
                    .match_labels
                    .insert(key.trim().to_string(), value.trim().to_string());
            } else if let Some(key) = part.strip_prefix('!') {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SELECTOR_OP_DOES_NOT_EXIST.to_string(),
                    values: vec![],
                });
            } else {
                selector.match_expressions.push(LabelSelectorRequirement {
                    key: part.to_string(),
                    operator: SELECTOR_OP_EXISTS.to_string(),
                    values: vec![],
                });
            }
        }
        if selector.match_labels.is_empty() && selector.match_expressions.is_empty() {
            return Err(format!("empty label selector expression: {:?}", expr));
        }
        Ok(selector)
    }

    /// Whether the given label set satisfies every term of this selector.
    /// Malformed requirements (unknown operator, In/NotIn without values)
    /// evaluate to an error so callers can surface it.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, String> {
        for (key, value) in self.match_labels.iter() {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
        for requirement in self.match_expressions.iter() {
            match requirement.operator.as_str() {
                SELECTOR_OP_IN => {
                    if requirement.values.is_empty() {
                        return Err(format!("In requirement on {:?} has no values", requirement.key));
                    }
                    match labels.get(&requirement.key) {
                        Some(v) if requirement.values.contains(v) => {}
                        _ => return Ok(false),
                    }
                }
                SELECTOR_OP_NOT_IN => {
                    if requirement.values.is_empty() {
                        return Err(format!(
                            "NotIn requirement on {:?} has no values",
                            requirement.key
                        ));
                    }
                    if let Some(v) = labels.get(&requirement.key) {
                        if requirement.values.contains(v) {
                            return Ok(false);
                        }
                    }
                }
                SELECTOR_OP_EXISTS => {
                    if !requirement.values.is_empty() {
                        return Err(format!(
                            "Exists requirement on {:?} must not carry values",
                            requirement.key
                        ));
                    }
                    if !labels.contains_key(&requirement.key) {
                        return Ok(false);
                    }
                }
                SELECTOR_OP_DOES_NOT_EXIST => {
                    if !requirement.values.is_empty() {
                        return Err(format!(
                            "DoesNotExist requirement on {:?} must not carry values",
                            requirement.key
                        ));
                    }
                    if labels.contains_key(&requirement.key) {
                        return Ok(false);
                    }
                }
                other => return Err(format!("unknown selector operator {:?}", other)),
            }
        }
        Ok(true)
    }

    /// Renders the selector in the `key=value,key in (a,b)` query syntax
    /// understood by the api server.
    pub fn to_query(&self) -> String {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        for requirement in self.match_expressions.iter() {
            match requirement.operator.as_str() {
                SELECTOR_OP_IN => parts.push(format!(
                    "{} in ({})",
                    requirement.key,
                    requirement.values.join(",")
                )),
                SELECTOR_OP_NOT_IN => parts.push(format!(
                    "{} notin ({})",
                    requirement.key,
                    requirement.values.join(",")
                )),
                SELECTOR_OP_EXISTS => parts.push(requirement.key.clone()),
                SELECTOR_OP_DOES_NOT_EXIST => parts.push(format!("!{}", requirement.key)),
                _ => {}
            }
        }
        parts.join(",")
    }
}
