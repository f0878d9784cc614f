//! Strategy parameter definitions and validation for the balance and place
//! policies.

use serde::Deserialize;

use crate::core::common::LabelSelector;

pub const DEFAULT_BALANCE_ITERATIONS: i32 = 10;
pub const DEFAULT_PLACE_ITERATIONS: i32 = 10;

/// Seconds to wait between a mutation and the next snapshot so the cluster
/// can settle.
pub const DEFAULT_SETTLE_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyParameters {
    /// None or zero means the policy default.
    pub iterations: Option<i32>,
    pub namespaces: Option<Namespaces>,
    pub label_selector: Option<LabelSelector>,
    pub node_fit: bool,
    pub threshold_priority: Option<i32>,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Namespaces {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub enum ParamError {
    NegativeIterations,
    ConflictingNamespaces,
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamError::NegativeIterations => write!(f, "iterations must be >= 0"),
            ParamError::ConflictingNamespaces => {
                write!(f, "only one of include/exclude namespaces can be set")
            }
        }
    }
}

impl StrategyParameters {
    pub fn effective_iterations(&self, default: i32) -> i32 {
        match self.iterations {
            Some(0) | None => default,
            Some(n) => n,
        }
    }

    pub fn include_namespaces(&self) -> Vec<String> {
        self.namespaces
            .as_ref()
            .map(|n| n.include.clone())
            .unwrap_or_default()
    }

    pub fn exclude_namespaces(&self) -> Vec<String> {
        self.namespaces
            .as_ref()
            .map(|n| n.exclude.clone())
            .unwrap_or_default()
    }
}

pub fn validate_balance_params(params: &StrategyParameters) -> Result<(), ParamError> {
    if params.iterations.unwrap_or(0) < 0 {
        return Err(ParamError::NegativeIterations);
    }
    Ok(())
}

pub fn validate_place_params(params: &StrategyParameters) -> Result<(), ParamError> {
    if params.iterations.unwrap_or(0) < 0 {
        return Err(ParamError::NegativeIterations);
    }
    if let Some(namespaces) = params.namespaces.as_ref() {
        if !namespaces.include.is_empty() && !namespaces.exclude.is_empty() {
            return Err(ParamError::ConflictingNamespaces);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_iterations() {
        let params = StrategyParameters::default();
        assert_eq!(10, params.effective_iterations(DEFAULT_BALANCE_ITERATIONS));
        let explicit = StrategyParameters {
            iterations: Some(3),
            ..Default::default()
        };
        assert_eq!(3, explicit.effective_iterations(DEFAULT_BALANCE_ITERATIONS));
    }

    #[test]
    fn test_negative_iterations_rejected() {
        let params = StrategyParameters {
            iterations: Some(-1),
            ..Default::default()
        };
        assert_eq!(
            Err(ParamError::NegativeIterations),
            validate_balance_params(&params)
        );
        assert_eq!(
            Err(ParamError::NegativeIterations),
            validate_place_params(&params)
        );
    }

    #[test]
    fn test_conflicting_namespaces_rejected() {
        let params: StrategyParameters = serde_yaml::from_str(
            r#"
            namespaces:
              include: [team-a]
              exclude: [kube-system]
            "#,
        )
        .unwrap();
        assert_eq!(
            Err(ParamError::ConflictingNamespaces),
            validate_place_params(&params)
        );
    }

    #[test]
    fn test_params_deserialize_from_yaml() {
        let params: StrategyParameters = serde_yaml::from_str(
            r#"
            iterations: 5
            namespaces:
              exclude: [kube-system]
            label_selector:
              matchLabels: { tier: batch }
            "#,
        )
        .unwrap();
        assert_eq!(Some(5), params.iterations);
        assert_eq!(vec!["kube-system".to_string()], params.exclude_namespaces());
        assert!(params.label_selector.is_some());
    }
}
