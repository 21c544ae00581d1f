//! Label selector evaluation

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::{KubeError, Result};

/// Parse an equality-based selector string (`k1=v1,k2=v2`).
///
/// `==` is accepted as a synonym for `=`. An empty string yields an empty map.
pub fn parse_selector_string(selector: &str) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();

    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, value) = term
            .split_once("==")
            .or_else(|| term.split_once('='))
            .ok_or_else(|| KubeError::InvalidSelector(format!("'{}' is not key=value", term)))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(KubeError::InvalidSelector(format!(
                "'{}' has an empty key",
                term
            )));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }

    Ok(labels)
}

/// Render a label map as a selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Evaluate a `LabelSelector` against a set of labels.
///
/// An empty selector matches everything.
pub fn matches(selector: &LabelSelector, labels: Option<&BTreeMap<String, String>>) -> Result<bool> {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    if let Some(match_labels) = &selector.match_labels
        && !match_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    {
        return Ok(false);
    }

    for expr in selector.match_expressions.iter().flatten() {
        let value = labels.get(&expr.key);
        let values = expr.values.as_deref().unwrap_or_default();

        let matched = match expr.operator.as_str() {
            "In" => value.is_some_and(|v| values.contains(v)),
            "NotIn" => value.is_none_or(|v| !values.contains(v)),
            "Exists" => value.is_some(),
            "DoesNotExist" => value.is_none(),
            other => {
                return Err(KubeError::InvalidSelector(format!(
                    "unknown operator '{}' for key '{}'",
                    other, expr.key
                )));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}
