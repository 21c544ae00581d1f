//! Workload summaries used for reporting

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::kind::WorkloadKind;

/// High level state of one workload governed by a ContainerVersion: the
/// version it currently runs and how many of its pods are available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WorkloadKind,
    pub container: String,
    pub version: String,
    pub available_pods: i32,

    /// Name of the owning ContainerVersion
    pub cv: String,
    /// Tag tracked by the owning ContainerVersion
    pub tag: String,
}

impl Resource {
    /// `namespace/kind/name`, for log lines and tables
    pub fn display_name(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Extract the version from an image reference.
///
/// The version is everything after the first `:`; later colons are kept
/// verbatim. A reference without any `:` is rejected.
pub fn image_version(image: &str) -> Result<&str> {
    image
        .split_once(':')
        .map(|(_, version)| version)
        .ok_or_else(|| CoreError::InvalidImage {
            image: image.to_string(),
        })
}
