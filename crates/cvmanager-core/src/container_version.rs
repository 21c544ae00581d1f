//! ContainerVersion declaration and rollout status types

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Declares which image tag the workloads matched by `selector` should run.
///
/// The status sub-record carries the last rollout outcome persisted by the
/// reconciler.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "custom.k8s.io",
    version = "v1",
    kind = "ContainerVersion",
    namespaced,
    status = "ContainerVersionStatus",
    shortname = "cv",
    derive = "PartialEq",
    schema = "disabled",
    printcolumn = r#"{"name":"Tag", "type":"string", "jsonPath":".spec.tag"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.currVersion"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.currStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerVersionSpec {
    /// Image repository, without tag (e.g. `registry.example.com/team/app`)
    pub image_repo: String,

    /// Tag being tracked in the repository
    pub tag: String,

    /// Seconds between registry polls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_seconds: Option<u32>,

    /// Whether to check live status after a rollout
    #[serde(default)]
    pub live_check: bool,

    /// Label selector identifying the governed workloads
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Container within the governed workloads to roll out
    pub container: ContainerSpec,
}

impl ContainerVersionSpec {
    /// Render the selector in Kubernetes label selector syntax (`k1=v1,k2=v2`).
    ///
    /// An empty selector renders as an empty string, which matches everything.
    pub fn label_selector(&self) -> String {
        self.selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Container targeted by a ContainerVersion
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name within the pod spec
    pub name: String,
}

/// Last observed rollout state of a ContainerVersion
///
/// Every field is optional: a declaration that has never been rolled out has
/// no status at all, which is distinct from any of the three rollout states.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerVersionStatus {
    /// Version most recently rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curr_version: Option<String>,

    /// Outcome of the most recent rollout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curr_status: Option<RolloutStatus>,

    /// When `curr_status` was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curr_status_time: Option<DateTime<Utc>>,

    /// Last version that rolled out successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_version: Option<String>,
}

impl ContainerVersionStatus {
    /// Record a rollout outcome.
    ///
    /// `success_version` only moves forward on `Success`; `Failed` and
    /// `Progressing` never clear it.
    pub fn record(&mut self, version: &str, status: RolloutStatus, time: DateTime<Utc>) {
        self.curr_version = Some(version.to_string());
        self.curr_status = Some(status);
        self.curr_status_time = Some(time);

        if status == RolloutStatus::Success {
            self.success_version = Some(version.to_string());
        }
    }
}

impl ContainerVersion {
    /// Current rollout status, `None` if no rollout was ever recorded
    pub fn rollout_status(&self) -> Option<RolloutStatus> {
        self.status.as_ref().and_then(|s| s.curr_status)
    }

    /// Last successfully rolled out version, if any
    pub fn success_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.success_version.as_deref())
    }
}

/// Rollout status
///
/// The serialized strings are part of the persisted contract and are compared
/// by downstream consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RolloutStatus {
    Progressing,
    Success,
    Failed,
}

impl RolloutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progressing => "Progressing",
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RolloutStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Progressing" => Ok(Self::Progressing),
            "Success" => Ok(Self::Success),
            "Failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}
