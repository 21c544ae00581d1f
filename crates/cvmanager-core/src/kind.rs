//! Workload kinds

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The closed set of deployable workload kinds
///
/// `ALL` fixes the discovery order used when aggregating workloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Deployment,
    CronJob,
    DaemonSet,
    Job,
    Pod,
    ReplicaSet,
    StatefulSet,
}

impl WorkloadKind {
    /// Every kind, in discovery order
    pub const ALL: [WorkloadKind; 7] = [
        WorkloadKind::Deployment,
        WorkloadKind::CronJob,
        WorkloadKind::DaemonSet,
        WorkloadKind::Job,
        WorkloadKind::Pod,
        WorkloadKind::ReplicaSet,
        WorkloadKind::StatefulSet,
    ];

    /// The Kubernetes `kind` string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::CronJob => "CronJob",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::Pod => "Pod",
            Self::ReplicaSet => "ReplicaSet",
            Self::StatefulSet => "StatefulSet",
        }
    }

    /// The Kubernetes `apiVersion` string
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Deployment | Self::DaemonSet | Self::ReplicaSet | Self::StatefulSet => "apps/v1",
            Self::CronJob | Self::Job => "batch/v1",
            Self::Pod => "v1",
        }
    }

    /// Lowercase plural resource name, as used in API paths and error context
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Deployment => "deployments",
            Self::CronJob => "cronjobs",
            Self::DaemonSet => "daemonsets",
            Self::Job => "jobs",
            Self::Pod => "pods",
            Self::ReplicaSet => "replicasets",
            Self::StatefulSet => "statefulsets",
        }
    }

    /// Whether pods of this kind are stamped out from a pod template with a
    /// managed replica count
    pub fn is_template(&self) -> bool {
        !matches!(self, Self::Pod | Self::CronJob)
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_order() {
        let names: Vec<_> = WorkloadKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Deployment",
                "CronJob",
                "DaemonSet",
                "Job",
                "Pod",
                "ReplicaSet",
                "StatefulSet"
            ]
        );
    }

    #[test]
    fn test_template_kinds() {
        assert!(WorkloadKind::Deployment.is_template());
        assert!(WorkloadKind::StatefulSet.is_template());
        assert!(!WorkloadKind::Pod.is_template());
        assert!(!WorkloadKind::CronJob.is_template());
    }

    #[test]
    fn test_api_versions() {
        assert_eq!(WorkloadKind::Deployment.api_version(), "apps/v1");
        assert_eq!(WorkloadKind::CronJob.api_version(), "batch/v1");
        assert_eq!(WorkloadKind::Pod.api_version(), "v1");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Job".parse::<WorkloadKind>().unwrap(), WorkloadKind::Job);
        assert!("Service".parse::<WorkloadKind>().is_err());
    }
}
