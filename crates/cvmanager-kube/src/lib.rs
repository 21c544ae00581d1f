//! cvmanager Kube - Kubernetes integration for cvmanager
//!
//! This crate provides:
//! - **Provider**: Workload discovery, resource aggregation and rollout status persistence for one namespace
//! - **Workload Contracts**: One interface over Deployments, CronJobs, DaemonSets, Jobs, Pods, ReplicaSets and StatefulSets
//! - **Clients**: Narrow cluster contracts backed by `kube`, plus an in-memory mock cluster
//! - **Label Selectors**: Selector rendering, parsing and evaluation
//! - **Annotations**: Rollback-after annotation parsing
//! - **Events**: Operational event recording

pub mod annotations;
pub mod client;
pub mod error;
pub mod events;
pub mod provider;
pub mod selector;
pub mod workload;

pub use client::{
    ContainerVersionClient, KubeContainerVersionClient, KubeWorkloadClient, MockCluster,
    OperationCounts, WorkloadClient, WorkloadObject,
};
pub use error::{KubeError, Result};
pub use events::{
    CollectingRecorder, Event, EventRecorder, EventType, KubeEventRecorder, Reporter,
    TracingRecorder,
};
pub use provider::Provider;
pub use workload::{
    CronJobWorkload, DaemonSetWorkload, DeploymentWorkload, JobWorkload, PodWorkload,
    ReplicaSetWorkload, StatefulSetWorkload, TemplateWorkload, Workload, WorkloadContext,
};
