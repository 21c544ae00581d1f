//! Cluster client contracts
//!
//! The provider and the workload adapters never talk to the API server
//! directly. They go through two narrow contracts:
//! - **WorkloadClient**: label-selector list, get and replace for the seven workload kinds
//! - **ContainerVersionClient**: get, list and status update for ContainerVersion declarations
//!
//! `KubeWorkloadClient` and `KubeContainerVersionClient` back them with a real
//! `kube::Client`; `MockCluster` keeps everything in memory for tests.

mod kubernetes;
mod mock;

pub use kubernetes::{KubeContainerVersionClient, KubeWorkloadClient};
pub use mock::{MockCluster, OperationCounts};

use async_trait::async_trait;
use cvmanager_core::{ContainerVersion, WorkloadKind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::Result;

/// A raw workload object of any supported kind
#[derive(Debug, Clone)]
pub enum WorkloadObject {
    Deployment(Deployment),
    CronJob(CronJob),
    DaemonSet(DaemonSet),
    Job(Job),
    Pod(Pod),
    ReplicaSet(ReplicaSet),
    StatefulSet(StatefulSet),
}

impl WorkloadObject {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::CronJob(_) => WorkloadKind::CronJob,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
            Self::Job(_) => WorkloadKind::Job,
            Self::Pod(_) => WorkloadKind::Pod,
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(o) => &o.metadata,
            Self::CronJob(o) => &o.metadata,
            Self::DaemonSet(o) => &o.metadata,
            Self::Job(o) => &o.metadata,
            Self::Pod(o) => &o.metadata,
            Self::ReplicaSet(o) => &o.metadata,
            Self::StatefulSet(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Deployment(o) => &mut o.metadata,
            Self::CronJob(o) => &mut o.metadata,
            Self::DaemonSet(o) => &mut o.metadata,
            Self::Job(o) => &mut o.metadata,
            Self::Pod(o) => &mut o.metadata,
            Self::ReplicaSet(o) => &mut o.metadata,
            Self::StatefulSet(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }
}

/// Multi-kind workload client
///
/// Implementations must be Send + Sync; one instance is shared by the
/// provider and every adapter it creates.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// List objects of `kind` in `namespace` matching a label selector
    /// (`k1=v1,k2=v2`; empty matches everything)
    async fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadObject>>;

    /// Get one object by name
    async fn get(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<WorkloadObject>;

    /// Replace an object. A set resource version is used as a precondition.
    async fn replace(&self, namespace: &str, object: &WorkloadObject) -> Result<WorkloadObject>;
}

/// ContainerVersion declaration client
#[async_trait]
pub trait ContainerVersionClient: Send + Sync {
    /// Get a declaration by name
    async fn get(&self, namespace: &str, name: &str) -> Result<ContainerVersion>;

    /// List every declaration in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<ContainerVersion>>;

    /// Write the status sub-record of `cv`, failing with a conflict if the
    /// stored resource version no longer matches
    async fn update_status(&self, namespace: &str, cv: &ContainerVersion)
    -> Result<ContainerVersion>;
}

/// Typed access to one variant of `WorkloadObject`
pub trait WorkloadResource: Clone + Send + Sync + Sized + 'static {
    const KIND: WorkloadKind;

    fn from_object(object: WorkloadObject) -> Option<Self>;

    fn into_object(self) -> WorkloadObject;
}

macro_rules! workload_resource {
    ($($ty:ident),* $(,)?) => {
        $(
            impl WorkloadResource for $ty {
                const KIND: WorkloadKind = WorkloadKind::$ty;

                fn from_object(object: WorkloadObject) -> Option<Self> {
                    match object {
                        WorkloadObject::$ty(o) => Some(o),
                        _ => None,
                    }
                }

                fn into_object(self) -> WorkloadObject {
                    WorkloadObject::$ty(self)
                }
            }

            impl From<$ty> for WorkloadObject {
                fn from(o: $ty) -> Self {
                    WorkloadObject::$ty(o)
                }
            }
        )*
    };
}

workload_resource!(Deployment, CronJob, DaemonSet, Job, Pod, ReplicaSet, StatefulSet);
