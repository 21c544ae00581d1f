//! Clients backed by a live Kubernetes API server

use async_trait::async_trait;
use cvmanager_core::{ContainerVersion, WorkloadKind};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource as KubeResource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use super::{ContainerVersionClient, WorkloadClient, WorkloadObject};
use crate::error::{KubeError, Result};

const CONTAINER_VERSION_KIND: &str = "ContainerVersion";

/// Workload client using the typed k8s-openapi APIs
#[derive(Clone)]
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a client from the default kubeconfig / in-cluster environment
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create with an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the underlying Kubernetes client
    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: KubeResource<Scope = NamespaceResourceScope>,
        <K as KubeResource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_items<K>(&self, namespace: &str, selector: &str) -> Result<Vec<K>>
    where
        K: KubeResource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as KubeResource>::DynamicType: Default,
    {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }

        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn get_item<K>(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<K>
    where
        K: KubeResource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as KubeResource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| KubeError::from_kube(e, kind.as_str(), name, namespace))
    }

    async fn replace_item<K>(&self, kind: WorkloadKind, namespace: &str, object: &K) -> Result<K>
    where
        K: KubeResource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as KubeResource>::DynamicType: Default,
    {
        let name = object.meta().name.clone().unwrap_or_default();
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| KubeError::from_kube(e, kind.as_str(), &name, namespace))
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadObject>> {
        let objects = match kind {
            WorkloadKind::Deployment => self
                .list_items::<Deployment>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::Deployment)
                .collect(),
            WorkloadKind::CronJob => self
                .list_items::<CronJob>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::CronJob)
                .collect(),
            WorkloadKind::DaemonSet => self
                .list_items::<DaemonSet>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::DaemonSet)
                .collect(),
            WorkloadKind::Job => self
                .list_items::<Job>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::Job)
                .collect(),
            WorkloadKind::Pod => self
                .list_items::<Pod>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::Pod)
                .collect(),
            WorkloadKind::ReplicaSet => self
                .list_items::<ReplicaSet>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::ReplicaSet)
                .collect(),
            WorkloadKind::StatefulSet => self
                .list_items::<StatefulSet>(namespace, selector)
                .await?
                .into_iter()
                .map(WorkloadObject::StatefulSet)
                .collect(),
        };

        Ok(objects)
    }

    async fn get(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<WorkloadObject> {
        let object = match kind {
            WorkloadKind::Deployment => {
                WorkloadObject::Deployment(self.get_item(kind, namespace, name).await?)
            }
            WorkloadKind::CronJob => {
                WorkloadObject::CronJob(self.get_item(kind, namespace, name).await?)
            }
            WorkloadKind::DaemonSet => {
                WorkloadObject::DaemonSet(self.get_item(kind, namespace, name).await?)
            }
            WorkloadKind::Job => WorkloadObject::Job(self.get_item(kind, namespace, name).await?),
            WorkloadKind::Pod => WorkloadObject::Pod(self.get_item(kind, namespace, name).await?),
            WorkloadKind::ReplicaSet => {
                WorkloadObject::ReplicaSet(self.get_item(kind, namespace, name).await?)
            }
            WorkloadKind::StatefulSet => {
                WorkloadObject::StatefulSet(self.get_item(kind, namespace, name).await?)
            }
        };

        Ok(object)
    }

    async fn replace(&self, namespace: &str, object: &WorkloadObject) -> Result<WorkloadObject> {
        let kind = object.kind();
        let replaced = match object {
            WorkloadObject::Deployment(o) => {
                WorkloadObject::Deployment(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::CronJob(o) => {
                WorkloadObject::CronJob(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::DaemonSet(o) => {
                WorkloadObject::DaemonSet(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::Job(o) => {
                WorkloadObject::Job(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::Pod(o) => {
                WorkloadObject::Pod(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::ReplicaSet(o) => {
                WorkloadObject::ReplicaSet(self.replace_item(kind, namespace, o).await?)
            }
            WorkloadObject::StatefulSet(o) => {
                WorkloadObject::StatefulSet(self.replace_item(kind, namespace, o).await?)
            }
        };

        Ok(replaced)
    }
}

/// ContainerVersion client backed by the custom resource API
#[derive(Clone)]
pub struct KubeContainerVersionClient {
    client: Client,
}

impl KubeContainerVersionClient {
    /// Create a client from the default kubeconfig / in-cluster environment
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create with an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ContainerVersion> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ContainerVersionClient for KubeContainerVersionClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<ContainerVersion> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| KubeError::from_kube(e, CONTAINER_VERSION_KIND, name, namespace))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ContainerVersion>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update_status(
        &self,
        namespace: &str,
        cv: &ContainerVersion,
    ) -> Result<ContainerVersion> {
        let name = cv.metadata.name.as_deref().unwrap_or_default();

        // A resourceVersion in a merge patch is enforced as a precondition by
        // the API server, which turns a stale write into a 409.
        let mut patch = serde_json::Map::new();
        if let Some(rv) = &cv.metadata.resource_version {
            patch.insert(
                "metadata".to_string(),
                serde_json::json!({ "resourceVersion": rv }),
            );
        }
        patch.insert("status".to_string(), serde_json::to_value(&cv.status)?);
        let patch = serde_json::Value::Object(patch);

        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| KubeError::from_kube(e, CONTAINER_VERSION_KIND, name, namespace))
    }
}
