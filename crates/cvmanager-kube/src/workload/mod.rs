//! Workload contracts and per-kind adapters
//!
//! Every deployable kind implements [`Workload`]. Kinds whose pods are stamped
//! out from a pod template (Deployment, DaemonSet, Job, ReplicaSet,
//! StatefulSet) also implement [`TemplateWorkload`], reachable from any
//! workload through [`Workload::as_template`].
//!
//! Accessors read the wrapped object. Operations that need current cluster
//! state (`patch_pod_spec`, `progress_health`, `patch_num_replicas`) re-read the
//! live object first.

mod cronjob;
mod daemonset;
mod deployment;
mod job;
mod pod;
mod replicaset;
mod statefulset;

pub use cronjob::CronJobWorkload;
pub use daemonset::DaemonSetWorkload;
pub use deployment::DeploymentWorkload;
pub use job::JobWorkload;
pub use pod::PodWorkload;
pub use replicaset::ReplicaSetWorkload;
pub use statefulset::StatefulSetWorkload;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind, image_version};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use crate::annotations::parse_rollback_after;
use crate::client::{WorkloadClient, WorkloadObject, WorkloadResource};
use crate::error::{KubeError, Result};

/// Something deployable, such as a Deployment, DaemonSet or Pod
#[async_trait]
pub trait Workload: Send + Sync {
    /// Name of the workload (without the namespace)
    fn name(&self) -> &str;

    /// Namespace the workload belongs to
    fn namespace(&self) -> &str;

    /// Kind of the workload
    fn kind(&self) -> WorkloadKind;

    /// Snapshot of the pod spec
    fn pod_spec(&self) -> PodSpec;

    /// Set the image of `container` to `<cv.spec.imageRepo>:<version>` and
    /// write the workload back to the cluster. Always issues a write, so
    /// re-applying a version is harmless.
    async fn patch_pod_spec(
        &mut self,
        cv: &ContainerVersion,
        container: &str,
        version: &str,
    ) -> Result<()>;

    /// Duration after which a failed rollout should be rolled back; `None`
    /// disables automatic rollback
    fn rollback_after(&self) -> Option<Duration>;

    /// Whether the rollout that started at `start_time` is healthy.
    ///
    /// `Ok(None)` means it cannot be decided yet. An error means health could
    /// not be evaluated and must not be read as unhealthy.
    async fn progress_health(&self, start_time: DateTime<Utc>) -> Result<Option<bool>>;

    /// Reporting summary of the workload for `cv`. Pure: makes no cluster calls.
    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource>;

    /// Template capabilities, for kinds that have them
    fn as_template(&self) -> Option<&dyn TemplateWorkload> {
        None
    }

    /// Mutable template capabilities, for kinds that have them
    fn as_template_mut(&mut self) -> Option<&mut dyn TemplateWorkload> {
        None
    }
}

/// A workload that manages a collection of pods through a pod template
#[async_trait]
pub trait TemplateWorkload: Workload {
    /// Template used to produce pods
    fn pod_template_spec(&self) -> PodTemplateSpec;

    /// All live workloads of this kind matching `selector`. May include this one.
    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>>;

    /// Pods from `pods` that are managed by this workload
    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>>;

    /// Desired number of replicas
    fn num_replicas(&self) -> i32;

    /// Change the desired number of replicas
    async fn patch_num_replicas(&mut self, num: i32) -> Result<()>;
}

/// Shared state handed to every adapter
#[derive(Clone)]
pub struct WorkloadContext {
    client: Arc<dyn WorkloadClient>,
    namespace: String,
    rollback_after_annotation: String,
}

impl WorkloadContext {
    pub fn new(
        client: Arc<dyn WorkloadClient>,
        namespace: impl Into<String>,
        rollback_after_annotation: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            rollback_after_annotation: rollback_after_annotation.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Wrap a raw object in its kind adapter
    pub fn wrap(&self, object: WorkloadObject) -> Box<dyn Workload> {
        match object {
            WorkloadObject::Deployment(o) => Box::new(DeploymentWorkload::new(self.clone(), o)),
            WorkloadObject::CronJob(o) => Box::new(CronJobWorkload::new(self.clone(), o)),
            WorkloadObject::DaemonSet(o) => Box::new(DaemonSetWorkload::new(self.clone(), o)),
            WorkloadObject::Job(o) => Box::new(JobWorkload::new(self.clone(), o)),
            WorkloadObject::Pod(o) => Box::new(PodWorkload::new(self.clone(), o)),
            WorkloadObject::ReplicaSet(o) => Box::new(ReplicaSetWorkload::new(self.clone(), o)),
            WorkloadObject::StatefulSet(o) => {
                Box::new(StatefulSetWorkload::new(self.clone(), o))
            }
        }
    }

    /// Read the rollback-after annotation from object metadata
    pub(crate) fn rollback_after(&self, meta: &ObjectMeta) -> Option<Duration> {
        parse_rollback_after(meta.annotations.as_ref(), &self.rollback_after_annotation)
    }

    /// Fetch the live object
    pub(crate) async fn get<T: WorkloadResource>(&self, name: &str) -> Result<T> {
        let object = self.client.get(T::KIND, &self.namespace, name).await?;
        typed(object)
    }

    /// Live objects of `T`'s kind matching `selector`
    pub(crate) async fn list<T: WorkloadResource>(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<T>> {
        let selector = crate::selector::selector_string(selector);
        self.client
            .list(T::KIND, &self.namespace, &selector)
            .await?
            .into_iter()
            .map(typed)
            .collect()
    }

    /// Read-modify-write of the live object
    pub(crate) async fn update<T, F>(&self, name: &str, mutate: F) -> Result<T>
    where
        T: WorkloadResource,
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        let mut live: T = self.get(name).await?;
        mutate(&mut live)?;

        let replaced = self
            .client
            .replace(&self.namespace, &live.into_object())
            .await?;
        typed(replaced)
    }
}

fn typed<T: WorkloadResource>(object: WorkloadObject) -> Result<T> {
    let kind = object.kind();
    T::from_object(object).ok_or_else(|| {
        KubeError::Serialization(format!("expected {} but the client returned {}", T::KIND, kind))
    })
}

fn object_name(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// Point `container` at `<cv.spec.imageRepo>:<version>`
fn patch_container_image(
    spec: &mut PodSpec,
    cv: &ContainerVersion,
    container: &str,
    version: &str,
    kind: WorkloadKind,
    name: &str,
) -> Result<()> {
    let target = spec
        .containers
        .iter_mut()
        .find(|c| c.name == container)
        .ok_or_else(|| KubeError::ContainerNotFound {
            container: container.to_string(),
            kind,
            name: name.to_string(),
        })?;

    target.image = Some(format!("{}:{}", cv.spec.image_repo, version));
    Ok(())
}

/// Build the reporting summary from the declaration's container in `spec`
fn resource_from_spec(
    kind: WorkloadKind,
    meta: &ObjectMeta,
    namespace: &str,
    spec: &PodSpec,
    cv: &ContainerVersion,
    available_pods: i32,
) -> Result<Resource> {
    let name = object_name(meta);
    let container_name = &cv.spec.container.name;

    let container = spec
        .containers
        .iter()
        .find(|c| &c.name == container_name)
        .ok_or_else(|| KubeError::ContainerNotFound {
            container: container_name.clone(),
            kind,
            name: name.to_string(),
        })?;

    let version = image_version(container.image.as_deref().unwrap_or_default())?;

    Ok(Resource {
        namespace: namespace.to_string(),
        name: name.to_string(),
        kind,
        container: container_name.clone(),
        version: version.to_string(),
        available_pods,
        cv: cv.metadata.name.clone().unwrap_or_default(),
        tag: cv.spec.tag.clone(),
    })
}

/// Pods whose controller owner reference points at `uid`
fn pods_controlled_by(uid: Option<&str>, pods: Vec<Pod>) -> Vec<Pod> {
    let Some(uid) = uid else {
        return Vec::new();
    };

    pods.into_iter()
        .filter(|pod| {
            pod.metadata
                .owner_references
                .iter()
                .flatten()
                .any(|r| r.uid == uid && r.controller.unwrap_or(false))
        })
        .collect()
}

/// Whether `time` is at or after `start`; an absent time counts as after
fn at_or_after(time: Option<&Time>, start: DateTime<Utc>) -> bool {
    time.is_none_or(|t| t.0 >= start)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::Container;

    fn spec_with(containers: &[(&str, Option<&str>)]) -> PodSpec {
        PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: image.map(|i| i.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_patch_container_image() {
        let cv = fixtures::cv("web", "web");
        let mut spec = spec_with(&[("sidecar", Some("envoy:1.0")), ("app", Some("old:1"))]);

        patch_container_image(&mut spec, &cv, "app", "v2", WorkloadKind::Deployment, "web")
            .unwrap();

        assert_eq!(
            spec.containers[1].image.as_deref(),
            Some("registry.example.com/app:v2")
        );
        assert_eq!(spec.containers[0].image.as_deref(), Some("envoy:1.0"));
    }

    #[test]
    fn test_patch_container_image_missing_container() {
        let cv = fixtures::cv("web", "web");
        let mut spec = spec_with(&[("sidecar", Some("envoy:1.0"))]);

        let err = patch_container_image(&mut spec, &cv, "app", "v2", WorkloadKind::Pod, "web")
            .unwrap_err();
        assert!(matches!(err, KubeError::ContainerNotFound { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_resource_from_spec() {
        let cv = fixtures::cv("web-cv", "web");
        let spec = spec_with(&[("app", Some("registry.example.com/app:v7"))]);

        let resource =
            resource_from_spec(WorkloadKind::StatefulSet, &meta("db"), "shop", &spec, &cv, 2)
                .unwrap();

        assert_eq!(resource.name, "db");
        assert_eq!(resource.kind, WorkloadKind::StatefulSet);
        assert_eq!(resource.version, "v7");
        assert_eq!(resource.available_pods, 2);
        assert_eq!(resource.cv, "web-cv");
        assert_eq!(resource.tag, "stable");
        assert_eq!(resource.container, "app");
    }

    #[test]
    fn test_resource_from_spec_rejects_untagged_image() {
        let cv = fixtures::cv("web-cv", "web");
        let spec = spec_with(&[("app", Some("registry/app"))]);

        let err = resource_from_spec(WorkloadKind::Pod, &meta("p"), "shop", &spec, &cv, 0)
            .unwrap_err();
        assert!(matches!(err, KubeError::InvalidImage(_)));
    }

    #[test]
    fn test_resource_from_spec_missing_image() {
        let cv = fixtures::cv("web-cv", "web");
        let spec = spec_with(&[("app", None)]);

        let err = resource_from_spec(WorkloadKind::Pod, &meta("p"), "shop", &spec, &cv, 0)
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_at_or_after() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let before = Time(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let after = Time(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());

        assert!(!at_or_after(Some(&before), start));
        assert!(at_or_after(Some(&after), start));
        assert!(at_or_after(None, start));
    }
}
