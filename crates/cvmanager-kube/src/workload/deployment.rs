//! Deployment adapter

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};

use super::{
    TemplateWorkload, Workload, WorkloadContext, at_or_after, object_name, patch_container_image,
    resource_from_spec,
};
use crate::error::Result;
use crate::selector;

/// A Deployment. Pods belong to it through its ReplicaSets, so ownership is
/// decided by the Deployment's label selector.
pub struct DeploymentWorkload {
    ctx: WorkloadContext,
    deployment: Deployment,
}

impl DeploymentWorkload {
    pub fn new(ctx: WorkloadContext, deployment: Deployment) -> Self {
        Self { ctx, deployment }
    }

    /// The wrapped object
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }
}

/// Rollout health of a Deployment
///
/// Unhealthy once the controller reports the progress deadline exceeded after
/// `start_time`. Healthy once the latest generation is observed and every
/// desired replica is updated, ready and available with no old replicas left.
pub fn deployment_health(deployment: &Deployment, start_time: DateTime<Utc>) -> Option<bool> {
    let status = deployment.status.as_ref()?;

    let deadline_exceeded = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing"
            && c.status == "False"
            && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
            && at_or_after(c.last_update_time.as_ref(), start_time)
    });
    if deadline_exceeded {
        return Some(false);
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let observed = status.observed_generation.unwrap_or(0)
        >= deployment.metadata.generation.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if observed && total == desired && updated == desired && ready == desired && available == desired
    {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for DeploymentWorkload {
    fn name(&self) -> &str {
        object_name(&self.deployment.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    fn pod_spec(&self) -> PodSpec {
        self.pod_template_spec().spec.unwrap_or_default()
    }

    async fn patch_pod_spec(
        &mut self,
        cv: &ContainerVersion,
        container: &str,
        version: &str,
    ) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(deployment = %name, container, version, "patching pod spec");

        self.deployment = self
            .ctx
            .update(&name, |d: &mut Deployment| {
                let spec = d
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::Deployment, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx
            .rollback_after(&self.deployment.metadata)
            .or_else(|| {
                self.deployment
                    .spec
                    .as_ref()
                    .and_then(|s| s.progress_deadline_seconds)
                    .and_then(|secs| u64::try_from(secs).ok())
                    .map(Duration::from_secs)
            })
    }

    async fn progress_health(&self, start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: Deployment = self.ctx.get(self.name()).await?;
        Ok(deployment_health(&live, start_time))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let available = self
            .deployment
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        resource_from_spec(
            WorkloadKind::Deployment,
            &self.deployment.metadata,
            self.namespace(),
            &self.pod_spec(),
            cv,
            available,
        )
    }

    fn as_template(&self) -> Option<&dyn TemplateWorkload> {
        Some(self)
    }

    fn as_template_mut(&mut self) -> Option<&mut dyn TemplateWorkload> {
        Some(self)
    }
}

#[async_trait]
impl TemplateWorkload for DeploymentWorkload {
    fn pod_template_spec(&self) -> PodTemplateSpec {
        self.deployment
            .spec
            .as_ref()
            .map(|s| s.template.clone())
            .unwrap_or_default()
    }

    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>> {
        let deployments: Vec<Deployment> = self.ctx.list(selector).await?;
        Ok(deployments
            .into_iter()
            .map(|d| Box::new(Self::new(self.ctx.clone(), d)) as Box<dyn TemplateWorkload>)
            .collect())
    }

    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>> {
        let Some(label_selector) = self.deployment.spec.as_ref().map(|s| &s.selector) else {
            return Ok(Vec::new());
        };

        let mut owned = Vec::new();
        for pod in pods {
            if selector::matches(label_selector, pod.metadata.labels.as_ref())? {
                owned.push(pod);
            }
        }
        Ok(owned)
    }

    fn num_replicas(&self) -> i32 {
        self.deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1)
    }

    async fn patch_num_replicas(&mut self, num: i32) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(deployment = %name, replicas = num, "patching replicas");

        self.deployment = self
            .ctx
            .update(&name, |d: &mut Deployment| {
                d.spec.get_or_insert_with(Default::default).replicas = Some(num);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockCluster, WorkloadObject};
    use crate::workload::fixtures::{NAMESPACE, context, cv, from_yaml};
    use chrono::TimeZone;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  generation: 4
  labels:
    app: web
  annotations:
    cvmanager.io/rollback-after: 5m
spec:
  replicas: 3
  progressDeadlineSeconds: 600
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
        - name: app
          image: registry.example.com/app:v1
        - name: proxy
          image: envoy:1.29
status:
  observedGeneration: 4
  replicas: 3
  updatedReplicas: 3
  readyReplicas: 3
  availableReplicas: 3
"#;

    fn setup() -> (MockCluster, DeploymentWorkload) {
        let cluster = MockCluster::new();
        let deployment: Deployment = from_yaml(DEPLOYMENT);
        cluster.insert_workload(NAMESPACE, WorkloadObject::Deployment(deployment));

        let live = match cluster.workload(NAMESPACE, WorkloadKind::Deployment, "web") {
            Some(WorkloadObject::Deployment(d)) => d,
            other => panic!("unexpected {:?}", other),
        };
        let workload = DeploymentWorkload::new(context(&cluster), live);
        (cluster, workload)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_accessors() {
        let (_, workload) = setup();
        assert_eq!(workload.name(), "web");
        assert_eq!(workload.namespace(), NAMESPACE);
        assert_eq!(workload.kind(), WorkloadKind::Deployment);
        assert_eq!(workload.pod_spec().containers.len(), 2);
        assert_eq!(workload.num_replicas(), 3);
        assert!(workload.as_template().is_some());
    }

    #[test]
    fn test_rollback_after_prefers_annotation() {
        let (_, workload) = setup();
        assert_eq!(workload.rollback_after(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_rollback_after_falls_back_to_progress_deadline() {
        let (cluster, _) = setup();
        let mut deployment: Deployment = from_yaml(DEPLOYMENT);
        deployment.metadata.annotations = None;

        let workload = DeploymentWorkload::new(context(&cluster), deployment);
        assert_eq!(workload.rollback_after(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_rollback_after_ignores_overflowing_annotation() {
        let (cluster, _) = setup();
        let mut deployment: Deployment = from_yaml(DEPLOYMENT);
        deployment.metadata.annotations = Some(
            [(
                "cvmanager.io/rollback-after".to_string(),
                "99999999999999999h".to_string(),
            )]
            .into(),
        );

        let workload = DeploymentWorkload::new(context(&cluster), deployment);
        assert_eq!(workload.rollback_after(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_as_resource_is_pure() {
        let (cluster, workload) = setup();
        cluster.reset_counts();
        let cv = cv("web-cv", "web");

        let first = workload.as_resource(&cv).unwrap();
        let second = workload.as_resource(&cv).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.version, "v1");
        assert_eq!(first.available_pods, 3);
        assert_eq!(cluster.operation_counts().gets, 0);
    }

    #[tokio::test]
    async fn test_patch_pod_spec() {
        let (cluster, mut workload) = setup();
        let cv = cv("web-cv", "web");

        workload.patch_pod_spec(&cv, "app", "v2").await.unwrap();

        let stored = match cluster.workload(NAMESPACE, WorkloadKind::Deployment, "web") {
            Some(WorkloadObject::Deployment(d)) => d,
            other => panic!("unexpected {:?}", other),
        };
        let image = stored.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("registry.example.com/app:v2"));
        assert_eq!(workload.as_resource(&cv).unwrap().version, "v2");

        // Re-applying the same version still writes and succeeds
        workload.patch_pod_spec(&cv, "app", "v2").await.unwrap();
        assert_eq!(cluster.operation_counts().replaces, 2);
    }

    #[tokio::test]
    async fn test_patch_pod_spec_unknown_container() {
        let (cluster, mut workload) = setup();
        let cv = cv("web-cv", "web");

        let err = workload.patch_pod_spec(&cv, "missing", "v2").await.unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(cluster.operation_counts().replaces, 0);
    }

    #[tokio::test]
    async fn test_patch_num_replicas() {
        let (cluster, mut workload) = setup();
        workload.patch_num_replicas(5).await.unwrap();
        assert_eq!(workload.num_replicas(), 5);

        let stored = match cluster.workload(NAMESPACE, WorkloadKind::Deployment, "web") {
            Some(WorkloadObject::Deployment(d)) => d,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(stored.spec.unwrap().replicas, Some(5));
    }

    #[tokio::test]
    async fn test_progress_health_complete() {
        let (_, workload) = setup();
        assert_eq!(workload.progress_health(start()).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_progress_health_reads_live_object() {
        let (cluster, workload) = setup();
        let mut rolling: Deployment = from_yaml(DEPLOYMENT);
        rolling.status.as_mut().unwrap().updated_replicas = Some(1);
        cluster.insert_workload(NAMESPACE, WorkloadObject::Deployment(rolling));

        assert_eq!(workload.progress_health(start()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_progress_health_not_found_is_error() {
        let cluster = MockCluster::new();
        let workload = DeploymentWorkload::new(context(&cluster), from_yaml(DEPLOYMENT));

        let err = workload.progress_health(start()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_deployment_health_deadline_exceeded() {
        let mut deployment: Deployment = from_yaml(DEPLOYMENT);
        let status = deployment.status.as_mut().unwrap();
        status.updated_replicas = Some(1);
        status.conditions = Some(from_yaml(
            r#"
- type: Progressing
  status: "False"
  reason: ProgressDeadlineExceeded
  lastUpdateTime: "2024-03-01T12:10:00Z"
"#,
        ));
        assert_eq!(deployment_health(&deployment, start()), Some(false));

        // A deadline exceeded before this rollout started is stale
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(deployment_health(&deployment, later), None);
    }

    #[test]
    fn test_deployment_health_unobserved_generation() {
        let mut deployment: Deployment = from_yaml(DEPLOYMENT);
        deployment.metadata.generation = Some(5);
        assert_eq!(deployment_health(&deployment, start()), None);
    }

    #[test]
    fn test_deployment_health_no_status() {
        let mut deployment: Deployment = from_yaml(DEPLOYMENT);
        deployment.status = None;
        assert_eq!(deployment_health(&deployment, start()), None);
    }

    #[tokio::test]
    async fn test_select() {
        let (cluster, workload) = setup();
        let mut other: Deployment = from_yaml(DEPLOYMENT);
        other.metadata.name = Some("web-canary".to_string());
        cluster.insert_workload(NAMESPACE, WorkloadObject::Deployment(other));

        let selected = workload
            .select(&[("app".to_string(), "web".to_string())].into())
            .await
            .unwrap();
        let names: Vec<_> = selected.iter().map(|w| w.name().to_string()).collect();
        assert_eq!(names, vec!["web", "web-canary"]);
    }

    #[test]
    fn test_select_own_pods_by_selector() {
        let (_, workload) = setup();
        let pods: Vec<Pod> = from_yaml(
            r#"
- apiVersion: v1
  kind: Pod
  metadata:
    name: web-abc
    labels:
      app: web
- apiVersion: v1
  kind: Pod
  metadata:
    name: api-xyz
    labels:
      app: api
"#,
        );

        let owned = workload.select_own_pods(pods).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metadata.name.as_deref(), Some("web-abc"));
    }
}
