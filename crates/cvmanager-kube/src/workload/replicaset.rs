//! ReplicaSet adapter

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};

use super::{
    TemplateWorkload, Workload, WorkloadContext, object_name, patch_container_image,
    pods_controlled_by, resource_from_spec,
};
use crate::error::Result;

pub struct ReplicaSetWorkload {
    ctx: WorkloadContext,
    replicaset: ReplicaSet,
}

impl ReplicaSetWorkload {
    pub fn new(ctx: WorkloadContext, replicaset: ReplicaSet) -> Self {
        Self { ctx, replicaset }
    }
}

/// Rollout health of a ReplicaSet: healthy once every desired replica is
/// ready and available.
pub fn replicaset_health(rs: &ReplicaSet) -> Option<bool> {
    let status = rs.status.as_ref()?;

    let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if status.replicas == desired && ready == desired && available == desired {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for ReplicaSetWorkload {
    fn name(&self) -> &str {
        object_name(&self.replicaset.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::ReplicaSet
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
        tracing::debug!(replicaset = %name, container, version, "patching pod spec");

        self.replicaset = self
            .ctx
            .update(&name, |r: &mut ReplicaSet| {
                let spec = r
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .get_or_insert_with(Default::default)
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::ReplicaSet, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.replicaset.metadata)
    }

    async fn progress_health(&self, _start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: ReplicaSet = self.ctx.get(self.name()).await?;
        Ok(replicaset_health(&live))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let available = self
            .replicaset
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        resource_from_spec(
            WorkloadKind::ReplicaSet,
            &self.replicaset.metadata,
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
impl TemplateWorkload for ReplicaSetWorkload {
    fn pod_template_spec(&self) -> PodTemplateSpec {
        self.replicaset
            .spec
            .as_ref()
            .and_then(|s| s.template.clone())
            .unwrap_or_default()
    }

    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>> {
        let sets: Vec<ReplicaSet> = self.ctx.list(selector).await?;
        Ok(sets
            .into_iter()
            .map(|r| Box::new(Self::new(self.ctx.clone(), r)) as Box<dyn TemplateWorkload>)
            .collect())
    }

    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>> {
        Ok(pods_controlled_by(self.replicaset.metadata.uid.as_deref(), pods))
    }

    fn num_replicas(&self) -> i32 {
        self.replicaset
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1)
    }

    async fn patch_num_replicas(&mut self, num: i32) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(replicaset = %name, replicas = num, "patching replicas");

        self.replicaset = self
            .ctx
            .update(&name, |r: &mut ReplicaSet| {
                r.spec.get_or_insert_with(Default::default).replicas = Some(num);
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

    const REPLICASET: &str = r#"
apiVersion: apps/v1
kind: ReplicaSet
metadata:
  name: web-5d8f
  uid: 0b7e2c1d-0000-4000-8000-000000000002
  labels:
    app: web
spec:
  replicas: 2
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
          image: registry.example.com/app:v5
status:
  replicas: 2
  readyReplicas: 2
  availableReplicas: 1
"#;

    #[test]
    fn test_replicaset_health() {
        let mut rs: ReplicaSet = from_yaml(REPLICASET);
        assert_eq!(replicaset_health(&rs), None);

        rs.status.as_mut().unwrap().available_replicas = Some(2);
        assert_eq!(replicaset_health(&rs), Some(true));
    }

    #[tokio::test]
    async fn test_patch_pod_spec_and_replicas() {
        let cluster = MockCluster::new();
        cluster.insert_workload(NAMESPACE, WorkloadObject::ReplicaSet(from_yaml(REPLICASET)));
        let mut workload = ReplicaSetWorkload::new(context(&cluster), from_yaml(REPLICASET));
        let cv = cv("web-cv", "web");

        workload.patch_pod_spec(&cv, "app", "v6").await.unwrap();
        workload.patch_num_replicas(4).await.unwrap();

        let resource = workload.as_resource(&cv).unwrap();
        assert_eq!(resource.version, "v6");
        assert_eq!(workload.num_replicas(), 4);
        assert_eq!(cluster.operation_counts().replaces, 2);
    }

    #[tokio::test]
    async fn test_select_own_pods_by_owner() {
        let cluster = MockCluster::new();
        let workload = ReplicaSetWorkload::new(context(&cluster), from_yaml(REPLICASET));
        let pods: Vec<Pod> = from_yaml(
            r#"
- apiVersion: v1
  kind: Pod
  metadata:
    name: web-5d8f-a
    ownerReferences:
      - apiVersion: apps/v1
        kind: ReplicaSet
        name: web-5d8f
        uid: 0b7e2c1d-0000-4000-8000-000000000002
        controller: true
- apiVersion: v1
  kind: Pod
  metadata:
    name: web-old-b
    ownerReferences:
      - apiVersion: apps/v1
        kind: ReplicaSet
        name: web-old
        uid: 0b7e2c1d-0000-4000-8000-000000000099
        controller: true
"#,
        );

        let owned = workload.select_own_pods(pods).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metadata.name.as_deref(), Some("web-5d8f-a"));
    }
}
