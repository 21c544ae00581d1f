//! StatefulSet adapter

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};

use super::{
    TemplateWorkload, Workload, WorkloadContext, object_name, patch_container_image,
    pods_controlled_by, resource_from_spec,
};
use crate::error::Result;

/// A StatefulSet. Pods are replaced in ordinal order, so a rollout is only
/// complete once the current revision has caught up with the update revision.
pub struct StatefulSetWorkload {
    ctx: WorkloadContext,
    statefulset: StatefulSet,
}

impl StatefulSetWorkload {
    pub fn new(ctx: WorkloadContext, statefulset: StatefulSet) -> Self {
        Self { ctx, statefulset }
    }
}

/// Rollout health of a StatefulSet
///
/// Healthy when all replicas are ready and current and the current revision
/// matches the update revision.
pub fn statefulset_health(sts: &StatefulSet) -> Option<bool> {
    let status = sts.status.as_ref()?;

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    let current = status.current_replicas.unwrap_or(0);
    let revision_match = status.current_revision.is_some()
        && status.current_revision == status.update_revision;

    if ready == desired && current == desired && revision_match {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for StatefulSetWorkload {
    fn name(&self) -> &str {
        object_name(&self.statefulset.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
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
        tracing::debug!(statefulset = %name, container, version, "patching pod spec");

        self.statefulset = self
            .ctx
            .update(&name, |s: &mut StatefulSet| {
                let spec = s
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::StatefulSet, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.statefulset.metadata)
    }

    async fn progress_health(&self, _start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: StatefulSet = self.ctx.get(self.name()).await?;
        Ok(statefulset_health(&live))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let available = self
            .statefulset
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        resource_from_spec(
            WorkloadKind::StatefulSet,
            &self.statefulset.metadata,
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
impl TemplateWorkload for StatefulSetWorkload {
    fn pod_template_spec(&self) -> PodTemplateSpec {
        self.statefulset
            .spec
            .as_ref()
            .map(|s| s.template.clone())
            .unwrap_or_default()
    }

    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>> {
        let sets: Vec<StatefulSet> = self.ctx.list(selector).await?;
        Ok(sets
            .into_iter()
            .map(|s| Box::new(Self::new(self.ctx.clone(), s)) as Box<dyn TemplateWorkload>)
            .collect())
    }

    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>> {
        Ok(pods_controlled_by(
            self.statefulset.metadata.uid.as_deref(),
            pods,
        ))
    }

    fn num_replicas(&self) -> i32 {
        self.statefulset
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1)
    }

    async fn patch_num_replicas(&mut self, num: i32) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(statefulset = %name, replicas = num, "patching replicas");

        self.statefulset = self
            .ctx
            .update(&name, |s: &mut StatefulSet| {
                s.spec.get_or_insert_with(Default::default).replicas = Some(num);
                Ok(())
            })
            .await?;
        Ok(())
    }
}
