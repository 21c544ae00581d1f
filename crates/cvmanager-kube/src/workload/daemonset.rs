//! DaemonSet adapter

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};

use super::{
    TemplateWorkload, Workload, WorkloadContext, object_name, patch_container_image,
    pods_controlled_by, resource_from_spec,
};
use crate::error::{KubeError, Result};

/// A DaemonSet. It runs one pod per eligible node, so its replica count is
/// decided by the scheduler and cannot be patched.
pub struct DaemonSetWorkload {
    ctx: WorkloadContext,
    daemonset: DaemonSet,
}

impl DaemonSetWorkload {
    pub fn new(ctx: WorkloadContext, daemonset: DaemonSet) -> Self {
        Self { ctx, daemonset }
    }
}

/// Rollout health of a DaemonSet
///
/// Healthy when every scheduled pod is updated and ready.
pub fn daemonset_health(ds: &DaemonSet) -> Option<bool> {
    let status = ds.status.as_ref()?;

    let observed = status.observed_generation.unwrap_or(0) >= ds.metadata.generation.unwrap_or(0);
    let desired = status.desired_number_scheduled;
    let ready = status.number_ready;
    let updated = status.updated_number_scheduled.unwrap_or(0);

    if observed && desired > 0 && ready == desired && updated == desired {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for DaemonSetWorkload {
    fn name(&self) -> &str {
        object_name(&self.daemonset.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::DaemonSet
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
        tracing::debug!(daemonset = %name, container, version, "patching pod spec");

        self.daemonset = self
            .ctx
            .update(&name, |d: &mut DaemonSet| {
                let spec = d
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::DaemonSet, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.daemonset.metadata)
    }

    async fn progress_health(&self, _start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: DaemonSet = self.ctx.get(self.name()).await?;
        Ok(daemonset_health(&live))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let available = self
            .daemonset
            .status
            .as_ref()
            .and_then(|s| s.number_available)
            .unwrap_or(0);
        resource_from_spec(
            WorkloadKind::DaemonSet,
            &self.daemonset.metadata,
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
impl TemplateWorkload for DaemonSetWorkload {
    fn pod_template_spec(&self) -> PodTemplateSpec {
        self.daemonset
            .spec
            .as_ref()
            .map(|s| s.template.clone())
            .unwrap_or_default()
    }

    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>> {
        let sets: Vec<DaemonSet> = self.ctx.list(selector).await?;
        Ok(sets
            .into_iter()
            .map(|d| Box::new(Self::new(self.ctx.clone(), d)) as Box<dyn TemplateWorkload>)
            .collect())
    }

    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>> {
        Ok(pods_controlled_by(self.daemonset.metadata.uid.as_deref(), pods))
    }

    /// Number of nodes that should be running the daemon pod
    fn num_replicas(&self) -> i32 {
        self.daemonset
            .status
            .as_ref()
            .map(|s| s.desired_number_scheduled)
            .unwrap_or(0)
    }

    async fn patch_num_replicas(&mut self, _num: i32) -> Result<()> {
        Err(KubeError::Unsupported {
            operation: "patching replicas",
            kind: WorkloadKind::DaemonSet,
            name: self.name().to_string(),
        })
    }
}
