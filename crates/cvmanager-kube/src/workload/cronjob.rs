//! CronJob adapter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::PodSpec;

use super::{Workload, WorkloadContext, object_name, patch_container_image, resource_from_spec};
use crate::error::Result;

/// A CronJob. Its pods come from jobs it creates on schedule, so it has no
/// pod template of its own and only offers the base contract.
pub struct CronJobWorkload {
    ctx: WorkloadContext,
    cronjob: CronJob,
}

impl CronJobWorkload {
    pub fn new(ctx: WorkloadContext, cronjob: CronJob) -> Self {
        Self { ctx, cronjob }
    }
}

/// Rollout health of a CronJob: healthy once a job finished successfully at
/// or after `start_time`. A CronJob never reports a failed rollout.
pub fn cronjob_health(cronjob: &CronJob, start_time: DateTime<Utc>) -> Option<bool> {
    let last_success = cronjob.status.as_ref()?.last_successful_time.as_ref()?;
    (last_success.0 >= start_time).then_some(true)
}

#[async_trait]
impl Workload for CronJobWorkload {
    fn name(&self) -> &str {
        object_name(&self.cronjob.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::CronJob
    }

    fn pod_spec(&self) -> PodSpec {
        self.cronjob
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|j| j.template.spec.clone())
            .unwrap_or_default()
    }

    async fn patch_pod_spec(
        &mut self,
        cv: &ContainerVersion,
        container: &str,
        version: &str,
    ) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(cronjob = %name, container, version, "patching pod spec");

        self.cronjob = self
            .ctx
            .update(&name, |c: &mut CronJob| {
                let spec = c
                    .spec
                    .get_or_insert_with(Default::default)
                    .job_template
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::CronJob, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.cronjob.metadata)
    }

    async fn progress_health(&self, start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: CronJob = self.ctx.get(self.name()).await?;
        Ok(cronjob_health(&live, start_time))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let active = self
            .cronjob
            .status
            .as_ref()
            .and_then(|s| s.active.as_ref())
            .map_or(0, |a| i32::try_from(a.len()).unwrap_or(i32::MAX));
        resource_from_spec(
            WorkloadKind::CronJob,
            &self.cronjob.metadata,
            self.namespace(),
            &self.pod_spec(),
            cv,
            active,
        )
    }
}
