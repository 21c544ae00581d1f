//! Job adapter

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};

use super::{
    TemplateWorkload, Workload, WorkloadContext, at_or_after, object_name,
    patch_container_image, pods_controlled_by, resource_from_spec,
};
use crate::error::Result;

/// A Job. Its replica count is the parallelism of the job.
pub struct JobWorkload {
    ctx: WorkloadContext,
    job: Job,
}

impl JobWorkload {
    pub fn new(ctx: WorkloadContext, job: Job) -> Self {
        Self { ctx, job }
    }
}

/// Rollout health of a Job
///
/// Healthy once any pod has succeeded. Unhealthy when the job reports a
/// `Failed` condition raised at or after `start_time`.
pub fn job_health(job: &Job, start_time: DateTime<Utc>) -> Option<bool> {
    let status = job.status.as_ref()?;

    let failed = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Failed"
            && c.status == "True"
            && at_or_after(c.last_transition_time.as_ref(), start_time)
    });
    if failed {
        return Some(false);
    }

    if status.succeeded.unwrap_or(0) > 0 {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for JobWorkload {
    fn name(&self) -> &str {
        object_name(&self.job.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Job
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
        tracing::debug!(job = %name, container, version, "patching pod spec");

        self.job = self
            .ctx
            .update(&name, |j: &mut Job| {
                let spec = j
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
                    .spec
                    .get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::Job, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.job.metadata)
    }

    async fn progress_health(&self, start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: Job = self.ctx.get(self.name()).await?;
        Ok(job_health(&live, start_time))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let active = self
            .job
            .status
            .as_ref()
            .and_then(|s| s.active)
            .unwrap_or(0);
        resource_from_spec(
            WorkloadKind::Job,
            &self.job.metadata,
            self.namespace(),
            &self.pod_spec(),
            cv,
            active,
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
impl TemplateWorkload for JobWorkload {
    fn pod_template_spec(&self) -> PodTemplateSpec {
        self.job
            .spec
            .as_ref()
            .map(|s| s.template.clone())
            .unwrap_or_default()
    }

    async fn select(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn TemplateWorkload>>> {
        let jobs: Vec<Job> = self.ctx.list(selector).await?;
        Ok(jobs
            .into_iter()
            .map(|j| Box::new(Self::new(self.ctx.clone(), j)) as Box<dyn TemplateWorkload>)
            .collect())
    }

    fn select_own_pods(&self, pods: Vec<Pod>) -> Result<Vec<Pod>> {
        Ok(pods_controlled_by(self.job.metadata.uid.as_deref(), pods))
    }

    fn num_replicas(&self) -> i32 {
        self.job
            .spec
            .as_ref()
            .and_then(|s| s.parallelism)
            .unwrap_or(1)
    }

    async fn patch_num_replicas(&mut self, num: i32) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(job = %name, parallelism = num, "patching parallelism");

        self.job = self
            .ctx
            .update(&name, |j: &mut Job| {
                j.spec.get_or_insert_with(Default::default).parallelism = Some(num);
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

    const JOB: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  uid: 3f2a9b10-0000-4000-8000-000000000003
  labels:
    app: migrate
spec:
  template:
    metadata:
      labels:
        app: migrate
    spec:
      restartPolicy: Never
      containers:
        - name: app
          image: registry.example.com/app:v9
status:
  active: 1
"#;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_job_health() {
        let job: Job = from_yaml(JOB);
        assert_eq!(job_health(&job, start()), None);

        let mut done = job.clone();
        done.status.as_mut().unwrap().succeeded = Some(1);
        assert_eq!(job_health(&done, start()), Some(true));
    }

    #[test]
    fn test_job_health_failed_condition() {
        let job: Job = from_yaml(
            r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
spec:
  template:
    spec:
      containers:
        - name: app
          image: registry.example.com/app:v9
status:
  failed: 6
  conditions:
    - type: Failed
      status: "True"
      reason: BackoffLimitExceeded
      lastTransitionTime: "2024-03-01T12:05:00Z"
"#,
        );
        assert_eq!(job_health(&job, start()), Some(false));

        // a failure from an earlier rollout is not ours
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(job_health(&job, later), None);
    }

    #[test]
    fn test_accessors() {
        let cluster = MockCluster::new();
        let workload = JobWorkload::new(context(&cluster), from_yaml(JOB));

        assert_eq!(workload.num_replicas(), 1);
        let resource = workload.as_resource(&cv("migrate-cv", "migrate")).unwrap();
        assert_eq!(resource.kind, WorkloadKind::Job);
        assert_eq!(resource.version, "v9");
        assert_eq!(resource.available_pods, 1);
    }

    #[tokio::test]
    async fn test_patch_parallelism() {
        let cluster = MockCluster::new();
        cluster.insert_workload(NAMESPACE, WorkloadObject::Job(from_yaml(JOB)));
        let mut workload = JobWorkload::new(context(&cluster), from_yaml(JOB));

        workload.patch_num_replicas(3).await.unwrap();
        assert_eq!(workload.num_replicas(), 3);

        let stored = cluster.workload(NAMESPACE, WorkloadKind::Job, "migrate").unwrap();
        let WorkloadObject::Job(job) = stored else {
            panic!("expected a job");
        };
        assert_eq!(job.spec.unwrap().parallelism, Some(3));
    }
}
