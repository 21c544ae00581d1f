//! Pod adapter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, Resource, WorkloadKind};
use k8s_openapi::api::core::v1::{Pod, PodSpec};

use super::{Workload, WorkloadContext, object_name, patch_container_image, resource_from_spec};
use crate::error::Result;

/// Waiting reasons that will not resolve without a new image
const FATAL_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
];

/// A bare pod. It has no template, so it only offers the base contract.
pub struct PodWorkload {
    ctx: WorkloadContext,
    pod: Pod,
}

impl PodWorkload {
    pub fn new(ctx: WorkloadContext, pod: Pod) -> Self {
        Self { ctx, pod }
    }
}

fn is_running_and_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let statuses = status.container_statuses.as_deref().unwrap_or_default();

    status.phase.as_deref() == Some("Running")
        && !statuses.is_empty()
        && statuses.iter().all(|c| c.ready)
}

/// Rollout health of a pod
///
/// Healthy when running with every container ready. Unhealthy when the pod
/// failed or a container is stuck pulling or crash looping.
pub fn pod_health(pod: &Pod) -> Option<bool> {
    let status = pod.status.as_ref()?;

    if status.phase.as_deref() == Some("Failed") {
        return Some(false);
    }

    let stuck = status.container_statuses.iter().flatten().any(|c| {
        c.state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            .is_some_and(|reason| FATAL_WAITING_REASONS.contains(&reason))
    });
    if stuck {
        return Some(false);
    }

    if is_running_and_ready(pod) {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl Workload for PodWorkload {
    fn name(&self) -> &str {
        object_name(&self.pod.metadata)
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Pod
    }

    fn pod_spec(&self) -> PodSpec {
        self.pod.spec.clone().unwrap_or_default()
    }

    async fn patch_pod_spec(
        &mut self,
        cv: &ContainerVersion,
        container: &str,
        version: &str,
    ) -> Result<()> {
        let name = self.name().to_string();
        tracing::debug!(pod = %name, container, version, "patching pod spec");

        self.pod = self
            .ctx
            .update(&name, |p: &mut Pod| {
                let spec = p.spec.get_or_insert_with(Default::default);
                patch_container_image(spec, cv, container, version, WorkloadKind::Pod, &name)
            })
            .await?;
        Ok(())
    }

    fn rollback_after(&self) -> Option<Duration> {
        self.ctx.rollback_after(&self.pod.metadata)
    }

    async fn progress_health(&self, _start_time: DateTime<Utc>) -> Result<Option<bool>> {
        let live: Pod = self.ctx.get(self.name()).await?;
        Ok(pod_health(&live))
    }

    fn as_resource(&self, cv: &ContainerVersion) -> Result<Resource> {
        let available = i32::from(is_running_and_ready(&self.pod));
        resource_from_spec(
            WorkloadKind::Pod,
            &self.pod.metadata,
            self.namespace(),
            &self.pod_spec(),
            cv,
            available,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockCluster, WorkloadObject};
    use crate::workload::fixtures::{NAMESPACE, context, cv, from_yaml};
    use chrono::TimeZone;

    const POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: worker
  labels:
    app: worker
spec:
  containers:
    - name: app
      image: registry.example.com/app:v4
status:
  phase: Running
  containerStatuses:
    - name: app
      image: registry.example.com/app:v4
      imageID: ""
      ready: true
      restartCount: 0
"#;

    fn waiting(reason: &str) -> Pod {
        from_yaml(&format!(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: worker
spec:
  containers:
    - name: app
      image: registry.example.com/app:v5
status:
  phase: Pending
  containerStatuses:
    - name: app
      image: registry.example.com/app:v5
      imageID: ""
      ready: false
      restartCount: 0
      state:
        waiting:
          reason: {reason}
"#
        ))
    }

    #[test]
    fn test_pod_health() {
        let pod: Pod = from_yaml(POD);
        assert_eq!(pod_health(&pod), Some(true));

        let mut failed = pod.clone();
        failed.status.as_mut().unwrap().phase = Some("Failed".to_string());
        assert_eq!(pod_health(&failed), Some(false));

        assert_eq!(pod_health(&waiting("ImagePullBackOff")), Some(false));
        assert_eq!(pod_health(&waiting("CrashLoopBackOff")), Some(false));
        assert_eq!(pod_health(&waiting("ContainerCreating")), None);
    }

    #[test]
    fn test_no_template_capabilities() {
        let cluster = MockCluster::new();
        let workload = PodWorkload::new(context(&cluster), from_yaml(POD));

        assert!(workload.as_template().is_none());
        assert_eq!(workload.kind(), WorkloadKind::Pod);
    }

    #[test]
    fn test_as_resource_counts_ready_pod() {
        let cluster = MockCluster::new();
        let cv = cv("worker-cv", "worker");

        let ready = PodWorkload::new(context(&cluster), from_yaml(POD));
        let resource = ready.as_resource(&cv).unwrap();
        assert_eq!(resource.version, "v4");
        assert_eq!(resource.available_pods, 1);

        let pending = PodWorkload::new(context(&cluster), waiting("ContainerCreating"));
        assert_eq!(pending.as_resource(&cv).unwrap().available_pods, 0);
    }

    #[tokio::test]
    async fn test_progress_health_reads_live_pod() {
        let cluster = MockCluster::new();
        cluster.insert_workload(NAMESPACE, WorkloadObject::Pod(waiting("ErrImagePull")));
        let workload = PodWorkload::new(context(&cluster), from_yaml(POD));

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(workload.progress_health(start).await.unwrap(), Some(false));
        assert_eq!(cluster.operation_counts().gets, 1);
    }

    #[tokio::test]
    async fn test_patch_pod_spec() {
        let cluster = MockCluster::new();
        cluster.insert_workload(NAMESPACE, WorkloadObject::Pod(from_yaml(POD)));
        let mut workload = PodWorkload::new(context(&cluster), from_yaml(POD));

        workload
            .patch_pod_spec(&cv("worker-cv", "worker"), "app", "v5")
            .await
            .unwrap();
        assert_eq!(
            workload.pod_spec().containers[0].image.as_deref(),
            Some("registry.example.com/app:v5")
        );
    }
}
