//! Provider: discovery, aggregation and rollout status persistence for one namespace
//!
//! A `Provider` holds client handles and configuration only. Every call
//! re-queries the cluster, so one instance can be shared across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cvmanager_core::{ContainerVersion, ProviderOptions, Resource, RolloutStatus, WorkloadKind};
use futures::{StreamExt, TryStreamExt, stream};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource as KubeResource;

use crate::client::{
    ContainerVersionClient, KubeContainerVersionClient, KubeWorkloadClient, WorkloadClient,
    WorkloadObject,
};
use crate::error::{KubeError, Result};
use crate::events::{Event, EventRecorder, TracingRecorder, action, reason};
use crate::workload::{Workload, WorkloadContext};

/// Entry point for the reconciler
pub struct Provider {
    client: Arc<dyn WorkloadClient>,
    cv_client: Arc<dyn ContainerVersionClient>,
    namespace: String,
    options: ProviderOptions,
    recorder: Arc<dyn EventRecorder>,
}

impl Provider {
    /// Create a provider bound to `namespace` with default options
    pub fn new(
        client: Arc<dyn WorkloadClient>,
        cv_client: Arc<dyn ContainerVersionClient>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cv_client,
            namespace: namespace.into(),
            options: ProviderOptions::default(),
            recorder: Arc::new(TracingRecorder),
        }
    }

    /// Create a provider backed by a real Kubernetes client
    pub fn from_kube(client: kube::Client, namespace: impl Into<String>) -> Self {
        Self::new(
            Arc::new(KubeWorkloadClient::with_client(client.clone())),
            Arc::new(KubeContainerVersionClient::with_client(client)),
            namespace,
        )
    }

    /// Override the default options
    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    /// Route operational events to `recorder` instead of `tracing`
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Namespace this provider is bound to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Underlying workload client
    pub fn client(&self) -> &Arc<dyn WorkloadClient> {
        &self.client
    }

    /// Underlying ContainerVersion client
    pub fn cv_client(&self) -> &Arc<dyn ContainerVersionClient> {
        &self.cv_client
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// Look up a ContainerVersion declaration by name
    pub async fn cv(&self, name: &str) -> Result<ContainerVersion> {
        tracing::debug!(cv = %name, namespace = %self.namespace, "getting ContainerVersion");
        self.cv_client
            .get(&self.namespace, name)
            .await
            .map_err(|e| e.context(format!("failed to get ContainerVersion instance with name {}", name)))
    }

    /// Persist the outcome of a rollout on the declaration `name`.
    ///
    /// Reads the declaration, records `version`/`status`/`time` and writes the
    /// status back using the read resource version as a precondition. A
    /// conflicting concurrent write triggers a fresh read and another attempt,
    /// up to `conflict_retries` times. `success_version` only changes on
    /// `Success`.
    pub async fn update_rollout_status(
        &self,
        name: &str,
        version: &str,
        status: RolloutStatus,
        time: DateTime<Utc>,
    ) -> Result<ContainerVersion> {
        let mut attempt: u32 = 0;

        loop {
            match self.write_rollout_status(name, version, status, time).await {
                Ok(cv) => {
                    tracing::info!(
                        cv = %name,
                        namespace = %self.namespace,
                        version,
                        status = %status,
                        "rollout status updated"
                    );
                    self.recorder
                        .record(&Event::normal(
                            reason::STATUS_UPDATED,
                            action::UPDATE_STATUS,
                            cv.object_ref(&()),
                            format!("rollout of {} is {}", version, status),
                        ))
                        .await;
                    return Ok(cv);
                }
                Err(e) if e.is_conflict() && attempt < self.options.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(cv = %name, attempt, "status update conflicted, retrying");
                    tokio::time::sleep(self.options.retry_backoff).await;
                }
                Err(e) => {
                    let err = e.context(format!(
                        "failed to update rollout status of ContainerVersion {}",
                        name
                    ));
                    self.recorder
                        .record(&Event::warning(
                            reason::STATUS_UPDATE_FAILED,
                            action::UPDATE_STATUS,
                            self.cv_reference(name),
                            err.to_string(),
                        ))
                        .await;
                    return Err(err);
                }
            }
        }
    }

    async fn write_rollout_status(
        &self,
        name: &str,
        version: &str,
        status: RolloutStatus,
        time: DateTime<Utc>,
    ) -> Result<ContainerVersion> {
        let mut cv = self.cv(name).await?;
        cv.status
            .get_or_insert_with(Default::default)
            .record(version, status, time);
        self.cv_client.update_status(&self.namespace, &cv).await
    }

    /// Resources of every declaration in the namespace.
    ///
    /// A workload selected by more than one declaration is reported once per
    /// declaration; each such overlap is logged and recorded as an event. The
    /// first declaration that fails aborts the call.
    pub async fn all_resources(&self) -> Result<Vec<Resource>> {
        tracing::debug!(namespace = %self.namespace, "collecting resources of all ContainerVersions");
        let cvs = self
            .cv_client
            .list(&self.namespace)
            .await
            .map_err(|e| e.context("failed to get ContainerVersion instances"))?;

        let mut claims: HashMap<(WorkloadKind, String), String> = HashMap::new();
        let mut resources = Vec::new();

        for cv in &cvs {
            let cv_resources = self.cv_resources(cv).await?;

            for resource in &cv_resources {
                let key = (resource.kind, resource.name.clone());
                match claims.get(&key) {
                    Some(owner) if owner != &resource.cv => {
                        self.report_overlap(resource, owner, cv).await;
                    }
                    Some(_) => {}
                    None => {
                        claims.insert(key, resource.cv.clone());
                    }
                }
            }

            resources.extend(cv_resources);
        }

        Ok(resources)
    }

    async fn report_overlap(
        &self,
        resource: &Resource,
        first_owner: &str,
        cv: &ContainerVersion,
    ) {
        let message = format!(
            "{} {} is selected by ContainerVersions {} and {}",
            resource.kind, resource.name, first_owner, resource.cv
        );
        tracing::warn!(
            workload = %resource.display_name(),
            first = first_owner,
            second = %resource.cv,
            "overlapping ContainerVersion selectors"
        );
        self.recorder
            .record(
                &Event::warning(
                    reason::OVERLAPPING_SELECTOR,
                    action::COLLECT,
                    self.workload_reference(resource.kind, &resource.name),
                    message,
                )
                .related_to(cv.object_ref(&())),
            )
            .await;
    }

    /// Resources of every workload governed by `cv`.
    ///
    /// A selected workload that does not run the declared container is
    /// skipped with a warning event. Any other failure aborts the call.
    pub async fn cv_resources(&self, cv: &ContainerVersion) -> Result<Vec<Resource>> {
        let cv_name = cv.metadata.name.as_deref().unwrap_or_default();
        let in_context = |e: KubeError| {
            e.context(format!("failed to collect resources of ContainerVersion {}", cv_name))
        };

        let workloads = self.workloads(cv).await.map_err(in_context)?;
        let mut resources = Vec::with_capacity(workloads.len());

        for workload in &workloads {
            match workload.as_resource(cv) {
                Ok(resource) => resources.push(resource),
                Err(e @ KubeError::ContainerNotFound { .. }) => {
                    tracing::warn!(cv = %cv_name, error = %e, "skipping workload");
                    self.recorder
                        .record(
                            &Event::warning(
                                reason::CONTAINER_NOT_FOUND,
                                action::COLLECT,
                                self.workload_reference(workload.kind(), workload.name()),
                                e.to_string(),
                            )
                            .related_to(cv.object_ref(&())),
                        )
                        .await;
                }
                Err(e) => return Err(in_context(e)),
            }
        }

        Ok(resources)
    }

    /// Every workload matching the declaration's selector.
    ///
    /// Kinds are queried concurrently (bounded by `discovery_concurrency`) but
    /// the result is always ordered Deployments, CronJobs, DaemonSets, Jobs,
    /// Pods, ReplicaSets, StatefulSets. The first failing kind aborts the call
    /// and no partial result is returned.
    pub async fn workloads(&self, cv: &ContainerVersion) -> Result<Vec<Box<dyn Workload>>> {
        let cv_name = cv.metadata.name.as_deref().unwrap_or_default();
        let selector = cv.spec.label_selector();
        tracing::debug!(
            cv = %cv_name,
            namespace = %self.namespace,
            selector = %selector,
            "discovering workloads"
        );

        let client = &self.client;
        let namespace = self.namespace.as_str();
        let selector = selector.as_str();

        let listed: Result<Vec<Vec<WorkloadObject>>> = stream::iter(WorkloadKind::ALL)
            .map(|kind| async move {
                client
                    .list(kind, namespace, selector)
                    .await
                    .map_err(|e| KubeError::ListFailed {
                        kind,
                        source: Box::new(e),
                    })
            })
            .buffered(self.options.discovery_concurrency.max(1))
            .try_collect()
            .await;

        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(cv = %cv_name, error = %e, "workload discovery failed");
                self.recorder
                    .record(&Event::warning(
                        reason::SYNC_FAILED,
                        action::DISCOVER,
                        cv.object_ref(&()),
                        e.to_string(),
                    ))
                    .await;
                return Err(e);
            }
        };

        let ctx = WorkloadContext::new(
            self.client.clone(),
            self.namespace.clone(),
            self.options.rollback_after_annotation.clone(),
        );
        let workloads: Vec<Box<dyn Workload>> = listed
            .into_iter()
            .flatten()
            .map(|object| ctx.wrap(object))
            .collect();

        tracing::debug!(cv = %cv_name, count = workloads.len(), "discovered workloads");
        Ok(workloads)
    }

    fn cv_reference(&self, name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some(ContainerVersion::api_version(&()).into_owned()),
            kind: Some(ContainerVersion::kind(&()).into_owned()),
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }

    fn workload_reference(&self, kind: WorkloadKind, name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some(kind.api_version().to_string()),
            kind: Some(kind.as_str().to_string()),
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }
}
