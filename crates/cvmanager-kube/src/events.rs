//! Operational events
//!
//! Failures the provider hits while syncing are reported through an
//! `EventRecorder` in addition to being returned to the caller. The default
//! recorder forwards events to `tracing`; `KubeEventRecorder` publishes them
//! as Kubernetes Events on the object they concern.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event as KubeEvent, Recorder};

pub use kube::runtime::events::{EventType, Reporter};

/// Maximum size of an event note accepted by the API server
const MAX_NOTE_BYTES: usize = 1024;

/// Well-known event reasons
pub mod reason {
    /// A per-kind workload listing failed
    pub const SYNC_FAILED: &str = "CRSyncFailed";
    /// A rollout status was persisted
    pub const STATUS_UPDATED: &str = "RolloutStatusUpdated";
    /// Persisting a rollout status failed
    pub const STATUS_UPDATE_FAILED: &str = "RolloutStatusUpdateFailed";
    /// Two declarations select the same workload
    pub const OVERLAPPING_SELECTOR: &str = "OverlappingSelector";
    /// A selected workload does not run the declared container
    pub const CONTAINER_NOT_FOUND: &str = "ContainerNotFound";
}

/// Actions events are reported for
pub mod action {
    pub const DISCOVER: &str = "DiscoverWorkloads";
    pub const COLLECT: &str = "CollectResources";
    pub const UPDATE_STATUS: &str = "UpdateRolloutStatus";
}

/// An operational event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub type_: EventType,
    pub reason: &'static str,
    pub action: &'static str,
    pub message: String,
    /// Object the event is about
    pub regarding: ObjectReference,
    /// Second object involved, such as the declaration selecting a workload
    pub related: Option<ObjectReference>,
}

impl Event {
    pub fn normal(
        reason: &'static str,
        action: &'static str,
        regarding: ObjectReference,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: EventType::Normal,
            reason,
            action,
            message: message.into(),
            regarding,
            related: None,
        }
    }

    pub fn warning(
        reason: &'static str,
        action: &'static str,
        regarding: ObjectReference,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: EventType::Warning,
            ..Self::normal(reason, action, regarding, message)
        }
    }

    pub fn related_to(mut self, related: ObjectReference) -> Self {
        self.related = Some(related);
        self
    }

    /// `namespace/name` of the object the event is about
    pub fn object(&self) -> String {
        format!(
            "{}/{}",
            self.regarding.namespace.as_deref().unwrap_or_default(),
            self.regarding.name.as_deref().unwrap_or_default()
        )
    }

    fn to_kube_event(&self) -> KubeEvent {
        KubeEvent {
            type_: self.type_,
            reason: self.reason.to_string(),
            note: Some(truncate(&self.message, MAX_NOTE_BYTES).to_string()),
            action: self.action.to_string(),
            secondary: self.related.clone(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sink for operational events
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: &Event);
}

/// Forwards events to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl EventRecorder for TracingRecorder {
    async fn record(&self, event: &Event) {
        match event.type_ {
            EventType::Normal => tracing::info!(
                reason = event.reason,
                object = %event.object(),
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                reason = event.reason,
                object = %event.object(),
                "{}",
                event.message
            ),
        }
    }
}

/// Publishes events to the cluster through the kube-runtime event recorder
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// `reporter` names the controller the events come from
    pub fn new(client: kube::Client, reporter: impl Into<Reporter>) -> Self {
        Self {
            recorder: Recorder::new(client, reporter.into()),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, event: &Event) {
        // Losing an event must not fail the operation that produced it
        if let Err(e) = self
            .recorder
            .publish(&event.to_kube_event(), &event.regarding)
            .await
        {
            tracing::warn!(
                reason = event.reason,
                object = %event.object(),
                error = %e,
                "failed to publish event"
            );
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct CollectingRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Events with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

#[async_trait]
impl EventRecorder for CollectingRecorder {
    async fn record(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(kind: &str, name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some("custom.k8s.io/v1".to_string()),
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_collecting_recorder() {
        let recorder = CollectingRecorder::new();
        recorder
            .record(&Event::warning(
                reason::SYNC_FAILED,
                action::DISCOVER,
                reference("ContainerVersion", "web"),
                "failed to get jobs",
            ))
            .await;
        recorder
            .record(&Event::normal(
                reason::STATUS_UPDATED,
                action::UPDATE_STATUS,
                reference("ContainerVersion", "api"),
                "api is at v2",
            ))
            .await;

        assert_eq!(recorder.events().len(), 2);
        let sync = recorder.with_reason(reason::SYNC_FAILED);
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].type_, EventType::Warning);
        assert_eq!(sync[0].object(), "default/web");
        assert_eq!(
            recorder.with_reason(reason::STATUS_UPDATED)[0].type_,
            EventType::Normal
        );
    }

    #[test]
    fn test_to_kube_event() {
        let event = Event::warning(
            reason::OVERLAPPING_SELECTOR,
            action::COLLECT,
            reference("Deployment", "web"),
            "claimed twice",
        )
        .related_to(reference("ContainerVersion", "web-b"));

        let kube_event = event.to_kube_event();
        assert_eq!(kube_event.type_, EventType::Warning);
        assert_eq!(kube_event.reason, "OverlappingSelector");
        assert_eq!(kube_event.action, "CollectResources");
        assert_eq!(kube_event.note.as_deref(), Some("claimed twice"));
        assert_eq!(
            kube_event.secondary.and_then(|r| r.name).as_deref(),
            Some("web-b")
        );
    }

    #[test]
    fn test_long_note_is_truncated_on_char_boundary() {
        let message = "é".repeat(MAX_NOTE_BYTES);
        let event = Event::warning(
            reason::SYNC_FAILED,
            action::DISCOVER,
            reference("ContainerVersion", "web"),
            message,
        );

        let note = event.to_kube_event().note.unwrap();
        assert!(note.len() <= MAX_NOTE_BYTES);
        assert!(note.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_tracing_recorder_does_not_panic_without_subscriber() {
        TracingRecorder
            .record(&Event::warning(
                reason::STATUS_UPDATE_FAILED,
                action::UPDATE_STATUS,
                reference("ContainerVersion", "web"),
                "boom",
            ))
            .await;
    }
}
