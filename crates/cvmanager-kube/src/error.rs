//! Error types for cvmanager-kube

use cvmanager_core::{CoreError, WorkloadKind};
use thiserror::Error;

/// Result type for cvmanager-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error (network or server failure, not retried here)
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Write rejected because the object changed since it was read
    #[error("conflict updating {kind} '{name}': the object has been modified")]
    Conflict { kind: String, name: String },

    /// Target container missing from the workload's pod spec
    #[error("container '{container}' not found in {kind} '{name}'")]
    ContainerNotFound {
        container: String,
        kind: WorkloadKind,
        name: String,
    },

    /// Malformed image reference
    #[error(transparent)]
    InvalidImage(#[from] CoreError),

    /// One of the per-kind list queries failed; no partial result is returned
    #[error("failed to get {}", kind.plural())]
    ListFailed {
        kind: WorkloadKind,
        #[source]
        source: Box<KubeError>,
    },

    /// Operation has no meaning for this kind
    #[error("{operation} is not supported for {kind} '{name}'")]
    Unsupported {
        operation: &'static str,
        kind: WorkloadKind,
        name: String,
    },

    /// Label selector could not be evaluated
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error wrapped with the operation and target that produced it
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<KubeError>,
    },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Wrap this error with static context
    pub fn context(self, context: impl Into<String>) -> Self {
        KubeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, past any context or listing wrappers
    pub fn root(&self) -> &KubeError {
        match self {
            KubeError::Context { source, .. } | KubeError::ListFailed { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self.root() {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Check if this is a caller-side contract violation rather than a cluster failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self.root(),
            KubeError::InvalidImage(_) | KubeError::ContainerNotFound { .. }
        )
    }

    /// Translate a kube client error into the crate taxonomy, mapping 404 and
    /// 409 responses to `NotFound` and `Conflict`.
    pub(crate) fn from_kube(e: kube::Error, kind: &str, name: &str, namespace: &str) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => KubeError::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found() -> KubeError {
        KubeError::NotFound {
            kind: "ContainerVersion".to_string(),
            name: "missing".to_string(),
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_not_found_through_context() {
        let err = not_found().context("failed to get ContainerVersion missing");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "failed to get ContainerVersion missing");
    }

    #[test]
    fn test_list_failed_message_names_kind() {
        let err = KubeError::ListFailed {
            kind: WorkloadKind::Job,
            source: Box::new(not_found()),
        };
        assert_eq!(err.to_string(), "failed to get jobs");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_contract_violation() {
        let err = KubeError::from(CoreError::InvalidImage {
            image: "nginx".to_string(),
        });
        assert!(err.is_contract_violation());
        assert!(!not_found().is_contract_violation());
    }

    #[test]
    fn test_from_kube_maps_status_codes() {
        let api_err = |code: u16| {
            kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: String::new(),
                code,
            })
        };

        assert!(matches!(
            KubeError::from_kube(api_err(404), "Pod", "p", "ns"),
            KubeError::NotFound { .. }
        ));
        assert!(matches!(
            KubeError::from_kube(api_err(409), "Pod", "p", "ns"),
            KubeError::Conflict { .. }
        ));
        assert!(matches!(
            KubeError::from_kube(api_err(500), "Pod", "p", "ns"),
            KubeError::Api(_)
        ));
    }
}
