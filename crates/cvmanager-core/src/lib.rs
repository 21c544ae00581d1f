//! cvmanager Core - Core types for the container version rollout controller
//!
//! This crate provides the cluster-agnostic types used throughout cvmanager:
//! - `ContainerVersion`: The declaration naming which image tag governed workloads should run
//! - `RolloutStatus`: The persisted outcome of a rollout
//! - `WorkloadKind`: The closed set of deployable workload kinds
//! - `Resource`: A reporting snapshot of one workload's version and availability
//! - `ProviderOptions`: Provider configuration

pub mod config;
pub mod container_version;
pub mod error;
pub mod kind;
pub mod resource;

pub use config::{ProviderOptions, ROLLBACK_AFTER_ANNOTATION};
pub use container_version::{
    ContainerSpec, ContainerVersion, ContainerVersionSpec, ContainerVersionStatus, RolloutStatus,
};
pub use error::{CoreError, Result};
pub use kind::WorkloadKind;
pub use resource::{Resource, image_version};
