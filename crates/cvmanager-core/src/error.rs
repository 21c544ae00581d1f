//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("invalid image reference '{image}': expected repository:tag")]
    InvalidImage { image: String },

    #[error("unknown rollout status '{0}' (expected Progressing, Success or Failed)")]
    UnknownStatus(String),

    #[error("unknown workload kind '{0}'")]
    UnknownKind(String),

    #[error("Failed to parse options: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
