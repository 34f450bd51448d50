// ABOUTME: Volume operations trait for container runtimes.
// ABOUTME: Create, remove, and list named volumes.

use crate::events::VolumeInfo;
use crate::options::ListOptions;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait VolumeOps: Send + Sync {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeInfo, VolumeError>;

    /// Remove a volume. Without `force`, a volume mounted by a container is
    /// refused with [`VolumeError::InUse`].
    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), VolumeError>;

    async fn list_volumes(&self, opts: &ListOptions) -> Result<Vec<VolumeInfo>, VolumeError>;
}

/// Configuration for creating a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    /// Volume driver; the runtime default when `None`.
    pub driver: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Driver-specific options.
    pub options: BTreeMap<String, String>,
}

/// Errors from volume operations.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("volume already exists: {0}")]
    AlreadyExists(String),

    #[error("volume in use: {0}")]
    InUse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
