// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pull with progress, push from a byte stream, list, and remove images.

use super::shared_types::{PayloadStream, RegistryAuth};
use crate::events::EventSender;
use crate::options::ListOptions;
use crate::types::{ImageId, ImageRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Image operations: pull, push, list, remove.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Pull an image from a registry, reporting cumulative bytes on `events`.
    ///
    /// Returns the total number of bytes downloaded.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
        events: &EventSender,
    ) -> Result<u64, ImageError>;

    /// Load an image tarball from `payload` and tag it as `reference`.
    ///
    /// The image must not be committed unless `payload` ends normally.
    async fn push_image(
        &self,
        reference: &ImageRef,
        payload: PayloadStream,
        events: &EventSender,
    ) -> Result<(), ImageError>;

    /// List local images.
    async fn list_images(&self, opts: &ListOptions) -> Result<Vec<ImageSummary>, ImageError>;

    /// Remove an image. Fails with [`ImageError::InUse`] while a running
    /// container uses it.
    async fn remove_image(&self, reference: &ImageRef, force: bool) -> Result<(), ImageError>;
}

/// One row of an image listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: ImageId,
    pub image: String,
    pub tag: String,
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("authentication failed for registry: {0}")]
    AuthenticationFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("image in use, cannot remove: {0}")]
    InUse(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(String),
}
