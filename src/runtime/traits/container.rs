// ABOUTME: Container operations trait for container runtimes.
// ABOUTME: Lifecycle primitives plus start and in-place update built on top of them.

use crate::events::{ContainerInfo, EventBody, EventSender, ProgressEvent};
use crate::options::{ListOptions, StartOptions};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Grace period given to a container's main process before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Container lifecycle operations.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// Create a container from the given spec.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Stop a running container.
    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError>;

    /// Remove a container. Without `force`, a running container is refused
    /// with [`ContainerError::Running`].
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;

    /// Get detailed information about a container, by id or name.
    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerDetails, ContainerError>;

    /// List containers; `opts.all()` includes stopped ones.
    async fn list_containers(&self, opts: &ListOptions)
    -> Result<Vec<ContainerInfo>, ContainerError>;

    /// Rename a container.
    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError>;

    /// Create and start a container, reporting the new id once it exists.
    async fn create_and_start_container(
        &self,
        spec: &ContainerSpec,
        events: &EventSender,
    ) -> Result<ContainerId, ContainerError> {
        let id = self.create_container(spec).await?;
        if events.send(ProgressEvent::progress(EventBody::Container(
            spec.info(&id, ContainerState::Created),
        ))) {
            return Err(ContainerError::Cancelled);
        }
        self.start_container(&id).await?;
        Ok(id)
    }

    /// Replace the container named `update.instance` with one built from
    /// `update.spec`, keeping the instance name.
    ///
    /// The replacement is created under a staging name first; its id is
    /// reported as soon as it exists, before the old container is stopped.
    async fn update_container(
        &self,
        update: &UpdateSpec,
        events: &EventSender,
    ) -> Result<ContainerId, ContainerError> {
        let current = self
            .inspect_container(&ContainerId::new(&update.instance))
            .await?;

        let mut staged = update.spec.clone();
        staged.name = format!("{}-update", update.instance);
        let id = self.create_container(&staged).await?;

        if events.send(ProgressEvent::progress(EventBody::Container(
            update.spec.info(&id, ContainerState::Created),
        ))) {
            discard_staged(self, &id).await;
            return Err(ContainerError::Cancelled);
        }

        // Until the current container is gone, a failure restores it.
        let was_running = current.state == ContainerState::Running;
        let retired = async {
            if was_running {
                self.stop_container(&current.id, DEFAULT_STOP_TIMEOUT).await?;
            }
            self.remove_container(&current.id, true).await
        }
        .await;
        if let Err(e) = retired {
            discard_staged(self, &id).await;
            if was_running
                && let Ok(details) = self.inspect_container(&current.id).await
                && details.state != ContainerState::Running
                && let Err(restart) = self.start_container(&current.id).await
            {
                tracing::warn!(id = %current.id, error = %restart, "failed to restart current container");
            }
            return Err(e);
        }

        let promoted = async {
            self.rename_container(&id, &update.instance).await?;
            self.start_container(&id).await
        }
        .await;
        if let Err(e) = promoted {
            tracing::error!(
                instance = %update.instance,
                staged = %id,
                error = %e,
                "update failed after the current container was removed; replacement left staged"
            );
            return Err(e);
        }
        Ok(id)
    }
}

async fn discard_staged<C: ContainerOps + ?Sized>(ops: &C, id: &ContainerId) {
    if let Err(e) = ops.remove_container(id, true).await {
        tracing::warn!(id = %id, error = %e, "failed to remove staged container");
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageRef,
    /// Command and arguments; empty keeps the image default.
    pub command: Vec<String>,
    pub options: StartOptions,
}

impl ContainerSpec {
    pub fn info(&self, id: &ContainerId, state: ContainerState) -> ContainerInfo {
        ContainerInfo {
            id: id.to_string(),
            name: self.name.clone(),
            image: self.image.to_string(),
            state: state.to_string(),
        }
    }
}

/// Replace an existing container in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSpec {
    pub instance: String,
    pub spec: ContainerSpec,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("container already running: {0}")]
    AlreadyRunning(String),

    #[error("container is running: {0}")]
    Running(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(String),
}
