// ABOUTME: Log operations trait for container runtimes.
// ABOUTME: Stream container logs with tail and follow options.

use crate::events::LogLine;
use crate::types::ContainerId;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type LogLineStream = Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>;

/// Log streaming operations.
#[async_trait]
pub trait LogOps: Send + Sync {
    /// Stream logs from a container.
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogLineStream, LogError>;
}

/// Options for log streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Keep the stream open for new output.
    pub follow: bool,
    /// Number of lines to show from the end; `None` shows all.
    pub tail: Option<u64>,
    pub timestamps: bool,
}

impl LogOptions {
    pub fn follow_all() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    pub fn tail(n: u64) -> Self {
        Self {
            tail: Some(n),
            ..Self::default()
        }
    }
}

/// Errors from log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
