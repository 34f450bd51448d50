// ABOUTME: Runtime info trait for container runtimes.
// ABOUTME: Reports engine version at startup and checks the engine is reachable.

use async_trait::async_trait;
use std::fmt;

#[async_trait]
pub trait RuntimeInfo: Send + Sync {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError>;

    /// Cheap round trip used before serving.
    async fn ping(&self) -> Result<(), RuntimeInfoError>;
}

/// Engine identification as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeMetadata {
    pub name: String,
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

impl fmt::Display for RuntimeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (api {}, {}/{})",
            self.name, self.version, self.api_version, self.os, self.arch
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeInfoError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
