// ABOUTME: Runtime connection error types with SNAFU pattern.
// ABOUTME: Covers reaching the engine; per-operation errors live with each trait.

use snafu::Snafu;

use super::traits::RuntimeInfoError;

/// Failure to set up or reach a runtime backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    #[snafu(display("unsupported docker host {host:?}: expected unix://, tcp:// or http://"))]
    UnsupportedHost { host: String },

    #[snafu(display("failed to configure client for {host}: {source}"))]
    Connect {
        host: String,
        source: bollard::errors::Error,
    },

    #[snafu(display("runtime at {host} is unreachable: {source}"))]
    Unreachable {
        host: String,
        source: RuntimeInfoError,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// The host string names no supported transport.
    InvalidHost,
    /// The client could not be configured.
    ClientSetup,
    /// The engine did not answer.
    ConnectionFailed,
}

impl RuntimeError {
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::UnsupportedHost { .. } => RuntimeErrorKind::InvalidHost,
            RuntimeError::Connect { .. } => RuntimeErrorKind::ClientSetup,
            RuntimeError::Unreachable { .. } => RuntimeErrorKind::ConnectionFailed,
        }
    }
}
