// ABOUTME: Runtime adapter interface and the Docker-compatible implementation.
// ABOUTME: The service only sees the traits; main wires in a concrete backend.

mod docker;
pub mod error;
pub mod traits;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::*;
