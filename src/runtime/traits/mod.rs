// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ImageOps, ContainerOps, LogOps, VolumeOps, RuntimeInfo, and Runtime.

mod container;
mod image;
mod logs;
mod runtime_info;
mod shared_types;
mod volume;

pub use container::{
    ContainerDetails, ContainerError, ContainerOps, ContainerSpec, ContainerState,
    DEFAULT_STOP_TIMEOUT, UpdateSpec,
};
pub use image::{ImageError, ImageOps, ImageSummary};
pub use logs::{LogError, LogLineStream, LogOps, LogOptions};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError, RuntimeMetadata};
pub use shared_types::*;
pub use volume::{VolumeError, VolumeOps, VolumeSpec};

/// A backend providing every capability the service dispatches to.
pub trait Runtime:
    ImageOps + ContainerOps + LogOps + VolumeOps + RuntimeInfo + Send + Sync + 'static
{
}

impl<T> Runtime for T where
    T: ImageOps + ContainerOps + LogOps + VolumeOps + RuntimeInfo + Send + Sync + 'static
{
}
