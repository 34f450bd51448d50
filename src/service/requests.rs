// ABOUTME: Request types for every service operation, as carried on the wire.
// ABOUTME: Each one resolves into validated domain values before dispatch.

use crate::options::{ListOptions, RawListOptions, RawStartOptions, StartOptions};
use crate::runtime::{ContainerSpec, LogOptions, VolumeSpec};
use crate::types::{ContainerId, ImageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tonic::Status;

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, Status> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Status::invalid_argument(format!("{field} must be specified")));
    }
    Ok(value)
}

fn image_ref(image: &str, tag: &str) -> Result<ImageRef, Status> {
    let image = required("image name", image)?;
    ImageRef::new(image, tag).map_err(|e| Status::from(&e))
}

fn list_options(raw: &RawListOptions) -> Result<ListOptions, Status> {
    ListOptions::from_raw(raw).map_err(|e| Status::from(&e))
}

fn container_spec(
    instance: &str,
    image: &str,
    tag: &str,
    command: &[String],
    options: &RawStartOptions,
) -> Result<ContainerSpec, Status> {
    let name = required("instance name", instance)?.to_string();
    let image = image_ref(image, tag)?;
    let options = StartOptions::from_raw(options).map_err(|e| Status::from(&e))?;
    Ok(ContainerSpec {
        name,
        image,
        command: command
            .iter()
            .filter(|arg| !arg.is_empty())
            .cloned()
            .collect(),
        options,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullImageRequest {
    pub image: String,
    #[serde(default)]
    pub tag: String,
}

impl PullImageRequest {
    pub fn resolve(&self) -> Result<ImageRef, Status> {
        image_ref(&self.image, &self.tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushImageRequest {
    pub image: String,
    #[serde(default)]
    pub tag: String,
}

impl PushImageRequest {
    pub fn resolve(&self) -> Result<ImageRef, Status> {
        image_ref(&self.image, &self.tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListImagesRequest {
    #[serde(default)]
    pub options: RawListOptions,
}

impl ListImagesRequest {
    pub fn resolve(&self) -> Result<ListOptions, Status> {
        list_options(&self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveImageRequest {
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub force: bool,
}

impl RemoveImageRequest {
    pub fn resolve(&self) -> Result<ImageRef, Status> {
        image_ref(&self.image, &self.tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartContainerRequest {
    pub instance: String,
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub options: RawStartOptions,
}

impl StartContainerRequest {
    pub fn resolve(&self) -> Result<ContainerSpec, Status> {
        container_spec(
            &self.instance,
            &self.image,
            &self.tag,
            &self.command,
            &self.options,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContainerRequest {
    pub instance: String,
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub options: RawStartOptions,
    /// Return as soon as the replacement container exists.
    #[serde(default, rename = "async")]
    pub async_mode: bool,
}

impl UpdateContainerRequest {
    pub fn resolve(&self) -> Result<ContainerSpec, Status> {
        container_spec(
            &self.instance,
            &self.image,
            &self.tag,
            &self.command,
            &self.options,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopContainerRequest {
    pub instance: String,
    /// Seconds to wait before killing; the runtime default when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StopContainerRequest {
    pub fn resolve(&self) -> Result<(ContainerId, Option<Duration>), Status> {
        let id = ContainerId::new(required("instance name", &self.instance)?);
        Ok((id, self.timeout_secs.map(Duration::from_secs)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveContainerRequest {
    pub instance: String,
    #[serde(default)]
    pub force: bool,
}

impl RemoveContainerRequest {
    pub fn resolve(&self) -> Result<ContainerId, Status> {
        Ok(ContainerId::new(required("instance name", &self.instance)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListContainersRequest {
    #[serde(default)]
    pub options: RawListOptions,
}

impl ListContainersRequest {
    pub fn resolve(&self) -> Result<ListOptions, Status> {
        list_options(&self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectContainerRequest {
    pub instance: String,
}

impl InspectContainerRequest {
    pub fn resolve(&self) -> Result<ContainerId, Status> {
        Ok(ContainerId::new(required("instance name", &self.instance)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogsRequest {
    pub instance: String,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub tail: Option<u64>,
}

impl ContainerLogsRequest {
    pub fn resolve(&self) -> Result<(ContainerId, LogOptions), Status> {
        let id = ContainerId::new(required("instance name", &self.instance)?);
        Ok((
            id,
            LogOptions {
                follow: self.follow,
                tail: self.tail,
                timestamps: false,
            },
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl CreateVolumeRequest {
    pub fn resolve(&self) -> Result<VolumeSpec, Status> {
        Ok(VolumeSpec {
            name: required("volume name", &self.name)?.to_string(),
            driver: self.driver.clone().filter(|d| !d.trim().is_empty()),
            labels: self.labels.clone(),
            options: self.options.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveVolumeRequest {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

impl RemoveVolumeRequest {
    pub fn resolve(&self) -> Result<String, Status> {
        Ok(required("volume name", &self.name)?.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesRequest {
    #[serde(default)]
    pub options: RawListOptions,
}

impl ListVolumesRequest {
    pub fn resolve(&self) -> Result<ListOptions, Status> {
        list_options(&self.options)
    }
}
