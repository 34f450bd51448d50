// ABOUTME: Bollard-based runtime adapter for Docker-compatible engines.
// ABOUTME: Maps engine responses and errors onto the capability traits.

use crate::events::{
    ContainerInfo, EventBody, EventSender, ImageProgress, LogLine, LogStream, ProgressEvent,
    VolumeInfo,
};
use crate::options::{ListOptions, RestartPolicy, StartOptions};
use crate::runtime::error::{ConnectSnafu, RuntimeError, UnsupportedHostSnafu};
use crate::runtime::traits::{
    ContainerDetails, ContainerError, ContainerOps, ContainerSpec, ContainerState, ImageError,
    ImageOps, ImageSummary, LogError, LogLineStream, LogOps, LogOptions, PayloadStream,
    RegistryAuth, RuntimeInfo, RuntimeInfoError, RuntimeMetadata, VolumeError, VolumeOps,
    VolumeSpec,
};
use crate::types::{ContainerId, ImageId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, DeviceMapping, HostConfig, Mount, MountTypeEnum, PortBinding,
    RestartPolicy as EngineRestartPolicy, RestartPolicyNameEnum, VolumeCreateRequest,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ImportImageOptions, InspectContainerOptions,
    ListContainersOptions, ListImagesOptions, ListVolumesOptions, LogsOptions,
    RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions, RenameContainerOptions,
    StopContainerOptions, TagImageOptions,
};
use futures::StreamExt;
use snafu::ResultExt;
use std::collections::HashMap;
use std::time::Duration;

/// Seconds bollard waits on a single engine request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn status_of(e: &bollard::errors::Error) -> Option<(u16, &str)> {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => Some((*status_code, message.as_str())),
        _ => None,
    }
}

fn map_image_pull_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match status_of(&e) {
        Some((404, _)) => ImageError::NotFound(image_name.to_string()),
        Some((401 | 403, message)) => ImageError::AuthenticationFailed(message.to_string()),
        _ => ImageError::PullFailed(format!("{image_name}: {e}")),
    }
}

fn map_image_remove_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match status_of(&e) {
        Some((404, _)) => ImageError::NotFound(image_name.to_string()),
        Some((409, message)) => ImageError::InUse(message.to_string()),
        _ => ImageError::Runtime(format!("failed to remove {image_name}: {e}")),
    }
}

fn map_container_create_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::ImageNotFound(message.to_string()),
        Some((409, message)) => ContainerError::AlreadyExists(message.to_string()),
        Some((400, message)) => ContainerError::InvalidConfig(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_start_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((304, message)) => ContainerError::AlreadyRunning(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_stop_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((304, message)) => ContainerError::NotRunning(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_remove_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((409, message)) => ContainerError::Running(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_not_found_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((409, message)) => ContainerError::AlreadyExists(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_volume_error(e: bollard::errors::Error, name: &str) -> VolumeError {
    match status_of(&e) {
        Some((404, _)) => VolumeError::NotFound(name.to_string()),
        Some((409, message)) => VolumeError::InUse(message.to_string()),
        Some((400, message)) => VolumeError::InvalidConfig(message.to_string()),
        _ => VolumeError::Runtime(e.to_string()),
    }
}

fn engine_filters(opts: &ListOptions) -> HashMap<String, Vec<String>> {
    opts.filters()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// =============================================================================
// DockerRuntime
// =============================================================================

/// Runtime adapter talking to a Docker-compatible engine API.
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Connect to `host`: `unix://` sockets or `tcp://`/`http://` endpoints.
    ///
    /// Connecting is lazy; call [`RuntimeInfo::ping`] to check the engine.
    pub fn connect(host: &str) -> Result<Self, RuntimeError> {
        let client = if host.starts_with("unix://") || host.starts_with('/') {
            Docker::connect_with_socket(host, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            Docker::connect_with_http(
                &format!("http://{addr}"),
                REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
        } else if host.starts_with("http://") {
            Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else {
            return UnsupportedHostSnafu { host }.fail();
        };
        let client = client.context(ConnectSnafu { host })?;
        Ok(Self::new(client))
    }

    /// Resolve the name the engine gave to a freshly loaded tarball.
    async fn load_image(
        &self,
        reference: &ImageRef,
        payload: PayloadStream,
    ) -> Result<String, ImageError> {
        let mut stream =
            self.client
                .import_image_stream(
                    ImportImageOptions::default(),
                    payload.map(Ok::<_, std::io::Error>),
                    None,
                );
        let mut loaded = None;
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| ImageError::PushFailed(format!("{reference}: {e}")))?;
            if let Some(message) = info.error_detail.and_then(|d| d.message) {
                return Err(ImageError::PushFailed(format!("{reference}: {message}")));
            }
            if let Some(line) = info.stream.as_deref() {
                let line = line.trim();
                if let Some(name) = line
                    .strip_prefix("Loaded image: ")
                    .or_else(|| line.strip_prefix("Loaded image ID: "))
                {
                    loaded = Some(name.to_string());
                }
            }
        }
        loaded.ok_or_else(|| {
            ImageError::PushFailed(format!("{reference}: payload contained no image"))
        })
    }
}

fn host_config(options: &StartOptions) -> HostConfig {
    let mut host_config = HostConfig::default();

    if let Some(policy) = options.restart_policy() {
        host_config.restart_policy = Some(EngineRestartPolicy {
            name: Some(match policy {
                RestartPolicy::No => RestartPolicyNameEnum::NO,
                RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
                RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
                RestartPolicy::OnFailure { .. } => RestartPolicyNameEnum::ON_FAILURE,
            }),
            maximum_retry_count: match policy {
                RestartPolicy::OnFailure { max_attempts } => max_attempts.map(i64::from),
                _ => None,
            },
        });
    }

    let mounts: Vec<Mount> = options
        .volumes()
        .iter()
        .map(|v| Mount {
            source: Some(v.name.clone()),
            target: Some(v.mountpoint.clone()),
            typ: Some(MountTypeEnum::VOLUME),
            read_only: Some(v.read_only),
            ..Default::default()
        })
        .collect();
    if !mounts.is_empty() {
        host_config.mounts = Some(mounts);
    }

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = options
        .ports()
        .iter()
        .map(|p| {
            (
                format!("{}/tcp", p.internal),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(p.external.to_string()),
                }]),
            )
        })
        .collect();
    if !port_bindings.is_empty() {
        host_config.port_bindings = Some(port_bindings);
    }

    let devices: Vec<DeviceMapping> = options
        .devices()
        .iter()
        .map(|d| DeviceMapping {
            path_on_host: Some(d.source.clone()),
            path_in_container: Some(d.target.clone()),
            cgroup_permissions: Some(d.permissions.clone()),
        })
        .collect();
    if !devices.is_empty() {
        host_config.devices = Some(devices);
    }

    if let Some(network) = options.network() {
        host_config.network_mode = Some(network.to_string());
    }

    let caps = options.capabilities();
    if !caps.add.is_empty() {
        host_config.cap_add = Some(caps.add.clone());
    }
    if !caps.drop.is_empty() {
        host_config.cap_drop = Some(caps.drop.clone());
    }

    host_config
}

fn parse_state(state: Option<bollard::models::ContainerStateStatusEnum>) -> ContainerState {
    use bollard::models::ContainerStateStatusEnum as S;
    match state {
        Some(S::CREATED) => ContainerState::Created,
        Some(S::RUNNING) => ContainerState::Running,
        Some(S::PAUSED) => ContainerState::Paused,
        Some(S::RESTARTING) => ContainerState::Restarting,
        Some(S::REMOVING) => ContainerState::Removing,
        Some(S::DEAD) => ContainerState::Dead,
        _ => ContainerState::Exited,
    }
}

#[async_trait]
impl RuntimeInfo for DockerRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        let info = self
            .client
            .info()
            .await
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;

        Ok(RuntimeMetadata {
            name: "docker".to_string(),
            version: info.server_version.unwrap_or_default(),
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            os: info.operating_system.unwrap_or_default(),
            arch: info.architecture.unwrap_or_default(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for DockerRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
        events: &EventSender,
    ) -> Result<u64, ImageError> {
        let image_name = reference.to_string();
        let opts = CreateImageOptions {
            from_image: Some(reference.name().to_string()),
            tag: Some(reference.tag().to_string()),
            ..Default::default()
        };

        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            serveraddress: a.server.clone(),
            ..Default::default()
        });

        // The engine reports per-layer progress; the event carries the sum.
        let mut layers: HashMap<String, u64> = HashMap::new();
        let mut stream = self.client.create_image(Some(opts), None, credentials);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_image_pull_error(e, &image_name))?;
            if let Some(message) = info.error_detail.and_then(|d| d.message) {
                return Err(ImageError::PullFailed(format!("{image_name}: {message}")));
            }
            let current = info.progress_detail.and_then(|p| p.current);
            let (Some(layer), Some(current)) = (info.id, current) else {
                continue;
            };
            layers.insert(layer, u64::try_from(current).unwrap_or_default());
            let bytes_received = layers.values().sum();
            let event = ProgressEvent::progress(EventBody::Image(ImageProgress {
                image: reference.name().to_string(),
                tag: reference.tag().to_string(),
                bytes_received,
            }));
            if events.send(event) {
                return Err(ImageError::Cancelled);
            }
        }

        Ok(layers.values().sum())
    }

    async fn push_image(
        &self,
        reference: &ImageRef,
        payload: PayloadStream,
        _events: &EventSender,
    ) -> Result<(), ImageError> {
        let loaded = self.load_image(reference, payload).await?;
        tracing::debug!(loaded = %loaded, target = %reference, "tagging loaded image");

        let opts = TagImageOptions {
            repo: Some(reference.name().to_string()),
            tag: Some(reference.tag().to_string()),
        };
        self.client
            .tag_image(&loaded, Some(opts))
            .await
            .map_err(|e| ImageError::PushFailed(format!("{reference}: {e}")))
    }

    async fn list_images(&self, opts: &ListOptions) -> Result<Vec<ImageSummary>, ImageError> {
        let list_opts = ListImagesOptions {
            all: opts.all(),
            filters: Some(engine_filters(opts)),
            ..Default::default()
        };
        let images = self
            .client
            .list_images(Some(list_opts))
            .await
            .map_err(|e| ImageError::Runtime(e.to_string()))?;

        let mut rows = Vec::new();
        for image in images {
            let id = ImageId::new(image.id);
            if image.repo_tags.is_empty() {
                rows.push(ImageSummary {
                    id,
                    image: "<none>".to_string(),
                    tag: "<none>".to_string(),
                });
                continue;
            }
            for repo_tag in image.repo_tags {
                let (name, tag) = match repo_tag.rsplit_once(':') {
                    Some((name, tag)) if !tag.contains('/') => (name.to_string(), tag.to_string()),
                    _ => (repo_tag.clone(), String::new()),
                };
                rows.push(ImageSummary {
                    id: id.clone(),
                    image: name,
                    tag,
                });
            }
        }
        Ok(rows)
    }

    async fn remove_image(&self, reference: &ImageRef, force: bool) -> Result<(), ImageError> {
        let image_name = reference.to_string();
        let opts = RemoveImageOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_image(&image_name, Some(opts), None)
            .await
            .map_err(|e| map_image_remove_error(e, &image_name))?;

        Ok(())
    }
}

#[async_trait]
impl ContainerOps for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        let options = &spec.options;
        let env: Vec<String> = options.env().iter().map(ToString::to_string).collect();
        let exposed_ports: Vec<String> = options
            .ports()
            .iter()
            .map(|p| format!("{}/tcp", p.internal))
            .collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.to_string()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: (!env.is_empty()).then_some(env),
            user: options.run_as().map(ToString::to_string),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config(options)),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(map_container_create_error)?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "{warning}");
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(
                id.as_str(),
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(map_container_start_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)),
            signal: None,
        };

        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_stop_error)
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_remove_error)
    }

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerDetails, ContainerError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_container_not_found_error)?;

        let state = parse_state(details.state.as_ref().and_then(|s| s.status));
        let config = details.config.unwrap_or_default();

        Ok(ContainerDetails {
            id: ContainerId::new(details.id.unwrap_or_else(|| id.to_string())),
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.image.unwrap_or_default(),
            state,
            created: details.created.map(|dt| dt.to_string()).unwrap_or_default(),
            command: config.cmd.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            labels: config.labels.unwrap_or_default().into_iter().collect(),
        })
    }

    async fn list_containers(
        &self,
        opts: &ListOptions,
    ) -> Result<Vec<ContainerInfo>, ContainerError> {
        let list_opts = ListContainersOptions {
            all: opts.all(),
            filters: Some(engine_filters(opts)),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(list_opts))
            .await
            .map_err(|e| ContainerError::Runtime(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                ContainerInfo {
                    id: c.id.unwrap_or_default(),
                    name,
                    image: c.image.unwrap_or_default(),
                    state: c
                        .state
                        .map(|s| format!("{s:?}").to_lowercase())
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        self.client
            .rename_container(
                id.as_str(),
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(map_container_not_found_error)
    }
}

#[async_trait]
impl LogOps for DockerRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogLineStream, LogError> {
        // Fail fast on an unknown container instead of mid-stream.
        self.client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| match status_of(&e) {
                Some((404, _)) => LogError::ContainerNotFound(id.to_string()),
                _ => LogError::Runtime(e.to_string()),
            })?;

        let log_opts = LogsOptions {
            stdout: true,
            stderr: true,
            follow: opts.follow,
            timestamps: opts.timestamps,
            tail: opts
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self.client.logs(id.as_str(), Some(log_opts)).map(|result| {
            result
                .map(|output| {
                    let (stream, data) = match output {
                        bollard::container::LogOutput::StdErr { message } => {
                            (LogStream::Stderr, message)
                        }
                        bollard::container::LogOutput::StdOut { message }
                        | bollard::container::LogOutput::StdIn { message }
                        | bollard::container::LogOutput::Console { message } => {
                            (LogStream::Stdout, message)
                        }
                    };
                    LogLine {
                        message: String::from_utf8_lossy(&data).trim_end().to_string(),
                        stream,
                    }
                })
                .map_err(|e| LogError::StreamError(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl VolumeOps for DockerRuntime {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeInfo, VolumeError> {
        let opts = VolumeCreateRequest {
            name: Some(spec.name.clone()),
            driver: spec.driver.clone(),
            driver_opts: Some(spec.options.clone().into_iter().collect()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            ..Default::default()
        };

        let volume = self
            .client
            .create_volume(opts)
            .await
            .map_err(|e| map_volume_error(e, &spec.name))?;

        Ok(volume_info(volume))
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), VolumeError> {
        self.client
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(|e| map_volume_error(e, name))
    }

    async fn list_volumes(&self, opts: &ListOptions) -> Result<Vec<VolumeInfo>, VolumeError> {
        let list_opts = ListVolumesOptions {
            filters: Some(engine_filters(opts)),
            ..Default::default()
        };
        let response = self
            .client
            .list_volumes(Some(list_opts))
            .await
            .map_err(|e| VolumeError::Runtime(e.to_string()))?;

        for warning in response.warnings.unwrap_or_default() {
            tracing::warn!("{warning}");
        }

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(volume_info)
            .collect())
    }
}

fn volume_info(volume: bollard::models::Volume) -> VolumeInfo {
    VolumeInfo {
        name: volume.name,
        driver: volume.driver,
        labels: volume.labels.into_iter().collect(),
        options: volume.options.into_iter().collect(),
        created_at: volume.created_at,
    }
}
