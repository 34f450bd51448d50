// ABOUTME: In-memory runtime adapter for service, wire, and client tests.
// ABOUTME: Counts adapter calls and commits pushed images only when the payload ends.

use async_trait::async_trait;
use dockhand::events::{
    ContainerInfo, EventBody, EventSender, ImageProgress, LogLine, LogStream, ProgressEvent,
    VolumeInfo,
};
use dockhand::options::ListOptions;
use dockhand::runtime::{
    ContainerDetails, ContainerError, ContainerOps, ContainerSpec, ContainerState, ImageError,
    ImageOps, ImageSummary, LogError, LogLineStream, LogOps, LogOptions, PayloadStream,
    RegistryAuth, RuntimeInfo, RuntimeInfoError, RuntimeMetadata, VolumeError, VolumeOps,
    VolumeSpec,
};
use dockhand::types::{ContainerId, ImageId, ImageRef};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    images: BTreeMap<String, ImageSummary>,
    containers: Vec<ContainerDetails>,
    volumes: BTreeMap<String, VolumeInfo>,
    logs: BTreeMap<String, Vec<LogLine>>,
    last_auth: Option<RegistryAuth>,
    last_list: Option<ListOptions>,
    next_id: u64,
}

/// Runtime double backed by maps.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
    calls: AtomicUsize,
    pull_steps: Vec<u64>,
    hang_pull: bool,
    pull_dropped: Arc<AtomicBool>,
    hang_rename: bool,
    rename_dropped: Arc<AtomicBool>,
    push_commits: AtomicUsize,
    fail_once: Mutex<Vec<&'static str>>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            pull_steps: vec![1024, 4096, 8192],
            ..Self::default()
        }
    }

    pub fn with_image(self, name: &str, tag: &str) -> Self {
        self.insert_image(name, tag);
        self
    }

    pub fn with_running_container(self, name: &str, image: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = next_id(&mut state);
            state.containers.push(details(&id, name, image, ContainerState::Running));
        }
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert(name.to_string(), volume(name, "local"));
        self
    }

    pub fn with_logs(self, instance: &str, lines: &[&str]) -> Self {
        let lines = lines
            .iter()
            .map(|message| LogLine {
                message: message.to_string(),
                stream: LogStream::Stdout,
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(instance.to_string(), lines);
        self
    }

    /// Cumulative byte counts reported by each pull step.
    pub fn with_pull_steps(mut self, steps: Vec<u64>) -> Self {
        self.pull_steps = steps;
        self
    }

    /// Pulls report their first step and then never finish.
    pub fn hanging_pull(mut self) -> Self {
        self.hang_pull = true;
        self
    }

    /// Renames never finish.
    pub fn hanging_rename(mut self) -> Self {
        self.hang_rename = true;
        self
    }

    /// The next call to the adapter method `op` fails with a runtime error.
    pub fn fail_once(self, op: &'static str) -> Self {
        self.fail_once.lock().unwrap().push(op);
        self
    }

    /// Number of adapter methods invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Set once a hanging pull's future has been dropped.
    pub fn pull_dropped(&self) -> bool {
        self.pull_dropped.load(Ordering::SeqCst)
    }

    /// Set once a hanging rename's future has been dropped.
    pub fn rename_dropped(&self) -> bool {
        self.rename_dropped.load(Ordering::SeqCst)
    }

    /// Options of the most recent image list call.
    pub fn last_list_options(&self) -> Option<ListOptions> {
        self.state.lock().unwrap().last_list.clone()
    }

    pub fn push_commits(&self) -> usize {
        self.push_commits.load(Ordering::SeqCst)
    }

    pub fn has_image(&self, name: &str, tag: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .images
            .contains_key(&format!("{name}:{tag}"))
    }

    pub fn container(&self, name: &str) -> Option<ContainerDetails> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn last_auth(&self) -> Option<RegistryAuth> {
        self.state.lock().unwrap().last_auth.clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn injected(&self, op: &str) -> bool {
        let mut pending = self.fail_once.lock().unwrap();
        match pending.iter().position(|o| *o == op) {
            Some(i) => {
                pending.remove(i);
                true
            }
            None => false,
        }
    }

    fn insert_image(&self, name: &str, tag: &str) {
        let mut state = self.state.lock().unwrap();
        let id = next_id(&mut state);
        state.images.insert(
            format!("{name}:{tag}"),
            ImageSummary {
                id: ImageId::new(format!("sha256:{id}")),
                image: name.to_string(),
                tag: tag.to_string(),
            },
        );
    }
}

fn next_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("{:064x}", state.next_id)
}

fn details(id: &str, name: &str, image: &str, state: ContainerState) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: name.to_string(),
        image: image.to_string(),
        state,
        created: "2026-01-01T00:00:00Z".to_string(),
        command: vec![],
        env: vec![],
        labels: BTreeMap::new(),
    }
}

fn volume(name: &str, driver: &str) -> VolumeInfo {
    VolumeInfo {
        name: name.to_string(),
        driver: driver.to_string(),
        labels: BTreeMap::new(),
        options: BTreeMap::new(),
        created_at: None,
    }
}

fn find<'a>(
    containers: &'a mut [ContainerDetails],
    id: &ContainerId,
) -> Option<&'a mut ContainerDetails> {
    containers
        .iter_mut()
        .find(|c| c.id == *id || c.name == id.as_str())
}

#[async_trait]
impl RuntimeInfo for MockRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        self.hit();
        Ok(RuntimeMetadata {
            name: "mock".to_string(),
            version: "1.0".to_string(),
            api_version: "1.0".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        self.hit();
        Ok(())
    }
}

#[async_trait]
impl ImageOps for MockRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
        events: &EventSender,
    ) -> Result<u64, ImageError> {
        self.hit();
        self.state.lock().unwrap().last_auth = auth.cloned();
        if reference.name() == "missing" {
            return Err(ImageError::NotFound(reference.to_string()));
        }

        let mut total = 0;
        for bytes in &self.pull_steps {
            total = *bytes;
            let cancelled = events.send(ProgressEvent::progress(EventBody::Image(
                ImageProgress {
                    image: reference.name().to_string(),
                    tag: reference.tag().to_string(),
                    bytes_received: total,
                },
            )));
            if cancelled {
                return Err(ImageError::Cancelled);
            }
            if self.hang_pull {
                let _flag = DropFlag(Arc::clone(&self.pull_dropped));
                std::future::pending::<()>().await;
            }
            tokio::task::yield_now().await;
        }

        self.insert_image(reference.name(), reference.tag());
        Ok(total)
    }

    async fn push_image(
        &self,
        reference: &ImageRef,
        mut payload: PayloadStream,
        _events: &EventSender,
    ) -> Result<(), ImageError> {
        self.hit();
        let mut received = 0usize;
        while let Some(bytes) = payload.next().await {
            received += bytes.len();
        }
        if received == 0 {
            return Err(ImageError::PushFailed("empty archive".to_string()));
        }
        self.insert_image(reference.name(), reference.tag());
        self.push_commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_images(&self, opts: &ListOptions) -> Result<Vec<ImageSummary>, ImageError> {
        self.hit();
        if self.injected("list_images") {
            return Err(ImageError::Runtime("engine went away".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.last_list = Some(opts.clone());
        let dangling = opts
            .filters()
            .get("dangling")
            .is_some_and(|v| v.iter().any(|v| v == "true"));
        Ok(state
            .images
            .values()
            .filter(|i| !dangling || i.tag == "<none>")
            .cloned()
            .collect())
    }

    async fn remove_image(&self, reference: &ImageRef, force: bool) -> Result<(), ImageError> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        let key = reference.to_string();
        if !state.images.contains_key(&key) {
            return Err(ImageError::NotFound(key));
        }
        let in_use = state
            .containers
            .iter()
            .any(|c| c.image == key && c.state == ContainerState::Running);
        if in_use && !force {
            return Err(ImageError::InUse(key));
        }
        state.images.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for MockRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        if !state.images.contains_key(&spec.image.to_string()) {
            return Err(ContainerError::ImageNotFound(spec.image.to_string()));
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name.clone()));
        }
        let id = next_id(&mut state);
        let mut created = details(&id, &spec.name, &spec.image.to_string(), ContainerState::Created);
        created.command = spec.command.clone();
        created.env = spec.options.env().iter().map(|e| e.to_string()).collect();
        state.containers.push(created);
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        let container = find(&mut state.containers, id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if container.state == ContainerState::Running {
            return Err(ContainerError::AlreadyRunning(id.to_string()));
        }
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        self.hit();
        if self.injected("stop_container") {
            return Err(ContainerError::Runtime(format!("stop failed: {id}")));
        }
        let mut state = self.state.lock().unwrap();
        let container = find(&mut state.containers, id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if container.state != ContainerState::Running {
            return Err(ContainerError::NotRunning(id.to_string()));
        }
        container.state = ContainerState::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        self.hit();
        if self.injected("remove_container") {
            return Err(ContainerError::Runtime(format!("remove failed: {id}")));
        }
        let mut state = self.state.lock().unwrap();
        let running = find(&mut state.containers, id)
            .map(|c| c.state == ContainerState::Running)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if running && !force {
            return Err(ContainerError::Running(id.to_string()));
        }
        state
            .containers
            .retain(|c| c.id != *id && c.name != id.as_str());
        Ok(())
    }

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerDetails, ContainerError> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        find(&mut state.containers, id)
            .map(|c| c.clone())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    async fn list_containers(
        &self,
        opts: &ListOptions,
    ) -> Result<Vec<ContainerInfo>, ContainerError> {
        self.hit();
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| opts.all() || c.state == ContainerState::Running)
            .map(|c| ContainerInfo {
                id: c.id.to_string(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state.to_string(),
            })
            .collect())
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        self.hit();
        if self.injected("rename_container") {
            return Err(ContainerError::Runtime(format!("rename failed: {id}")));
        }
        if self.hang_rename {
            let _flag = DropFlag(Arc::clone(&self.rename_dropped));
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let container = find(&mut state.containers, id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.name = new_name.to_string();
        Ok(())
    }
}

#[async_trait]
impl LogOps for MockRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogLineStream, LogError> {
        self.hit();
        let state = self.state.lock().unwrap();
        if !state
            .containers
            .iter()
            .any(|c| c.id == *id || c.name == id.as_str())
        {
            return Err(LogError::ContainerNotFound(id.to_string()));
        }
        let mut lines = state.logs.get(id.as_str()).cloned().unwrap_or_default();
        if let Some(tail) = opts.tail {
            let keep = (tail as usize).min(lines.len());
            lines.drain(..lines.len() - keep);
        }
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl VolumeOps for MockRuntime {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeInfo, VolumeError> {
        self.hit();
        let mut state = self.state.lock().unwrap();
        if state.volumes.contains_key(&spec.name) {
            return Err(VolumeError::AlreadyExists(spec.name.clone()));
        }
        let mut info = volume(&spec.name, spec.driver.as_deref().unwrap_or("local"));
        info.labels = spec.labels.clone();
        info.options = spec.options.clone();
        state.volumes.insert(spec.name.clone(), info.clone());
        Ok(info)
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<(), VolumeError> {
        self.hit();
        self.state
            .lock()
            .unwrap()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    async fn list_volumes(&self, _opts: &ListOptions) -> Result<Vec<VolumeInfo>, VolumeError> {
        self.hit();
        Ok(self.state.lock().unwrap().volumes.values().cloned().collect())
    }
}
