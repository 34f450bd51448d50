// ABOUTME: Operation orchestrator between transport requests and the runtime adapter.
// ABOUTME: Validates, dispatches to worker tasks, wires the event bus, and streams results.

mod requests;
mod worker;

pub use requests::*;
pub use worker::{Operation, OperationState, Outcome, cancelled_status};

use crate::events::{
    self, ContainerInfo, EventBody, EventReceiver, EventSender, ImageProgress, LogLine,
    ProgressEvent, VolumeInfo,
};
use crate::runtime::{
    ContainerDetails, ContainerSpec, ContainerState, DEFAULT_STOP_TIMEOUT, ImageSummary, RegistryAuth, Runtime,
    UpdateSpec,
};
use crate::transfer::{Chunk, Reassembler};
use crate::types::{CallContext, ContainerId, ImageRef};
use bytes::Bytes;
use futures::future::OptionFuture;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Status;
use worker::{check_context, spawn_supervised, until_done};

/// Rows of a list or log call. Each item is a row or an error, never both.
pub type RowStream<T> = ReceiverStream<Result<T, Status>>;

/// Inbound push frames, already decoded by the transport.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, Status>> + Send>>;

/// Upload chunks buffered between the transport and the adapter.
const PUSH_PIPE_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Intermediate events buffered per operation before dropping.
    pub event_capacity: usize,
    /// Time a worker gets to stop after its call is cancelled.
    pub cancel_grace: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            event_capacity: events::DEFAULT_CAPACITY,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Result of an update call.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The replacement exists and the update continues in the background;
    /// `watcher` yields the remaining events.
    Accepted {
        id: ContainerId,
        watcher: EventReceiver,
    },
    /// The update finished.
    Completed { id: ContainerId },
}

impl UpdateOutcome {
    pub fn id(&self) -> &ContainerId {
        match self {
            UpdateOutcome::Accepted { id, .. } | UpdateOutcome::Completed { id } => id,
        }
    }
}

/// The orchestrator. One instance serves every call; per-call state lives in
/// the worker tasks it spawns.
pub struct ContainerService<R> {
    runtime: Arc<R>,
    options: ServiceOptions,
    tasks: TaskTracker,
    // Scope of work that outlives its call, such as async updates.
    background: CancellationToken,
}

impl<R: Runtime> ContainerService<R> {
    pub fn new(runtime: R, options: ServiceOptions) -> Self {
        Self::with_shared(Arc::new(runtime), options)
    }

    pub fn with_shared(runtime: Arc<R>, options: ServiceOptions) -> Self {
        Self {
            runtime,
            options,
            tasks: TaskTracker::new(),
            background: CancellationToken::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Cancel background work; its workers then get the cancel grace.
    pub fn cancel_background(&self) {
        self.background.cancel();
    }

    /// Wait for every spawned worker, including detached updates.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn spawn<F>(&self, name: &'static str, ctx: CallContext, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_supervised(&self.tasks, name, ctx, self.options.cancel_grace, work);
    }

    fn bus(&self, ctx: &CallContext) -> (EventSender, EventReceiver) {
        events::bus(self.options.event_capacity, ctx.clone())
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub async fn pull_image(
        &self,
        ctx: CallContext,
        req: PullImageRequest,
    ) -> Result<EventReceiver, Status> {
        let mut op = Operation::begin("pull_image");
        op.validate(check_context(&ctx))?;
        let image = op.validate(req.resolve())?;
        let auth = RegistryAuth::from_metadata(ctx.get_metadata());

        let (tx, rx) = self.bus(&ctx);
        let runtime = Arc::clone(&self.runtime);
        op.advance(OperationState::Dispatched);
        self.spawn(op.name(), ctx.clone(), async move {
            op.advance(OperationState::Streaming);
            let result = until_done(&ctx, runtime.pull_image(&image, auth.as_ref(), &tx))
                .await
                .map(|r| r.map_err(|e| Status::from(&e)));
            let failure = image_event(&image, 0).body;
            conclude(&mut op, &ctx, &tx, result, failure, |bytes| {
                image_event(&image, bytes)
            })
            .await;
            tx.close();
        });
        Ok(rx)
    }

    /// Stream an image tarball from `chunks` into the runtime.
    ///
    /// Chunks are reassembled and piped through a bounded channel; a framing
    /// error or cancellation drops the adapter call before the payload ends,
    /// so nothing is committed.
    pub async fn push_image(
        &self,
        ctx: CallContext,
        req: PushImageRequest,
        chunks: ChunkStream,
    ) -> Result<EventReceiver, Status> {
        let mut op = Operation::begin("push_image");
        op.validate(check_context(&ctx))?;
        let image = op.validate(req.resolve())?;

        let (tx, rx) = self.bus(&ctx);
        let runtime = Arc::clone(&self.runtime);
        op.advance(OperationState::Dispatched);
        self.spawn(op.name(), ctx.clone(), async move {
            op.advance(OperationState::Streaming);
            let (pipe_tx, pipe_rx) = mpsc::channel::<Bytes>(PUSH_PIPE_DEPTH);
            let mut upload = Some(Box::pin(runtime.push_image(
                &image,
                Box::pin(ReceiverStream::new(pipe_rx)),
                &tx,
            )));
            let mut feed = Box::pin(feed_chunks(&image, chunks, pipe_tx, &tx));
            let mut fed: Option<u64> = None;

            let result = loop {
                tokio::select! {
                    biased;
                    _ = ctx.done() => break None,
                    Some(res) = OptionFuture::from(upload.as_mut()), if upload.is_some() => {
                        break Some(match (res, fed) {
                            (Err(e), _) => Err(Status::from(&e)),
                            (Ok(()), Some(total)) => Ok(total),
                            (Ok(()), None) => Err(Status::internal(
                                "runtime finished before the upload ended",
                            )),
                        });
                    }
                    (res, pipe) = &mut feed, if fed.is_none() => match res {
                        Ok(total) => {
                            drop(pipe);
                            fed = Some(total);
                        }
                        Err(status) => {
                            // Adapter first: it must not see the payload end.
                            upload = None;
                            drop(pipe);
                            break Some(Err(status));
                        }
                    },
                }
            };
            drop(feed);
            drop(upload);

            let failure = image_event(&image, 0).body;
            conclude(&mut op, &ctx, &tx, result, failure, |total| {
                image_event(&image, total)
            })
            .await;
            tx.close();
        });
        Ok(rx)
    }

    pub async fn list_images(
        &self,
        ctx: CallContext,
        req: ListImagesRequest,
    ) -> Result<RowStream<ImageSummary>, Status> {
        let mut op = Operation::begin("list_images");
        op.validate(check_context(&ctx))?;
        let opts = op.validate(req.resolve())?;
        let limit = opts.limit();
        let runtime = Arc::clone(&self.runtime);
        Ok(self.stream_rows(op, ctx, limit, async move {
            runtime
                .list_images(&opts)
                .await
                .map_err(|e| Status::from(&e))
        }))
    }

    pub async fn remove_image(
        &self,
        ctx: CallContext,
        req: RemoveImageRequest,
    ) -> Result<(), Status> {
        let mut op = Operation::begin("remove_image");
        op.validate(check_context(&ctx))?;
        let image = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .remove_image(&image, req.force)
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub async fn start_container(
        &self,
        ctx: CallContext,
        req: StartContainerRequest,
    ) -> Result<EventReceiver, Status> {
        let mut op = Operation::begin("start_container");
        op.validate(check_context(&ctx))?;
        let spec = op.validate(req.resolve())?;

        let (tx, rx) = self.bus(&ctx);
        let runtime = Arc::clone(&self.runtime);
        op.advance(OperationState::Dispatched);
        self.spawn(op.name(), ctx.clone(), async move {
            op.advance(OperationState::Streaming);
            let result = until_done(&ctx, runtime.create_and_start_container(&spec, &tx))
                .await
                .map(|r| r.map_err(|e| Status::from(&e)));
            let failure = failure_body(&spec);
            conclude(&mut op, &ctx, &tx, result, failure, |id| {
                ProgressEvent::finished(EventBody::Container(
                    spec.info(&id, ContainerState::Running),
                ))
            })
            .await;
            tx.close();
        });
        Ok(rx)
    }

    /// Replace a running instance.
    ///
    /// In async mode the work runs detached from the caller's cancellation
    /// and the call returns once the replacement container exists.
    pub async fn update_container(
        &self,
        ctx: CallContext,
        req: UpdateContainerRequest,
    ) -> Result<UpdateOutcome, Status> {
        let mut op = Operation::begin("update_container");
        op.validate(check_context(&ctx))?;
        let spec = op.validate(req.resolve())?;
        let update = UpdateSpec {
            instance: spec.name.clone(),
            spec,
        };

        let work_ctx = if req.async_mode {
            ctx.detached(&self.background)
        } else {
            ctx.clone()
        };
        let (tx, mut rx) = self.bus(&work_ctx);
        let runtime = Arc::clone(&self.runtime);
        op.advance(OperationState::Dispatched);
        let worker_ctx = work_ctx.clone();
        self.spawn(op.name(), work_ctx, async move {
            let ctx = worker_ctx;
            op.advance(OperationState::Streaming);
            let result = until_done(&ctx, runtime.update_container(&update, &tx))
                .await
                .map(|r| r.map_err(|e| Status::from(&e)));
            let failure = failure_body(&update.spec);
            conclude(&mut op, &ctx, &tx, result, failure, |id| {
                ProgressEvent::finished(EventBody::Container(
                    update.spec.info(&id, ContainerState::Running),
                ))
            })
            .await;
            tx.close();
        });

        if req.async_mode {
            // The caller may still give up before the replacement exists.
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.done() => None,
                    event = rx.recv() => Some(event),
                };
                let Some(event) = next else {
                    rx.context().cancel();
                    return Err(cancelled_status(&ctx));
                };
                let Some(event) = event else {
                    return Err(cancelled_status(rx.context()));
                };
                if let Some(error) = &event.error {
                    return Err(error.to_status());
                }
                if let EventBody::Container(info) = &event.body {
                    return Ok(UpdateOutcome::Accepted {
                        id: ContainerId::new(&info.id),
                        watcher: rx,
                    });
                }
            }
        }

        let mut id = None;
        while let Some(event) = rx.recv().await {
            if let Some(error) = &event.error {
                return Err(error.to_status());
            }
            if let EventBody::Container(info) = &event.body {
                id = Some(ContainerId::new(&info.id));
            }
        }
        match id {
            Some(id) if !ctx.is_done() => Ok(UpdateOutcome::Completed { id }),
            _ => Err(cancelled_status(&ctx)),
        }
    }

    pub async fn stop_container(
        &self,
        ctx: CallContext,
        req: StopContainerRequest,
    ) -> Result<(), Status> {
        let mut op = Operation::begin("stop_container");
        op.validate(check_context(&ctx))?;
        let (id, timeout) = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .stop_container(&id, timeout.unwrap_or(DEFAULT_STOP_TIMEOUT))
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    pub async fn remove_container(
        &self,
        ctx: CallContext,
        req: RemoveContainerRequest,
    ) -> Result<(), Status> {
        let mut op = Operation::begin("remove_container");
        op.validate(check_context(&ctx))?;
        let id = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .remove_container(&id, req.force)
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    pub async fn inspect_container(
        &self,
        ctx: CallContext,
        req: InspectContainerRequest,
    ) -> Result<ContainerDetails, Status> {
        let mut op = Operation::begin("inspect_container");
        op.validate(check_context(&ctx))?;
        let id = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .inspect_container(&id)
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    pub async fn list_containers(
        &self,
        ctx: CallContext,
        req: ListContainersRequest,
    ) -> Result<RowStream<ContainerInfo>, Status> {
        let mut op = Operation::begin("list_containers");
        op.validate(check_context(&ctx))?;
        let opts = op.validate(req.resolve())?;
        let limit = opts.limit();
        let runtime = Arc::clone(&self.runtime);
        Ok(self.stream_rows(op, ctx, limit, async move {
            runtime
                .list_containers(&opts)
                .await
                .map_err(|e| Status::from(&e))
        }))
    }

    pub async fn container_logs(
        &self,
        ctx: CallContext,
        req: ContainerLogsRequest,
    ) -> Result<RowStream<LogLine>, Status> {
        let mut op = Operation::begin("container_logs");
        op.validate(check_context(&ctx))?;
        let (id, opts) = op.validate(req.resolve())?;

        // Resolve the stream up front so a missing container fails the call.
        let lines = match until_done(&ctx, self.runtime.container_logs(&id, &opts)).await {
            Some(Ok(lines)) => lines,
            Some(Err(e)) => {
                let status = Status::from(&e);
                op.fail(&status);
                return Err(status);
            }
            None => {
                op.cancel();
                return Err(cancelled_status(&ctx));
            }
        };

        let (tx, rx) = mpsc::channel(self.options.event_capacity.max(1));
        op.advance(OperationState::Dispatched);
        self.spawn(op.name(), ctx.clone(), async move {
            op.advance(OperationState::Streaming);
            let mut lines = lines;
            loop {
                let Some(next) = until_done(&ctx, lines.next()).await else {
                    op.cancel();
                    return;
                };
                match next {
                    None => break,
                    Some(Ok(line)) => {
                        if !forward_row(&ctx, &tx, Ok(line)).await {
                            op.cancel();
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let status = Status::from(&e);
                        op.fail(&status);
                        forward_row(&ctx, &tx, Err(status)).await;
                        return;
                    }
                }
            }
            op.succeed();
        });
        Ok(ReceiverStream::new(rx))
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(
        &self,
        ctx: CallContext,
        req: CreateVolumeRequest,
    ) -> Result<VolumeInfo, Status> {
        let mut op = Operation::begin("create_volume");
        op.validate(check_context(&ctx))?;
        let spec = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .create_volume(&spec)
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    pub async fn remove_volume(
        &self,
        ctx: CallContext,
        req: RemoveVolumeRequest,
    ) -> Result<(), Status> {
        let mut op = Operation::begin("remove_volume");
        op.validate(check_context(&ctx))?;
        let name = op.validate(req.resolve())?;
        unary(op, &ctx, async {
            self.runtime
                .remove_volume(&name, req.force)
                .await
                .map_err(|e| Status::from(&e))
        })
        .await
    }

    pub async fn list_volumes(
        &self,
        ctx: CallContext,
        req: ListVolumesRequest,
    ) -> Result<RowStream<VolumeInfo>, Status> {
        let mut op = Operation::begin("list_volumes");
        op.validate(check_context(&ctx))?;
        let opts = op.validate(req.resolve())?;
        let limit = opts.limit();
        let runtime = Arc::clone(&self.runtime);
        Ok(self.stream_rows(op, ctx, limit, async move {
            runtime
                .list_volumes(&opts)
                .await
                .map_err(|e| Status::from(&e))
        }))
    }

    /// Run `fetch` on a worker and stream at most `limit` of its rows.
    fn stream_rows<T, F>(
        &self,
        mut op: Operation,
        ctx: CallContext,
        limit: Option<usize>,
        fetch: F,
    ) -> RowStream<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<Vec<T>, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.options.event_capacity.max(1));
        op.advance(OperationState::Dispatched);
        self.spawn(op.name(), ctx.clone(), async move {
            op.advance(OperationState::Streaming);
            let rows = match until_done(&ctx, fetch).await {
                None => {
                    op.cancel();
                    return;
                }
                Some(Err(status)) => {
                    op.fail(&status);
                    forward_row(&ctx, &tx, Err(status)).await;
                    return;
                }
                Some(Ok(rows)) => rows,
            };
            for row in rows.into_iter().take(limit.unwrap_or(usize::MAX)) {
                if !forward_row(&ctx, &tx, Ok(row)).await {
                    op.cancel();
                    return;
                }
            }
            op.succeed();
        });
        ReceiverStream::new(rx)
    }
}

fn image_event(image: &ImageRef, bytes_received: u64) -> ProgressEvent {
    ProgressEvent::finished(EventBody::Image(ImageProgress {
        image: image.name().to_string(),
        tag: image.tag().to_string(),
        bytes_received,
    }))
}

/// Deliver the terminal event for a finished worker.
///
/// `None` means the call was cancelled: nothing more is sent.
async fn conclude<T>(
    op: &mut Operation,
    ctx: &CallContext,
    tx: &EventSender,
    result: Option<Result<T, Status>>,
    failure: EventBody,
    on_success: impl FnOnce(T) -> ProgressEvent,
) {
    let result = match result {
        Some(result) if !ctx.is_done() => result,
        _ => {
            op.cancel();
            return;
        }
    };
    match result {
        Ok(value) => {
            let event = on_success(value);
            tx.finish(event).await;
            op.succeed();
        }
        Err(status) => {
            tx.finish(ProgressEvent::failed(failure, &status)).await;
            op.fail(&status);
        }
    }
}

// Container body for a failed start or update; the id may not exist yet.
fn failure_body(spec: &ContainerSpec) -> EventBody {
    EventBody::Container(ContainerInfo {
        id: String::new(),
        name: spec.name.clone(),
        image: spec.image.to_string(),
        state: "failed".to_string(),
    })
}

async fn unary<T, F>(mut op: Operation, ctx: &CallContext, fut: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    op.advance(OperationState::Dispatched);
    match until_done(ctx, fut).await {
        Some(Ok(value)) => {
            op.succeed();
            Ok(value)
        }
        Some(Err(status)) => {
            op.fail(&status);
            Err(status)
        }
        None => {
            op.cancel();
            Err(cancelled_status(ctx))
        }
    }
}

/// Send one row, waiting for room. Returns `false` once the call is over.
async fn forward_row<T>(
    ctx: &CallContext,
    tx: &mpsc::Sender<Result<T, Status>>,
    row: Result<T, Status>,
) -> bool {
    matches!(until_done(ctx, tx.send(row)).await, Some(Ok(())))
}

/// Read push frames into the upload pipe, reporting cumulative bytes.
///
/// Hands the pipe back so the caller decides when the adapter sees the end
/// of the payload.
async fn feed_chunks(
    image: &ImageRef,
    mut chunks: ChunkStream,
    pipe: mpsc::Sender<Bytes>,
    events: &EventSender,
) -> (Result<u64, Status>, mpsc::Sender<Bytes>) {
    let mut reassembler = Reassembler::for_image(image);
    let result = async {
        while let Some(chunk) = chunks.next().await {
            let data = reassembler.accept(chunk?).map_err(|e| Status::from(&e))?;
            if !data.is_empty() && pipe.send(data).await.is_err() {
                // The adapter stopped reading; its own result decides.
                return Ok(reassembler.bytes_received());
            }
            let progress = ProgressEvent::progress(EventBody::Image(ImageProgress {
                image: image.name().to_string(),
                tag: image.tag().to_string(),
                bytes_received: reassembler.bytes_received(),
            }));
            if events.send(progress) {
                return Err(Status::cancelled("call cancelled"));
            }
        }
        reassembler.finish().map_err(|e| Status::from(&e))
    }
    .await;
    (result, pipe)
}
