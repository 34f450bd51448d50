// ABOUTME: TCP front end that decodes calls and drives the container service.
// ABOUTME: Accepts until halted, then drains in-flight calls within a bounded timeout.

use crate::events::EventReceiver;
use crate::runtime::Runtime;
use crate::service::{ChunkStream, ContainerService, UpdateOutcome, cancelled_status};
use crate::status::WireStatus;
use crate::transfer::{Chunk, ChunkSize};
use crate::types::{CallContext, ContainerId};
use crate::wire::{self, ClientFrame, Request, ServerFrame, WireError};
use futures::{Sink, Stream, StreamExt};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{Framed, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Status;

/// Upload frames buffered between the socket and the push worker.
const UPLOAD_DEPTH: usize = 4;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to read listener address: {source}"))]
    LocalAddr { source: std::io::Error },
}

/// Bind the listening socket.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.context(BindSnafu { addr })
}

pub struct Server<R> {
    service: Arc<ContainerService<R>>,
    chunk_size: ChunkSize,
    drain_timeout: Duration,
    hostname: Arc<str>,
    shutdown: CancellationToken,
    calls: CancellationToken,
    connections: TaskTracker,
}

impl<R: Runtime> Server<R> {
    pub fn new(
        service: Arc<ContainerService<R>>,
        chunk_size: ChunkSize,
        drain_timeout: Duration,
    ) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        Self {
            service,
            chunk_size,
            drain_timeout,
            hostname: Arc::from(hostname),
            shutdown: CancellationToken::new(),
            calls: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    pub fn service(&self) -> &Arc<ContainerService<R>> {
        &self.service
    }

    /// Token that halts the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting connections; `serve` returns once drained.
    pub fn halt(&self) {
        self.shutdown.cancel();
    }

    /// Accept connections on `listener` until halted, then drain.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().context(LocalAddrSnafu)?;
        tracing::info!(addr = %local, chunk_size = %self.chunk_size, "serving");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tracing::debug!(%peer, "connection accepted");
            let conn = Connection {
                service: Arc::clone(&self.service),
                chunk_size: self.chunk_size,
                hostname: Arc::clone(&self.hostname),
                token: self.calls.child_token(),
                watchers: self.connections.clone(),
            };
            self.connections.spawn(async move {
                if let Err(e) = conn.run(stream).await {
                    tracing::debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        tracing::info!(timeout = ?self.drain_timeout, "draining in-flight calls");
        self.connections.close();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            self.connections.wait().await;
            self.service.drain().await;
        })
        .await;
        if drained.is_err() {
            tracing::warn!("drain timed out; cancelling remaining calls");
            self.calls.cancel();
            self.service.cancel_background();
            let grace = self.service.options().cancel_grace;
            if tokio::time::timeout(grace, self.connections.wait())
                .await
                .is_err()
            {
                tracing::warn!("connections still open after cancellation");
            }
            // Supervisors abort workers that outlast the grace period.
            self.service.drain().await;
        }
        tracing::info!("server stopped");
    }
}

struct Connection<R> {
    service: Arc<ContainerService<R>>,
    chunk_size: ChunkSize,
    hostname: Arc<str>,
    token: CancellationToken,
    watchers: TaskTracker,
}

impl<R: Runtime> Connection<R> {
    async fn run(self, stream: TcpStream) -> Result<(), WireError> {
        let framed = Framed::new(stream, wire::codec(self.chunk_size));
        let (mut sink, mut source) = framed.split();

        wire::write_frame(
            &mut sink,
            &ServerFrame::Hello {
                version: wire::PROTOCOL_VERSION,
                chunk_size: self.chunk_size.get(),
                hostname: self.hostname.to_string(),
            },
        )
        .await?;

        let (metadata, deadline_ms, request) = match wire::read_frame(&mut source).await {
            Ok(Some(ClientFrame::Call {
                metadata,
                deadline_ms,
                request,
            })) => (metadata, deadline_ms, request),
            Ok(None) => return Ok(()),
            Ok(Some(_)) => {
                let status = Status::invalid_argument("expected a call frame");
                return wire::write_frame(&mut sink, &ServerFrame::Status(status.into())).await;
            }
            Err(e) => {
                let status = Status::invalid_argument(e.to_string());
                return wire::write_frame(&mut sink, &ServerFrame::Status(status.into())).await;
            }
        };

        let mut ctx = CallContext::from_token(self.token.clone()).metadata(metadata);
        // A deadline too far out to represent is no deadline.
        if let Some(deadline) =
            deadline_ms.and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)))
        {
            ctx = ctx.deadline(deadline);
        }
        tracing::debug!(op = request.name(), "call received");

        let (chunk_tx, chunk_rx) = mpsc::channel(UPLOAD_DEPTH);
        let reader = tokio::spawn(read_client(source, chunk_tx, self.token.clone()));

        let status = match self.dispatch(ctx, request, chunk_rx, &mut sink).await {
            Ok(Ok(())) => WireStatus::ok(),
            Ok(Err(status)) => WireStatus::from(&status),
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        let sent = wire::write_frame(&mut sink, &ServerFrame::Status(status)).await;
        reader.abort();
        sent
    }

    /// Run one call, writing its replies. The outer error means the client
    /// is gone; the inner one is the call's terminal status.
    async fn dispatch<S>(
        &self,
        ctx: CallContext,
        request: Request,
        chunks: mpsc::Receiver<Result<Chunk, Status>>,
        sink: &mut S,
    ) -> Result<Result<(), Status>, WireError>
    where
        S: Sink<String, Error = LinesCodecError> + Unpin,
    {
        let service = &self.service;
        match request {
            Request::PullImage(req) => match service.pull_image(ctx, req).await {
                Ok(events) => forward_events(events, sink).await,
                Err(status) => Ok(Err(status)),
            },
            Request::PushImage(req) => {
                let chunks: ChunkStream = Box::pin(ReceiverStream::new(chunks));
                match service.push_image(ctx, req, chunks).await {
                    Ok(events) => forward_events(events, sink).await,
                    Err(status) => Ok(Err(status)),
                }
            }
            Request::StartContainer(req) => match service.start_container(ctx, req).await {
                Ok(events) => forward_events(events, sink).await,
                Err(status) => Ok(Err(status)),
            },
            Request::UpdateContainer(req) => match service.update_container(ctx, req).await {
                Ok(UpdateOutcome::Accepted { id, watcher }) => {
                    let frame = ServerFrame::Updated {
                        id: id.to_string(),
                        accepted: true,
                    };
                    self.watchers.spawn(watch_update(id, watcher));
                    wire::write_frame(sink, &frame).await?;
                    Ok(Ok(()))
                }
                Ok(UpdateOutcome::Completed { id }) => {
                    let frame = ServerFrame::Updated {
                        id: id.to_string(),
                        accepted: false,
                    };
                    wire::write_frame(sink, &frame).await?;
                    Ok(Ok(()))
                }
                Err(status) => Ok(Err(status)),
            },
            Request::ListImages(req) => match service.list_images(ctx.clone(), req).await {
                Ok(rows) => forward_rows(&ctx, rows, sink, ServerFrame::Image).await,
                Err(status) => Ok(Err(status)),
            },
            Request::ListContainers(req) => {
                match service.list_containers(ctx.clone(), req).await {
                    Ok(rows) => forward_rows(&ctx, rows, sink, ServerFrame::Container).await,
                    Err(status) => Ok(Err(status)),
                }
            }
            Request::ListVolumes(req) => match service.list_volumes(ctx.clone(), req).await {
                Ok(rows) => forward_rows(&ctx, rows, sink, ServerFrame::Volume).await,
                Err(status) => Ok(Err(status)),
            },
            Request::ContainerLogs(req) => match service.container_logs(ctx.clone(), req).await {
                Ok(rows) => forward_rows(&ctx, rows, sink, ServerFrame::Log).await,
                Err(status) => Ok(Err(status)),
            },
            Request::InspectContainer(req) => match service.inspect_container(ctx, req).await {
                Ok(details) => {
                    wire::write_frame(sink, &ServerFrame::Inspect(details)).await?;
                    Ok(Ok(()))
                }
                Err(status) => Ok(Err(status)),
            },
            Request::CreateVolume(req) => match service.create_volume(ctx, req).await {
                Ok(volume) => {
                    wire::write_frame(sink, &ServerFrame::Volume(volume)).await?;
                    Ok(Ok(()))
                }
                Err(status) => Ok(Err(status)),
            },
            Request::RemoveImage(req) => Ok(service.remove_image(ctx, req).await),
            Request::StopContainer(req) => Ok(service.stop_container(ctx, req).await),
            Request::RemoveContainer(req) => Ok(service.remove_container(ctx, req).await),
            Request::RemoveVolume(req) => Ok(service.remove_volume(ctx, req).await),
        }
    }
}

/// Write every event; the call's status is the terminal event's error, if any.
async fn forward_events<S>(
    mut events: EventReceiver,
    sink: &mut S,
) -> Result<Result<(), Status>, WireError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        let error = event.error.clone();
        wire::write_frame(sink, &ServerFrame::Event(event)).await?;
        if terminal {
            return Ok(match error {
                Some(error) => Err(error.to_status()),
                None => Ok(()),
            });
        }
    }
    Ok(Err(cancelled_status(events.context())))
}

async fn forward_rows<S, T>(
    ctx: &CallContext,
    mut rows: impl Stream<Item = Result<T, Status>> + Unpin,
    sink: &mut S,
    frame: fn(T) -> ServerFrame,
) -> Result<Result<(), Status>, WireError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    while let Some(row) = rows.next().await {
        match row {
            Ok(row) => wire::write_frame(sink, &frame(row)).await?,
            Err(status) => return Ok(Err(status)),
        }
    }
    if ctx.is_done() {
        return Ok(Err(cancelled_status(ctx)));
    }
    Ok(Ok(()))
}

/// Read the rest of the client's frames: upload chunks go to the push
/// worker, and a closed connection cancels the call.
async fn read_client<S>(
    mut source: S,
    chunks: mpsc::Sender<Result<Chunk, Status>>,
    token: CancellationToken,
) where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    let mut chunks = Some(chunks);
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = wire::read_frame::<_, ClientFrame>(&mut source) => frame,
        };
        let item = match frame {
            Ok(Some(ClientFrame::Chunk(chunk))) => Ok(Chunk::from(chunk)),
            Ok(Some(ClientFrame::Done)) => {
                chunks = None;
                continue;
            }
            Ok(Some(ClientFrame::Call { .. })) => {
                Err(Status::invalid_argument("one call per connection"))
            }
            Ok(None) => {
                tracing::debug!("client disconnected; cancelling call");
                token.cancel();
                return;
            }
            Err(e) => Err(Status::invalid_argument(e.to_string())),
        };
        match &chunks {
            Some(tx) => {
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    chunks = None;
                }
            }
            None if item.is_err() => {
                token.cancel();
                return;
            }
            None => {}
        }
    }
}

async fn watch_update(id: ContainerId, mut watcher: EventReceiver) {
    while let Some(event) = watcher.recv().await {
        match &event.error {
            Some(error) => tracing::warn!(
                container = %id,
                code = ?error.code(),
                message = %error.message,
                "background update failed"
            ),
            None if event.is_terminal() => {
                tracing::info!(container = %id, "background update finished")
            }
            None => {}
        }
    }
}
