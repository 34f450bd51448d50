// ABOUTME: Client for the container service, one TCP connection per call.
// ABOUTME: Terminal statuses come back as domain errors; transport failures pass through.

use crate::events::{ContainerInfo, LogLine, ProgressEvent, VolumeInfo};
use crate::options::{OptionParseError, StartOptions};
use crate::runtime::{ContainerDetails, ImageSummary};
use crate::service::{
    ContainerLogsRequest, CreateVolumeRequest, InspectContainerRequest, ListContainersRequest,
    ListImagesRequest, ListVolumesRequest, PullImageRequest, PushImageRequest,
    RemoveContainerRequest, RemoveImageRequest, RemoveVolumeRequest, StartContainerRequest,
    StopContainerRequest, UpdateContainerRequest,
};
use crate::status::{self, DomainError};
use crate::transfer::{self, ChunkSize};
use crate::types::{ImageRef, Metadata, ParseImageRefError};
use crate::wire::{self, ClientFrame, Request, ServerFrame, WireChunk, WireError};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server finished the call with a non-OK status.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("invalid option: {0}")]
    Options(#[from] OptionParseError),

    #[error("invalid image reference: {0}")]
    Image(#[from] ParseImageRefError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Reply to an update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReply {
    pub id: String,
    /// The server is still working on the update.
    pub accepted: bool,
}

type Sender = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type Receiver = SplitStream<Framed<TcpStream, LinesCodec>>;

struct Call {
    sink: Sender,
    source: Receiver,
    chunk_size: ChunkSize,
}

impl Call {
    async fn replies(&mut self, on_frame: impl FnMut(ServerFrame) -> Result<()>) -> Result<()> {
        replies(&mut self.source, on_frame).await
    }
}

/// Read replies until the status frame.
async fn replies(
    source: &mut Receiver,
    mut on_frame: impl FnMut(ServerFrame) -> Result<()>,
) -> Result<()> {
    loop {
        let frame = wire::read_frame::<_, ServerFrame>(source)
            .await?
            .ok_or_else(|| {
                ClientError::Protocol("connection closed before the call finished".into())
            })?;
        match frame {
            ServerFrame::Status(status) if status.is_ok() => return Ok(()),
            ServerFrame::Status(status) => {
                return Err(ClientError::Domain(status::translate(&status.to_status())));
            }
            frame => on_frame(frame)?,
        }
    }
}

fn unexpected(frame: &ServerFrame) -> ClientError {
    ClientError::Protocol(format!("unexpected frame: {frame:?}"))
}

#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    metadata: Metadata,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            metadata: Metadata::new(),
            timeout: None,
        }
    }

    /// Attach a metadata pair to every call, e.g. registry credentials.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Deadline the server applies to each call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: Request) -> Result<Call> {
        let stream = TcpStream::connect(&self.addr).await?;
        let framed = Framed::new(stream, wire::client_codec());
        let (mut sink, mut source) = framed.split();

        let hello = wire::read_frame::<_, ServerFrame>(&mut source)
            .await?
            .ok_or_else(|| ClientError::Protocol("server closed before hello".into()))?;
        let chunk_size = match hello {
            ServerFrame::Hello {
                version,
                chunk_size,
                hostname,
            } => {
                if version != wire::PROTOCOL_VERSION {
                    return Err(ClientError::Protocol(format!(
                        "server speaks protocol {version}, expected {}",
                        wire::PROTOCOL_VERSION
                    )));
                }
                tracing::debug!(%hostname, chunk_size, op = request.name(), "connected");
                ChunkSize::new(chunk_size)
                    .map_err(|e| ClientError::Protocol(e.to_string()))?
            }
            other => return Err(unexpected(&other)),
        };

        let frame = ClientFrame::Call {
            metadata: self.metadata.clone(),
            deadline_ms: self
                .timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            request,
        };
        wire::write_frame(&mut sink, &frame).await?;
        Ok(Call {
            sink,
            source,
            chunk_size,
        })
    }

    async fn events(
        &self,
        request: Request,
        mut on_event: impl FnMut(&ProgressEvent),
    ) -> Result<()> {
        let mut call = self.call(request).await?;
        call.replies(|frame| match frame {
            ServerFrame::Event(event) => {
                on_event(&event);
                Ok(())
            }
            other => Err(unexpected(&other)),
        })
        .await
    }

    async fn rows<T>(
        &self,
        request: Request,
        mut row: impl FnMut(ServerFrame) -> std::result::Result<T, ServerFrame>,
    ) -> Result<Vec<T>> {
        let mut call = self.call(request).await?;
        let mut rows = Vec::new();
        call.replies(|frame| {
            rows.push(row(frame).map_err(|other| unexpected(&other))?);
            Ok(())
        })
        .await?;
        Ok(rows)
    }

    async fn unit(&self, request: Request) -> Result<()> {
        let mut call = self.call(request).await?;
        call.replies(|frame| Err(unexpected(&frame))).await
    }

    async fn single<T>(
        &self,
        request: Request,
        mut reply: impl FnMut(ServerFrame) -> std::result::Result<T, ServerFrame>,
    ) -> Result<T> {
        self.rows(request, &mut reply)
            .await?
            .pop()
            .ok_or_else(|| ClientError::Protocol("missing reply".into()))
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub async fn pull_image(
        &self,
        req: PullImageRequest,
        on_event: impl FnMut(&ProgressEvent),
    ) -> Result<()> {
        self.events(Request::PullImage(req), on_event).await
    }

    /// Upload an image tarball, split into the server's chunk size.
    pub async fn push_image(
        &self,
        req: PushImageRequest,
        payload: Bytes,
        mut on_event: impl FnMut(&ProgressEvent),
    ) -> Result<()> {
        let image = ImageRef::new(&req.image, &req.tag)?;
        let mut call = self.call(Request::PushImage(req)).await?;
        let chunks = transfer::split(&image, payload, call.chunk_size);

        let Call { sink, source, .. } = &mut call;
        let upload = async {
            for chunk in chunks {
                let frame = ClientFrame::Chunk(WireChunk::from(chunk));
                wire::write_frame(&mut *sink, &frame).await?;
            }
            wire::write_frame(&mut *sink, &ClientFrame::Done).await
        };
        let outcome = replies(source, |frame| match frame {
            ServerFrame::Event(event) => {
                on_event(&event);
                Ok(())
            }
            other => Err(unexpected(&other)),
        });
        let (sent, outcome) = tokio::join!(upload, outcome);
        match (outcome, sent) {
            // The server's verdict wins over a broken upload.
            (Ok(()), Err(e)) => Err(e.into()),
            (outcome, _) => outcome,
        }
    }

    pub async fn list_images(&self, req: ListImagesRequest) -> Result<Vec<ImageSummary>> {
        self.rows(Request::ListImages(req), |frame| match frame {
            ServerFrame::Image(image) => Ok(image),
            other => Err(other),
        })
        .await
    }

    pub async fn remove_image(&self, req: RemoveImageRequest) -> Result<()> {
        self.unit(Request::RemoveImage(req)).await
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub async fn start_container(
        &self,
        req: StartContainerRequest,
        on_event: impl FnMut(&ProgressEvent),
    ) -> Result<()> {
        StartOptions::from_raw(&req.options)?;
        self.events(Request::StartContainer(req), on_event).await
    }

    pub async fn update_container(&self, req: UpdateContainerRequest) -> Result<UpdateReply> {
        StartOptions::from_raw(&req.options)?;
        self.single(Request::UpdateContainer(req), |frame| match frame {
            ServerFrame::Updated { id, accepted } => Ok(UpdateReply { id, accepted }),
            other => Err(other),
        })
        .await
    }

    pub async fn stop_container(&self, req: StopContainerRequest) -> Result<()> {
        self.unit(Request::StopContainer(req)).await
    }

    pub async fn remove_container(&self, req: RemoveContainerRequest) -> Result<()> {
        self.unit(Request::RemoveContainer(req)).await
    }

    pub async fn list_containers(&self, req: ListContainersRequest) -> Result<Vec<ContainerInfo>> {
        self.rows(Request::ListContainers(req), |frame| match frame {
            ServerFrame::Container(info) => Ok(info),
            other => Err(other),
        })
        .await
    }

    pub async fn inspect_container(&self, req: InspectContainerRequest) -> Result<ContainerDetails> {
        self.single(Request::InspectContainer(req), |frame| match frame {
            ServerFrame::Inspect(details) => Ok(details),
            other => Err(other),
        })
        .await
    }

    /// Stream log lines to `on_line` as they arrive.
    pub async fn container_logs(
        &self,
        req: ContainerLogsRequest,
        mut on_line: impl FnMut(&LogLine),
    ) -> Result<()> {
        let mut call = self.call(Request::ContainerLogs(req)).await?;
        call.replies(|frame| match frame {
            ServerFrame::Log(line) => {
                on_line(&line);
                Ok(())
            }
            other => Err(unexpected(&other)),
        })
        .await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(&self, req: CreateVolumeRequest) -> Result<VolumeInfo> {
        self.single(Request::CreateVolume(req), |frame| match frame {
            ServerFrame::Volume(volume) => Ok(volume),
            other => Err(other),
        })
        .await
    }

    pub async fn remove_volume(&self, req: RemoveVolumeRequest) -> Result<()> {
        self.unit(Request::RemoveVolume(req)).await
    }

    pub async fn list_volumes(&self, req: ListVolumesRequest) -> Result<Vec<VolumeInfo>> {
        self.rows(Request::ListVolumes(req), |frame| match frame {
            ServerFrame::Volume(volume) => Ok(volume),
            other => Err(other),
        })
        .await
    }
}
