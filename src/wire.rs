// ABOUTME: JSON-lines frames exchanged between client and server over TCP.
// ABOUTME: One call per connection: hello, call, optional upload, replies, one status.

use crate::events::{ContainerInfo, LogLine, ProgressEvent, VolumeInfo};
use crate::runtime::{ContainerDetails, ImageSummary};
use crate::service::{
    ContainerLogsRequest, CreateVolumeRequest, InspectContainerRequest, ListContainersRequest,
    ListImagesRequest, ListVolumesRequest, PullImageRequest, PushImageRequest,
    RemoveContainerRequest, RemoveImageRequest, RemoveVolumeRequest, StartContainerRequest,
    StopContainerRequest, UpdateContainerRequest,
};
use crate::status::WireStatus;
use crate::transfer::{Chunk, ChunkSize};
use crate::types::Metadata;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{LinesCodec, LinesCodecError};

pub const PROTOCOL_VERSION: u32 = 1;

/// Longest line a client accepts from the server.
pub const CLIENT_MAX_LINE: usize = 8 * 1024 * 1024;

// Room for the JSON envelope around a base64 chunk.
const FRAME_OVERHEAD: usize = 4096;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
}

/// Line codec sized so a full chunk still fits in one frame.
pub fn codec(chunk_size: ChunkSize) -> LinesCodec {
    let encoded = chunk_size.get().div_ceil(3) * 4;
    LinesCodec::new_with_max_length(encoded + FRAME_OVERHEAD)
}

pub fn client_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(CLIENT_MAX_LINE)
}

pub async fn write_frame<S, T>(sink: &mut S, frame: &T) -> Result<(), WireError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
    T: Serialize,
{
    sink.send(serde_json::to_string(frame)?).await?;
    Ok(())
}

/// Next frame, or `None` once the peer closed the connection.
pub async fn read_frame<S, T>(source: &mut S) -> Result<Option<T>, WireError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    T: DeserializeOwned,
{
    match source.next().await {
        None => Ok(None),
        Some(line) => Ok(Some(serde_json::from_str(&line?)?)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Request {
    PullImage(PullImageRequest),
    PushImage(PushImageRequest),
    ListImages(ListImagesRequest),
    RemoveImage(RemoveImageRequest),
    StartContainer(StartContainerRequest),
    UpdateContainer(UpdateContainerRequest),
    StopContainer(StopContainerRequest),
    RemoveContainer(RemoveContainerRequest),
    ListContainers(ListContainersRequest),
    InspectContainer(InspectContainerRequest),
    ContainerLogs(ContainerLogsRequest),
    CreateVolume(CreateVolumeRequest),
    RemoveVolume(RemoveVolumeRequest),
    ListVolumes(ListVolumesRequest),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::PullImage(_) => "pull_image",
            Request::PushImage(_) => "push_image",
            Request::ListImages(_) => "list_images",
            Request::RemoveImage(_) => "remove_image",
            Request::StartContainer(_) => "start_container",
            Request::UpdateContainer(_) => "update_container",
            Request::StopContainer(_) => "stop_container",
            Request::RemoveContainer(_) => "remove_container",
            Request::ListContainers(_) => "list_containers",
            Request::InspectContainer(_) => "inspect_container",
            Request::ContainerLogs(_) => "container_logs",
            Request::CreateVolume(_) => "create_volume",
            Request::RemoveVolume(_) => "remove_volume",
            Request::ListVolumes(_) => "list_volumes",
        }
    }
}

/// Upload chunk as carried on the wire, payload base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChunk {
    pub image: String,
    pub tag: String,
    #[serde(with = "base64_data")]
    pub data: Bytes,
    #[serde(default)]
    pub complete: bool,
}

impl From<Chunk> for WireChunk {
    fn from(chunk: Chunk) -> Self {
        Self {
            image: chunk.image,
            tag: chunk.tag,
            data: chunk.data,
            complete: chunk.complete,
        }
    }
}

impl From<WireChunk> for Chunk {
    fn from(chunk: WireChunk) -> Self {
        Self {
            image: chunk.image,
            tag: chunk.tag,
            data: chunk.data,
            complete: chunk.complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ClientFrame {
    Call {
        #[serde(default)]
        metadata: Metadata,
        /// Milliseconds the server may spend on the call.
        #[serde(default)]
        deadline_ms: Option<u64>,
        request: Request,
    },
    Chunk(WireChunk),
    /// No more upload chunks follow.
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello {
        version: u32,
        chunk_size: usize,
        hostname: String,
    },
    Event(ProgressEvent),
    Image(ImageSummary),
    Container(ContainerInfo),
    Volume(VolumeInfo),
    Log(LogLine),
    Inspect(ContainerDetails),
    Updated {
        id: String,
        /// The update continues on the server after this reply.
        accepted: bool,
    },
    /// Last frame of every call.
    Status(WireStatus),
}

mod base64_data {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
