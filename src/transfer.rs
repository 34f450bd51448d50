// ABOUTME: Chunked transfer codec for large binary payloads such as image tarballs.
// ABOUTME: Splits payloads into bounded chunks and reassembles them with identity checks.

use crate::types::ImageRef;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use thiserror::Error;

/// Upper bound on the data carried by one chunk, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ChunkSize(NonZeroUsize);

impl ChunkSize {
    pub const DEFAULT: ChunkSize = match NonZeroUsize::new(64_000) {
        Some(n) => ChunkSize(n),
        None => unreachable!(),
    };

    pub fn new(bytes: usize) -> Result<Self, InvalidChunkSize> {
        NonZeroUsize::new(bytes).map(Self).ok_or(InvalidChunkSize)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<usize> for ChunkSize {
    type Error = InvalidChunkSize;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}

impl From<ChunkSize> for usize {
    fn from(size: ChunkSize) -> Self {
        size.get()
    }
}

impl std::str::FromStr for ChunkSize {
    type Err = InvalidChunkSize;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<usize>()
            .map_err(|_| InvalidChunkSize)
            .and_then(Self::new)
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("chunk size must be a positive number of bytes")]
pub struct InvalidChunkSize;

/// One bounded frame of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub image: String,
    pub tag: String,
    pub data: Bytes,
    /// Set on the final chunk only.
    pub complete: bool,
}

impl Chunk {
    fn identity(&self) -> (&str, &str) {
        (&self.image, &self.tag)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("chunk for {found} does not belong to transfer of {expected}")]
    IdentityMismatch { expected: String, found: String },

    #[error("chunk received after transfer of {0} was complete")]
    AfterComplete(String),

    #[error("transfer of {0} ended without a complete chunk")]
    Incomplete(String),
}

/// Lazy iterator over the chunks of one payload.
///
/// Calling [`split`] again on the same payload restarts the sequence.
#[derive(Debug, Clone)]
pub struct Chunks {
    image: String,
    tag: String,
    remaining: Bytes,
    size: usize,
    done: bool,
}

/// Split `payload` into chunks of at most `size` bytes.
///
/// Exactly one chunk, the last, is marked complete. An empty payload yields a
/// single empty complete chunk. `Bytes` slicing shares the payload buffer.
pub fn split(identity: &ImageRef, payload: Bytes, size: ChunkSize) -> Chunks {
    Chunks {
        image: identity.name().to_string(),
        tag: identity.tag().to_string(),
        remaining: payload,
        size: size.get(),
        done: false,
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let take = self.remaining.len().min(self.size);
        let data = self.remaining.split_to(take);
        let complete = self.remaining.is_empty();
        self.done = complete;
        Some(Chunk {
            image: self.image.clone(),
            tag: self.tag.clone(),
            data,
            complete,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let n = self.remaining.len().div_ceil(self.size).max(1);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

/// Streaming decoder for one transfer.
///
/// Each accepted chunk's data is handed back to the caller so it can be
/// forwarded without holding the whole payload.
#[derive(Debug, Default)]
pub struct Reassembler {
    identity: Option<(String, String)>,
    bytes_received: u64,
    complete: bool,
}

impl Reassembler {
    /// A reassembler that binds to the identity of the first chunk it sees.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reassembler that only accepts chunks for `image`.
    pub fn for_image(image: &ImageRef) -> Self {
        Self {
            identity: Some((image.name().to_string(), image.tag().to_string())),
            ..Self::default()
        }
    }

    pub fn accept(&mut self, chunk: Chunk) -> Result<Bytes, FramingError> {
        let expected = self
            .identity
            .get_or_insert_with(|| (chunk.image.clone(), chunk.tag.clone()));
        if (expected.0.as_str(), expected.1.as_str()) != chunk.identity() {
            return Err(FramingError::IdentityMismatch {
                expected: format!("{}:{}", expected.0, expected.1),
                found: format!("{}:{}", chunk.image, chunk.tag),
            });
        }
        if self.complete {
            return Err(FramingError::AfterComplete(self.label()));
        }
        self.bytes_received += chunk.data.len() as u64;
        self.complete = chunk.complete;
        Ok(chunk.data)
    }

    /// Cumulative payload bytes accepted so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Check that the transfer ended with a complete chunk.
    pub fn finish(&self) -> Result<u64, FramingError> {
        if self.complete {
            Ok(self.bytes_received)
        } else {
            Err(FramingError::Incomplete(self.label()))
        }
    }

    fn label(&self) -> String {
        match &self.identity {
            Some((image, tag)) => format!("{image}:{tag}"),
            None => "<empty>".to_string(),
        }
    }
}

/// Reassemble a full payload from an in-order sequence of chunks.
pub fn reassemble<I>(chunks: I) -> Result<Bytes, FramingError>
where
    I: IntoIterator<Item = Chunk>,
{
    let mut reassembler = Reassembler::new();
    let mut payload = BytesMut::new();
    for chunk in chunks {
        payload.extend_from_slice(&reassembler.accept(chunk)?);
    }
    reassembler.finish()?;
    Ok(payload.freeze())
}
