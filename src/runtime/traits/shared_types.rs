// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: Registry credentials taken from call metadata and the push payload stream.

use crate::types::Metadata;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Image tarball bytes, in order. Ending the stream means the upload is whole.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Bytes> + Send + 'static>>;

pub const METADATA_USERNAME: &str = "username";
pub const METADATA_PASSWORD: &str = "password";
pub const METADATA_REGISTRY: &str = "registry";

/// Registry authentication credentials.
#[derive(Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    /// Registry server (e.g., "ghcr.io").
    pub server: Option<String>,
}

impl RegistryAuth {
    /// Credentials carried as call metadata, if a username is present.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let username = metadata.get(METADATA_USERNAME)?;
        Some(Self {
            username: username.to_string(),
            password: metadata
                .get(METADATA_PASSWORD)
                .unwrap_or_default()
                .to_string(),
            server: metadata.get(METADATA_REGISTRY).map(str::to_string),
        })
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}
