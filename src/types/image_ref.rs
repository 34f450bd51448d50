// ABOUTME: Container image reference parsing and validation.
// ABOUTME: Handles nginx, nginx:tag, and registry:port/org/image:tag forms.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// An image name plus tag, the identity used by every image operation.
///
/// The name keeps any registry prefix (`ghcr.io/org/app`); the tag defaults to
/// `latest` when none is given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    name: String,
    tag: String,
}

impl ImageRef {
    /// Build a reference from separately supplied name and tag.
    ///
    /// An empty tag falls back to `latest`, matching how requests carry the two
    /// fields independently.
    pub fn new(name: &str, tag: &str) -> Result<Self, ParseImageRefError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseImageRefError::Empty);
        }
        validate_chars(name)?;

        let tag = tag.trim();
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
        validate_chars(tag)?;
        if tag.contains('/') || tag.contains(':') {
            return Err(ParseImageRefError::InvalidFormat(tag.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Parse a combined `name[:tag]` reference.
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        // A colon followed by a slash belongs to a registry port, not a tag.
        match input.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => {
                if name.is_empty() || tag.is_empty() {
                    return Err(ParseImageRefError::InvalidFormat(input.to_string()));
                }
                Self::new(name, tag)
            }
            _ => Self::new(input, DEFAULT_TAG),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

fn validate_chars(value: &str) -> Result<(), ParseImageRefError> {
    for c in value.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_') {
            return Err(ParseImageRefError::InvalidChar(c));
        }
    }
    Ok(())
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
