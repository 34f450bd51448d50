// ABOUTME: Error translation between backend errors, transport statuses, and domain errors.
// ABOUTME: Server side classifies adapter errors; client side translates terminal statuses.

use crate::options::OptionParseError;
use crate::runtime::{ContainerError, ImageError, LogError, VolumeError};
use crate::transfer::FramingError;
use crate::types::ParseImageRefError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::{Code, Status};

/// Stable error vocabulary exposed to callers.
///
/// Only [`translate`] builds these, so every domain error is traceable to a
/// transport status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("resource not found")]
    NotFound,

    #[error("resource is running")]
    Precondition,

    #[error("unspecified")]
    Unspecified,

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Map a terminal transport status to a domain error.
///
/// `Unknown` with no message is how a server reports a failure it could not
/// describe, so it becomes [`DomainError::Unspecified`]. Any other non-OK code
/// keeps its original message.
pub fn translate(status: &Status) -> DomainError {
    match status.code() {
        Code::FailedPrecondition => DomainError::Precondition,
        Code::NotFound => DomainError::NotFound,
        Code::Unknown if status.message().is_empty() => DomainError::Unspecified,
        _ => DomainError::Unknown(status.message().to_string()),
    }
}

/// Serializable form of a transport status, as carried in frames and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStatus {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl WireStatus {
    pub fn ok() -> Self {
        Self {
            code: Code::Ok as i32,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok as i32
    }

    pub fn code(&self) -> Code {
        Code::from_i32(self.code)
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.message.clone())
    }
}

impl From<&Status> for WireStatus {
    fn from(status: &Status) -> Self {
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }
}

impl From<Status> for WireStatus {
    fn from(status: Status) -> Self {
        Self::from(&status)
    }
}

impl From<&WireStatus> for Status {
    fn from(status: &WireStatus) -> Self {
        status.to_status()
    }
}

impl From<&ImageError> for Status {
    fn from(err: &ImageError) -> Self {
        match err {
            ImageError::NotFound(_) => Status::not_found(err.to_string()),
            ImageError::InUse(_) => Status::failed_precondition(err.to_string()),
            ImageError::InvalidReference(_) => Status::invalid_argument(err.to_string()),
            ImageError::AuthenticationFailed(_) => Status::unauthenticated(err.to_string()),
            ImageError::Cancelled => Status::cancelled(err.to_string()),
            ImageError::PullFailed(_) | ImageError::PushFailed(_) | ImageError::Runtime(_) => {
                Status::unknown(err.to_string())
            }
        }
    }
}

impl From<&ContainerError> for Status {
    fn from(err: &ContainerError) -> Self {
        match err {
            ContainerError::NotFound(_) | ContainerError::ImageNotFound(_) => {
                Status::not_found(err.to_string())
            }
            ContainerError::AlreadyRunning(_) | ContainerError::Running(_) => {
                Status::failed_precondition(err.to_string())
            }
            ContainerError::AlreadyExists(_) => Status::already_exists(err.to_string()),
            ContainerError::InvalidConfig(_) => Status::invalid_argument(err.to_string()),
            ContainerError::Cancelled => Status::cancelled(err.to_string()),
            ContainerError::NotRunning(_) | ContainerError::Runtime(_) => {
                Status::unknown(err.to_string())
            }
        }
    }
}

impl From<&LogError> for Status {
    fn from(err: &LogError) -> Self {
        match err {
            LogError::ContainerNotFound(_) => Status::not_found(err.to_string()),
            LogError::StreamError(_) | LogError::Runtime(_) => Status::unknown(err.to_string()),
        }
    }
}

impl From<&VolumeError> for Status {
    fn from(err: &VolumeError) -> Self {
        match err {
            VolumeError::NotFound(_) => Status::not_found(err.to_string()),
            VolumeError::InUse(_) => Status::failed_precondition(err.to_string()),
            VolumeError::AlreadyExists(_) => Status::already_exists(err.to_string()),
            VolumeError::InvalidConfig(_) => Status::invalid_argument(err.to_string()),
            VolumeError::Runtime(_) => Status::unknown(err.to_string()),
        }
    }
}

impl From<&OptionParseError> for Status {
    fn from(err: &OptionParseError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

impl From<&ParseImageRefError> for Status {
    fn from(err: &ParseImageRefError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

impl From<&FramingError> for Status {
    fn from(err: &FramingError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}
