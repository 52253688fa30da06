//! Error types and handling
//!
//! Common error types used across the coordinator. Each subsystem owns a
//! narrow error enum; `CoordinatorError` aggregates them for callers that
//! drive the whole client or server surface.

use crate::capture::traits::{DeviceError, TransportError};
use crate::capture::track::TrackKind;
use crate::session::state::SessionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coordinator-wide error type
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Not connected to a conference")]
    NotConnected,

    #[error("A {0} toggle is already in flight")]
    ToggleInFlight(TrackKind),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response for the signaling/UI layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CoordinatorError> for ErrorResponse {
    fn from(error: CoordinatorError) -> Self {
        let code = match &error {
            CoordinatorError::Io(_) => "IO_ERROR",
            CoordinatorError::Serialization(_) => "SERIALIZATION_ERROR",
            CoordinatorError::Device(DeviceError::PermissionDenied(_)) => "PERMISSION_DENIED",
            CoordinatorError::Device(_) => "DEVICE_ERROR",
            CoordinatorError::Transport(_) => "TRANSPORT_ERROR",
            CoordinatorError::Session(SessionError::NotFound(_)) => "NOT_FOUND",
            CoordinatorError::Session(SessionError::Conflict(_)) => "CONFLICT",
            CoordinatorError::Session(SessionError::Forbidden(_)) => "FORBIDDEN",
            CoordinatorError::Session(_) => "SESSION_ERROR",
            CoordinatorError::NotConnected => "NOT_CONNECTED",
            CoordinatorError::ToggleInFlight(_) => "TOGGLE_IN_FLIGHT",
            CoordinatorError::Config(_) => "CONFIG_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CoordinatorError
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
