//! Typed errors for the grab controller and the portal client.

use thiserror::Error;

/// Errors surfaced synchronously by `GrabController::start`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrabError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("a grab run is already active")]
    AlreadyRunning,
}

/// Failures talking to the portal. All of them are recoverable inside the grab loop.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response: {0}")]
    Decode(String),

    /// The portal answered with a non-success code.
    #[error("portal returned code {code}: {message}")]
    Api { code: i64, message: String },
}

impl PortalError {
    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }
}
