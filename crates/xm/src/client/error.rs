use reqwest::StatusCode;

use common::frame::FrameError;
use common::handshake::HandshakeError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True when output already written must not be trusted.
    pub fn is_authenticity_failure(&self) -> bool {
        matches!(self, ClientError::Frame(FrameError::SignatureMismatch))
    }
}
