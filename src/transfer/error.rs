//! Error types for the transfer engine.

use super::models::TransferKind;
use thiserror::Error;

/// Errors returned synchronously when starting a transfer.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Too many {kind} transfers in progress (limit {limit}). Wait for one to finish or cancel it.")]
    CapacityExceeded { kind: TransferKind, limit: usize },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),
}

/// Errors surfaced by a transport while opening or reading a stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transfer aborted")]
    Aborted,
}

impl TransportError {
    /// Whether the error means the remote side stopped the transfer on
    /// request rather than failing it.
    pub fn is_abort(&self) -> bool {
        match self {
            TransportError::Aborted => true,
            TransportError::Stream(message) => message.contains("aborted"),
            _ => false,
        }
    }
}

/// Errors produced while decoding a raw progress frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
