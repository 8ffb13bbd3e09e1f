//! Transport abstraction for transfer streams.
//!
//! The engine never talks to the network directly. A [`Transport`] opens one
//! frame stream per transfer and issues out-of-band aborts.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::decoder::RawFrame;
use super::error::TransportError;
use super::models::{TransferKind, TransferParams, TransferResource};

/// Stream of raw frames for one transfer. Ends after the server's terminal
/// frame or when the connection closes.
pub type FrameStream = BoxStream<'static, Result<RawFrame, TransportError>>;

/// Everything a transport needs to open or abort a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub resource_id: String,
    pub name: String,
    pub params: TransferParams,
}

impl From<&TransferResource> for TransferRequest {
    fn from(resource: &TransferResource) -> Self {
        Self {
            kind: resource.kind,
            resource_id: resource.id.clone(),
            name: resource.name.clone(),
            params: resource.params.clone(),
        }
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the progress stream for a transfer.
    async fn open(&self, request: &TransferRequest) -> Result<FrameStream, TransportError>;

    /// Ask the server to stop a running transfer. `Ok` means the abort was
    /// acknowledged.
    async fn abort(&self, request: &TransferRequest) -> Result<(), TransportError>;
}
