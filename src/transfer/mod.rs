//! Transfer engine
//!
//! Tracks long-running downloads of models and tool packages: starting and
//! cancelling them, decoding their progress streams, persisting in-flight
//! work across restarts and sweeping stale bookkeeping.

mod capacity;
mod clock;
mod decoder;
mod error;
mod http_transport;
mod lifecycle;
mod models;
mod orchestrator;
mod registry;
mod sse;
mod sweeper;
mod transport;

pub use capacity::{CapacityPolicy, FixedCapacityPolicy};
#[cfg(feature = "mock")]
pub use capacity::MockCapacityPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decoder::{ProgressDecoder, RawFrame, FIRST_LAYER_SHARE};
pub use error::{DecodeError, StartError, TransportError};
pub use http_transport::HttpTransport;
pub use lifecycle::{BootReport, LifecycleGuard};
pub use models::*;
pub use orchestrator::TransferOrchestrator;
pub use registry::{AdmissionContext, BeginOutcome, RegistryEvent, RegistryStore};
pub use sse::{SseEvent, SseFramer, DONE_SENTINEL};
pub use sweeper::{
    AbandonHandler, ExpirySweeper, StaleTransferPolicy, SweepReport, SweeperConfig,
};
#[cfg(feature = "mock")]
pub use transport::MockTransport;
pub use transport::{FrameStream, TransferRequest, Transport};
