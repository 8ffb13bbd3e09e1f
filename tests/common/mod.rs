//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEngine, MODEL_1_ID};
//!
//! #[tokio::test]
//! async fn test_download() {
//!     let engine = TestEngine::spawn().await;
//!     engine.start_model(MODEL_1_ID).unwrap();
//!     engine.transport.push_json(MODEL_1_ID, r#"{"status":"success"}"#);
//! }
//! ```

mod constants;
mod fixtures;
mod transport;

pub use constants::*;
pub use fixtures::{wait_for_record, wait_for_status, wait_for_view, TestEngine};
