//! Progress stream decoder.
//!
//! Turns raw frames into [`ProgressDelta`]s. Two frame shapes are accepted:
//!
//! - the layer form `{status, digest, completed, total}` emitted while model
//!   layers are pulled, one digest per layer;
//! - the flat form `{status, completedsize, totalsize, progress, error}`.
//!
//! The first layer of a model carries nearly all of its bytes, so it drives
//! the displayed percentage up to [`FIRST_LAYER_SHARE`]; every later layer
//! (config, template, license...) shares the remainder. Layers can be pulled
//! concurrently, so progress is tracked per digest and summed. The percentage is
//! monotonic and only reaches 100 on success.

use std::collections::HashMap;

use serde::Deserialize;

use super::error::{DecodeError, TransportError};
use super::models::{ProgressDelta, TransferStatus};

/// Percentage of the bar owned by the first layer.
pub const FIRST_LAYER_SHARE: u64 = 94;

const DEFAULT_ERROR_MESSAGE: &str = "transfer failed on the server";

/// One frame as sent by the server. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawFrame {
    pub status: Option<String>,
    pub digest: Option<String>,
    pub completed: Option<f64>,
    pub total: Option<f64>,
    pub completedsize: Option<f64>,
    pub totalsize: Option<f64>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl RawFrame {
    /// Parse a JSON payload.
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn with_status(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Default::default()
        }
    }
}

fn to_units(value: Option<f64>) -> Option<u64> {
    value.filter(|v| v.is_finite()).map(|v| v.max(0.0) as u64)
}

// Digest-less frames report sizes either as completedsize/totalsize or as
// plain completed/total.
fn flat_completed(frame: &RawFrame) -> Option<u64> {
    to_units(frame.completedsize.or(frame.completed))
}

fn flat_total(frame: &RawFrame) -> Option<u64> {
    to_units(frame.totalsize.or(frame.total))
}

#[derive(Debug, Default, Clone, Copy)]
struct LayerProgress {
    completed: u64,
    total: u64,
}

/// Stateful decoder for a single stream session.
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    /// Digest of the first layer announced, the one that owns most bytes.
    first_digest: Option<String>,
    /// Layers may be pulled concurrently, so their frames interleave.
    layers: HashMap<String, LayerProgress>,
    /// Highest cumulative completed value emitted so far.
    completed: u64,
    total: Option<u64>,
    percent: u8,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentage emitted so far.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Decode one frame.
    pub fn decode(&mut self, frame: RawFrame) -> ProgressDelta {
        match frame.status.as_deref() {
            Some("success") => {
                if frame.digest.is_none() {
                    self.emit_units(flat_completed(&frame), flat_total(&frame));
                }
                return self.completed_delta();
            }
            Some("error") => {
                let message = frame
                    .message
                    .or(frame.error)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                return ProgressDelta::failed(message);
            }
            Some("canceled") => return ProgressDelta::paused(),
            _ => {}
        }

        if let Some(error) = frame.error.as_deref().filter(|e| !e.is_empty()) {
            if error.contains("aborted") {
                return ProgressDelta::paused();
            }
            return ProgressDelta::failed(error);
        }

        if let Some(digest) = frame.digest.as_deref() {
            self.decode_layer(digest, &frame)
        } else {
            self.decode_flat(&frame)
        }
    }

    /// Decode a raw JSON payload, mapping malformed input to a failure.
    pub fn decode_payload(&mut self, payload: &str) -> ProgressDelta {
        match RawFrame::parse(payload) {
            Ok(frame) => self.decode(frame),
            Err(e) => ProgressDelta::failed(format!("malformed progress frame: {}", e)),
        }
    }

    /// Map a transport failure. An abort acknowledged by the server pauses
    /// the transfer, everything else fails it.
    pub fn decode_transport_error(&self, error: &TransportError) -> ProgressDelta {
        if error.is_abort() {
            ProgressDelta::paused()
        } else {
            ProgressDelta::failed(error.to_string())
        }
    }

    fn completed_delta(&mut self) -> ProgressDelta {
        self.percent = 100;
        let total = self.total.unwrap_or(self.completed).max(self.completed);
        self.completed = total;
        ProgressDelta {
            status: TransferStatus::Completed,
            completed_units: Some(total),
            total_units: Some(total),
            progress: Some(100),
            error: None,
        }
    }

    fn decode_layer(&mut self, digest: &str, frame: &RawFrame) -> ProgressDelta {
        if self.first_digest.is_none() {
            self.first_digest = Some(digest.to_string());
        }

        let (Some(completed), Some(total)) = (to_units(frame.completed), to_units(frame.total))
        else {
            // Layer announcement without sizes yet.
            return ProgressDelta::in_progress();
        };
        if total == 0 {
            return ProgressDelta::in_progress();
        }

        let layer = self.layers.entry(digest.to_string()).or_default();
        layer.total = layer.total.max(total);
        layer.completed = layer.completed.max(completed).min(layer.total);

        let mut first = LayerProgress::default();
        let mut rest = LayerProgress::default();
        for (layer_digest, layer) in &self.layers {
            let bucket = if self.first_digest.as_deref() == Some(layer_digest.as_str()) {
                &mut first
            } else {
                &mut rest
            };
            bucket.completed += layer.completed;
            bucket.total += layer.total;
        }

        let mut candidate = 0;
        if first.total > 0 {
            candidate += first.completed * FIRST_LAYER_SHARE / first.total;
        }
        if rest.total > 0 {
            candidate += (100 - FIRST_LAYER_SHARE) * rest.completed / rest.total;
        }
        self.percent = self.percent.max(candidate.min(99) as u8);

        self.emit_units(
            Some(first.completed + rest.completed),
            Some(first.total + rest.total),
        )
    }

    fn decode_flat(&mut self, frame: &RawFrame) -> ProgressDelta {
        if let Some(progress) = frame.progress.filter(|p| p.is_finite()) {
            let progress = progress.round().clamp(0.0, 100.0) as u8;
            // 100 is reserved for the success frame.
            self.percent = self.percent.max(progress.min(99));
        }
        self.emit_units(flat_completed(frame), flat_total(frame))
    }

    fn emit_units(&mut self, completed: Option<u64>, total: Option<u64>) -> ProgressDelta {
        if let Some(total) = total {
            self.total = Some(self.total.map_or(total, |known| known.max(total)));
        }
        if let Some(completed) = completed {
            self.completed = self.completed.max(completed);
        }
        if let Some(total) = self.total {
            self.completed = self.completed.min(total);
        }

        ProgressDelta {
            status: TransferStatus::InProgress,
            completed_units: completed.map(|_| self.completed),
            total_units: total.and(self.total),
            progress: (self.percent > 0).then_some(self.percent),
            error: None,
        }
    }
}
