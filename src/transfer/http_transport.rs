//! HTTP transport backed by `reqwest`.
//!
//! Models are pulled through `POST {base}/model/stream`, which answers with
//! server-sent events carrying JSON progress frames and a `[DONE]` sentinel.
//! Aborts go to `POST {base}/model/stream/cancel`.
//!
//! Tool packages are installed with a single `PUT {base}/mcp/{id}/download`.
//! Its outcome is surfaced as one terminal frame so both kinds share the
//! same pump.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::decoder::RawFrame;
use super::error::TransportError;
use super::models::TransferKind;
use super::sse::{SseEvent, SseFramer};
use super::transport::{FrameStream, Transport, TransferRequest};

const DEFAULT_SERVICE_NAME: &str = "chat";
const DEFAULT_SERVICE_SOURCE: &str = "local";
const DEFAULT_PROVIDER_NAME: &str = "local_ollama_chat";

#[derive(Debug, Serialize)]
struct ModelStreamBody<'a> {
    model_name: &'a str,
    service_name: &'a str,
    service_source: &'a str,
    provider_name: &'a str,
}

#[derive(Debug, Serialize)]
struct ModelCancelBody<'a> {
    model_name: &'a str,
}

/// Transport talking to the model/tool management server over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    install_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HttpTransport.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the server API (e.g., "http://127.0.0.1:16688/byze/v0.2")
    /// * `timeout` - Connect timeout, and total timeout of tool package installs
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        // No total timeout on the client: model streams stay open for as long
        // as the pull takes. Staleness is the sweeper's job.
        let client = Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            install_timeout: timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_name(request: &TransferRequest) -> &str {
        if request.name.is_empty() {
            &request.resource_id
        } else {
            &request.name
        }
    }

    async fn open_model_stream(
        &self,
        request: &TransferRequest,
    ) -> Result<FrameStream, TransportError> {
        let url = format!("{}/model/stream", self.base_url);
        let body = ModelStreamBody {
            model_name: Self::model_name(request),
            service_name: request
                .params
                .service_name
                .as_deref()
                .unwrap_or(DEFAULT_SERVICE_NAME),
            service_source: request
                .params
                .service_source
                .as_deref()
                .unwrap_or(DEFAULT_SERVICE_SOURCE),
            provider_name: request
                .params
                .provider_name
                .as_deref()
                .unwrap_or(DEFAULT_PROVIDER_NAME),
        };

        debug!("Opening model stream for {} at {}", body.model_name, url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes_stream().map_ok(|chunk| chunk.to_vec()).boxed();
        Ok(sse_frames(bytes))
    }

    fn install_tool_package(&self, request: &TransferRequest) -> FrameStream {
        let url = format!("{}/mcp/{}/download", self.base_url, request.resource_id);
        let client = self.client.clone();
        let timeout = self.install_timeout;
        let id = request.resource_id.clone();

        // Lazy: the request is only sent once the pump polls the stream, so
        // `open` returns immediately and cancellation can drop it mid-flight.
        stream::once(put_install(client, url, timeout, id)).boxed()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &TransferRequest) -> Result<FrameStream, TransportError> {
        match request.kind {
            TransferKind::Model => self.open_model_stream(request).await,
            TransferKind::ToolPackage => Ok(self.install_tool_package(request)),
        }
    }

    async fn abort(&self, request: &TransferRequest) -> Result<(), TransportError> {
        match request.kind {
            TransferKind::Model => {
                let url = format!("{}/model/stream/cancel", self.base_url);
                let body = ModelCancelBody {
                    model_name: Self::model_name(request),
                };
                let response = self
                    .client
                    .post(&url)
                    .timeout(self.install_timeout)
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(())
            }
            TransferKind::ToolPackage => {
                // The server has no cancel endpoint for installs. Dropping the
                // pending request is all there is.
                debug!(
                    "No remote abort for tool package {}, dropping request",
                    request.resource_id
                );
                Ok(())
            }
        }
    }
}

async fn put_install(
    client: Client,
    url: String,
    timeout: Duration,
    id: String,
) -> Result<RawFrame, TransportError> {
    info!("Installing tool package {}", id);
    let response = client.put(&url).timeout(timeout).send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        return Ok(RawFrame::with_status("success"));
    }

    warn!("Tool package {} install failed with {}", id, status);
    let message = if body.is_empty() {
        format!("install failed with status {}", status.as_u16())
    } else {
        body
    };
    Ok(RawFrame {
        status: Some("error".to_string()),
        message: Some(message),
        ..Default::default()
    })
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    framer: SseFramer,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Adapt a raw byte stream into parsed frames. Ends at `[DONE]`, at the end
/// of the body, or after the first read error.
fn sse_frames(bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> FrameStream {
    let state = SseState {
        bytes,
        framer: SseFramer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    SseEvent::Done => return None,
                    SseEvent::Data(payload) => {
                        let frame = RawFrame::parse(&payload).map_err(TransportError::from);
                        return Some((frame, state));
                    }
                }
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.framer.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(TransportError::Http(e)), state));
                }
                None => {
                    state.finished = true;
                    let events = state.framer.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferParams;

    fn chunks(parts: &[&str]) -> BoxStream<'static, Result<Vec<u8>, reqwest::Error>> {
        let owned: Vec<Result<Vec<u8>, reqwest::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned).boxed()
    }

    #[tokio::test]
    async fn test_sse_frames_parses_until_done() {
        let frames: Vec<_> = sse_frames(chunks(&[
            "data: {\"status\":\"pulling manifest\"}\n\n",
            "data: {\"digest\":\"sha256:a\",\"completed\":40,",
            "\"total\":100}\n\ndata: [DONE]\n\n",
            "data: {\"status\":\"ignored\"}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(frames.len(), 2);
        let second = frames[1].as_ref().unwrap();
        assert_eq!(second.digest.as_deref(), Some("sha256:a"));
        assert_eq!(second.completed, Some(40.0));
    }

    #[tokio::test]
    async fn test_sse_frames_reports_malformed_payload() {
        let frames: Vec<_> = sse_frames(chunks(&["data: {oops\n\n"])).collect().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn test_sse_frames_flushes_tail_without_blank_line() {
        let frames: Vec<_> = sse_frames(chunks(&["data: {\"status\":\"success\"}"]))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap().status.as_deref(),
            Some("success")
        );
    }

    #[test]
    fn test_model_name_falls_back_to_id() {
        let mut request = TransferRequest {
            kind: TransferKind::Model,
            resource_id: "qwen2:7b".to_string(),
            name: String::new(),
            params: TransferParams::default(),
        };
        assert_eq!(HttpTransport::model_name(&request), "qwen2:7b");
        request.name = "Qwen2 7B".to_string();
        assert_eq!(HttpTransport::model_name(&request), "Qwen2 7B");
    }

    #[test]
    fn test_base_url_is_normalized() {
        let transport =
            HttpTransport::new("http://localhost:16688/".to_string(), Duration::from_secs(5))
                .unwrap();
        assert_eq!(transport.base_url(), "http://localhost:16688");
    }
}
