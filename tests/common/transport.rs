#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use transfer_engine::transfer::{
    FrameStream, RawFrame, TransferRequest, Transport, TransportError,
};

type FrameResult = Result<RawFrame, TransportError>;

struct Script {
    tx: mpsc::UnboundedSender<FrameResult>,
    rx: Option<mpsc::UnboundedReceiver<FrameResult>>,
}

impl Script {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Fake transport whose streams are fed by the test.
///
/// Frames pushed before a stream is opened are delivered to the next open
/// of that id. Once a stream has been handed out, reopening the id starts an
/// empty script.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    opens: Mutex<Vec<String>>,
    aborts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<R>(&self, id: &str, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(id.to_string()).or_insert_with(Script::new);
        f(script)
    }

    /// Queue a frame. Returns false if the stream reading it is gone.
    pub fn push(&self, id: &str, frame: RawFrame) -> bool {
        self.with_script(id, |script| script.tx.send(Ok(frame)).is_ok())
    }

    pub fn push_json(&self, id: &str, payload: &str) -> bool {
        self.push(id, RawFrame::parse(payload).unwrap())
    }

    pub fn push_error(&self, id: &str, error: TransportError) -> bool {
        self.with_script(id, |script| script.tx.send(Err(error)).is_ok())
    }

    /// End the stream without a terminal frame.
    pub fn close(&self, id: &str) {
        self.scripts.lock().unwrap().remove(id);
    }

    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self, id: &str) -> usize {
        self.opens.lock().unwrap().iter().filter(|o| *o == id).count()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &TransferRequest) -> Result<FrameStream, TransportError> {
        let id = request.resource_id.clone();
        let rx = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(id.clone()).or_insert_with(Script::new);
            match script.rx.take() {
                Some(rx) => rx,
                None => {
                    *script = Script::new();
                    script.rx.take().unwrap()
                }
            }
        };
        self.opens.lock().unwrap().push(id);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed())
    }

    async fn abort(&self, request: &TransferRequest) -> Result<(), TransportError> {
        self.aborts.lock().unwrap().push(request.resource_id.clone());
        Ok(())
    }
}
