use rollcall_core::{DetectedFace, ExtractError, FaceExtractor};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// True when the input bytes were not a readable image.
    pub fn is_decode(&self) -> bool {
        matches!(self, EngineError::Extract(e) if e.is_decode())
    }
}

type ExtractResult = Result<Vec<DetectedFace>, ExtractError>;

/// Messages sent from request tasks to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<ExtractResult>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect and embed every face in an encoded image.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously so a missing model fails startup,
/// then serves extraction requests one at a time.
pub fn spawn_engine(model_dir: &Path, queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let mut extractor = FaceExtractor::load(model_dir)?;
    tracing::info!(dir = %model_dir.display(), "face models loaded");
    spawn_worker(move |image| extractor.extract(image), queue_depth)
}

/// Run `extract` on a named thread behind a bounded queue.
///
/// A panic while handling one image is answered with
/// [`ExtractError::Panicked`]; the thread keeps serving.
fn spawn_worker<F>(mut extract: F, queue_depth: usize) -> Result<EngineHandle, EngineError>
where
    F: FnMut(&[u8]) -> ExtractResult + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| extract(&image)))
                            .unwrap_or_else(|payload| {
                                let message = panic_message(payload.as_ref());
                                tracing::error!(error = %message, "extraction panicked");
                                Err(ExtractError::Panicked(message))
                            });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
