//! In-memory stand-ins for the network and the ONNX engine.

use crate::engine::EngineError;
use crate::pipeline::{ImageSource, Pipeline, ResultNotifier, SignatureExtractor};
use async_trait::async_trait;
use rollcall_core::{
    BoundingBox, DetectedFace, ExtractError, FaceSignature, Metric, PresenceReport,
    ToleranceMatcher,
};
use rollcall_io::{AcquireError, NotifyError, ScratchSpace, TransientImage};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Image bytes that make [`FakeExtractor`] panic.
pub const PANIC_IMAGE: &str = "panic";

#[derive(Clone)]
enum Route {
    Body { bytes: Vec<u8>, delay: Duration },
    Status(u16),
    Transport,
    DiskFull,
}

/// URL → canned response. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeImages {
    routes: Mutex<HashMap<String, Route>>,
}

impl FakeImages {
    pub fn ok(&self, url: &str, body: &str) {
        self.ok_after(url, body, Duration::ZERO);
    }

    pub fn ok_after(&self, url: &str, body: &str, delay: Duration) {
        let route = Route::Body {
            bytes: body.as_bytes().to_vec(),
            delay,
        };
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn status(&self, url: &str, status: u16) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Status(status));
    }

    /// The connection fails before any response arrives.
    pub fn unreachable(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Transport);
    }

    /// The download succeeds but cannot be written to scratch.
    pub fn disk_full(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::DiskFull);
    }
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn acquire(&self, url: &str, dest: &Path) -> Result<TransientImage, AcquireError> {
        let route = self.routes.lock().unwrap().get(url).cloned();
        match route {
            Some(Route::Body { bytes, delay }) => {
                tokio::time::sleep(delay).await;
                tokio::fs::write(dest, &bytes)
                    .await
                    .map_err(|source| AcquireError::Io {
                        path: dest.to_path_buf(),
                        source,
                    })?;
                Ok(TransientImage::new(dest.to_path_buf(), bytes.len() as u64))
            }
            Some(Route::Status(status)) => Err(AcquireError::Download { status }),
            Some(Route::Transport) => {
                // A relative URL fails inside reqwest without touching the network.
                let err = reqwest::Client::new()
                    .get("no-scheme/image.jpg")
                    .send()
                    .await
                    .unwrap_err();
                Err(AcquireError::Transport(err))
            }
            Some(Route::DiskFull) => Err(AcquireError::Io {
                path: dest.to_path_buf(),
                source: io::Error::other("no space left on device"),
            }),
            None => Err(AcquireError::Download { status: 404 }),
        }
    }
}

/// Image bytes → face vectors. Unknown bytes fail to decode.
#[derive(Default)]
pub struct FakeExtractor {
    faces: Mutex<HashMap<Vec<u8>, Vec<Vec<f32>>>>,
    offline: Mutex<HashSet<Vec<u8>>>,
}

impl FakeExtractor {
    pub fn faces(&self, image: &str, faces: &[&[f32]]) {
        let faces = faces.iter().map(|f| f.to_vec()).collect();
        self.faces.lock().unwrap().insert(image.as_bytes().to_vec(), faces);
    }

    /// Extracting `image` fails as if the engine thread had gone away.
    pub fn engine_down_for(&self, image: &str) {
        self.offline.lock().unwrap().insert(image.as_bytes().to_vec());
    }
}

#[async_trait]
impl SignatureExtractor for FakeExtractor {
    async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        if image == PANIC_IMAGE.as_bytes() {
            panic!("extractor blew up");
        }
        if self.offline.lock().unwrap().contains(&image) {
            return Err(EngineError::ChannelClosed);
        }
        let known = self.faces.lock().unwrap().get(&image).cloned();
        let Some(faces) = known else {
            let decode = image::load_from_memory(&image).unwrap_err();
            return Err(EngineError::Extract(ExtractError::Decode(decode)));
        };
        Ok(faces
            .into_iter()
            .enumerate()
            .map(|(i, values)| DetectedFace {
                signature: FaceSignature::new(values, None),
                location: BoundingBox {
                    x: i as f32 * 100.0,
                    y: 0.0,
                    width: 80.0,
                    height: 80.0,
                    confidence: 0.9,
                    landmarks: None,
                },
            })
            .collect())
    }
}

/// Forwards every delivery to a channel; optionally reports failure.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<(String, PresenceReport)>,
    fail: bool,
    delay: Duration,
}

impl RecordingNotifier {
    pub fn new(fail: bool) -> (Self, mpsc::UnboundedReceiver<(String, PresenceReport)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            tx,
            fail,
            delay: Duration::ZERO,
        };
        (notifier, rx)
    }

    /// Each delivery takes `delay` before it is recorded.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ResultNotifier for RecordingNotifier {
    async fn notify(&self, attendance_id: &str, report: &PresenceReport) -> Result<(), NotifyError> {
        tokio::time::sleep(self.delay).await;
        let _ = self.tx.send((attendance_id.to_string(), report.clone()));
        if self.fail {
            return Err(NotifyError::Status { status: 502 });
        }
        Ok(())
    }
}

pub struct Fixture {
    pub images: Arc<FakeImages>,
    pub extractor: Arc<FakeExtractor>,
    scratch_root: TempDir,
}

impl Fixture {
    pub fn scratch_root(&self) -> &Path {
        self.scratch_root.path()
    }

    /// Pipeline over the fakes, Euclidean metric with tolerance 0.6.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.images.clone(),
            self.extractor.clone(),
            ToleranceMatcher::new(Metric::Euclidean, 0.6),
            ScratchSpace::new(self.scratch_root.path()),
            4,
        )
    }
}

pub fn fixture() -> Fixture {
    Fixture {
        images: Arc::new(FakeImages::default()),
        extractor: Arc::new(FakeExtractor::default()),
        scratch_root: tempfile::tempdir().unwrap(),
    }
}
