//! Signature extraction: encoded image bytes in, detected faces out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("extraction panicked: {0}")]
    Panicked(String),
}

impl ExtractError {
    pub fn is_decode(&self) -> bool {
        matches!(self, ExtractError::Decode(_))
    }
}

/// Detector plus recognizer behind the "image bytes → faces" contract.
///
/// Holds no per-image state; the `&mut` receiver comes from the ONNX sessions.
pub struct FaceExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE).to_string_lossy())?;
        let recognizer =
            FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE).to_string_lossy())?;
        Ok(Self {
            detector,
            recognizer,
        })
    }

    /// Decode `bytes` and return one signature per detected face, most
    /// confident first. An image without faces yields an empty list.
    pub fn extract(&mut self, bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        let boxes = self.detector.detect(&image)?;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            faces = boxes.len(),
            "faces detected"
        );

        let mut faces = Vec::with_capacity(boxes.len());
        for location in boxes {
            if location.landmarks.is_none() {
                tracing::debug!(confidence = location.confidence, "face without landmarks skipped");
                continue;
            }
            let signature = match self.recognizer.extract(&image, &location) {
                Ok(signature) => signature,
                Err(RecognizerError::DegenerateLandmarks) => {
                    tracing::debug!(confidence = location.confidence, "face with degenerate landmarks skipped");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            faces.push(DetectedFace {
                signature,
                location,
            });
        }
        Ok(faces)
    }
}
