use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Fixed-length embedding of one detected face (512-d for ArcFace).
///
/// Produced by a face extractor; the pipeline never builds these from
/// anything other than extractor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    values: Vec<f32>,
    /// Model version that produced this signature (e.g., "w600k_r50").
    model_version: Option<String>,
}

impl FaceSignature {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero vector on either side yields 0.0.
    pub fn cosine_similarity(&self, other: &FaceSignature) -> f32 {
        let (dot, norm_a, norm_b) = self
            .values
            .iter()
            .zip(other.values.iter())
            .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (a, b)| {
                (dot + a * b, na + a * a, nb + b * b)
            });

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean (L2) distance between two signatures.
    pub fn euclidean_distance(&self, other: &FaceSignature) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in an image: its signature and where it was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub signature: FaceSignature,
    pub location: BoundingBox,
}
