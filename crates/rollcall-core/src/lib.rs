//! rollcall-core: Face signatures, matching and presence reports.
//!
//! Uses SCRFD for face detection and ArcFace for face signatures, both
//! running via ONNX Runtime for CPU inference. Matching and report building
//! are pure functions over the resulting signatures.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod report;
pub mod roster;
pub mod types;

use std::path::PathBuf;

pub use extractor::{ExtractError, FaceExtractor};
pub use matcher::{match_presence, MatchSet, Matcher, Metric, ToleranceMatcher};
pub use report::PresenceReport;
pub use roster::{
    AttendanceRequest, EntryOutcome, RosterEntry, RosterSignatures, SignatureRecord, SkipReason,
    SkippedEntry,
};
pub use types::{BoundingBox, DetectedFace, FaceSignature};

/// Default directory holding the ONNX model files.
///
/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
