//! Roster input and the per-entry outcome of reference signature building.

use crate::types::FaceSignature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One enrolled individual and the URL of their reference photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    /// Missing or empty URLs are skipped, never fetched.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl RosterEntry {
    pub fn new(id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image_url: Some(image_url.into()),
        }
    }

    /// The reference image URL, if one is usable.
    pub fn reference_url(&self) -> Option<&str> {
        self.image_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// One reconciliation invocation: a group photo checked against a roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    pub attendance_id: String,
    pub attendance_image_url: String,
    #[serde(default)]
    pub students: Vec<RosterEntry>,
}

/// The reference signature of one roster entry.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    pub owner_id: String,
    pub signature: FaceSignature,
}

/// Why a roster entry produced no signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingImageUrl,
    Download { status: u16 },
    Transport,
    Storage,
    Decode,
    Extraction,
    NoFace,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingImageUrl => write!(f, "no reference image url"),
            Self::Download { status } => write!(f, "download failed with status {status}"),
            Self::Transport => write!(f, "transport failure"),
            Self::Storage => write!(f, "transient storage failure"),
            Self::Decode => write!(f, "reference image could not be decoded"),
            Self::Extraction => write!(f, "signature extraction failed"),
            Self::NoFace => write!(f, "no face detected in reference image"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub id: String,
    pub reason: SkipReason,
}

/// Tagged result of processing a single roster entry.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Enrolled(SignatureRecord),
    Skipped(SkippedEntry),
}

impl EntryOutcome {
    pub fn skipped(id: impl Into<String>, reason: SkipReason) -> Self {
        Self::Skipped(SkippedEntry {
            id: id.into(),
            reason,
        })
    }
}

/// Reference signatures for a whole roster, in roster input order.
#[derive(Debug, Clone, Default)]
pub struct RosterSignatures {
    pub records: Vec<SignatureRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl FromIterator<EntryOutcome> for RosterSignatures {
    fn from_iter<I: IntoIterator<Item = EntryOutcome>>(iter: I) -> Self {
        let mut out = RosterSignatures::default();
        for outcome in iter {
            match outcome {
                EntryOutcome::Enrolled(record) => out.records.push(record),
                EntryOutcome::Skipped(skip) => out.skipped.push(skip),
            }
        }
        out
    }
}
