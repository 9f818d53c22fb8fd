//! Matching group-photo signatures against roster reference signatures.

use crate::roster::SignatureRecord;
use crate::types::FaceSignature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Distance used to compare two signatures. Lower = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance.
    Euclidean,
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
}

impl Metric {
    pub fn distance(self, a: &FaceSignature, b: &FaceSignature) -> f32 {
        match self {
            Metric::Euclidean => a.euclidean_distance(b),
            Metric::Cosine => 1.0 - a.cosine_similarity(b),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => f.write_str("euclidean"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// Strategy for crediting a probe signature to a roster entry.
pub trait Matcher {
    /// Return the roster record the probe is credited to, if any.
    fn credit<'a>(
        &self,
        probe: &FaceSignature,
        roster: &'a [SignatureRecord],
    ) -> Option<&'a SignatureRecord>;
}

/// First-match-wins tolerance policy.
///
/// Roster records are scanned in order and the first one whose distance is
/// `<= tolerance` is credited. A face that is ambiguous between two members
/// is always credited to the earlier-listed one.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceMatcher {
    pub metric: Metric,
    pub tolerance: f32,
}

impl ToleranceMatcher {
    pub fn new(metric: Metric, tolerance: f32) -> Self {
        Self { metric, tolerance }
    }
}

impl Matcher for ToleranceMatcher {
    fn credit<'a>(
        &self,
        probe: &FaceSignature,
        roster: &'a [SignatureRecord],
    ) -> Option<&'a SignatureRecord> {
        roster.iter().find(|record| {
            let distance = self.metric.distance(probe, &record.signature);
            let hit = distance <= self.tolerance;
            if hit {
                tracing::debug!(student = %record.owner_id, distance, "face matched");
            }
            hit
        })
    }
}

/// Roster ids credited as present by at least one group-photo face.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    present: BTreeSet<String>,
}

impl MatchSet {
    pub fn contains(&self, id: &str) -> bool {
        self.present.contains(id)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.present.iter().map(String::as_str)
    }
}

/// Credit each group-photo face to at most one roster entry.
///
/// Entries already present stay present when matched again; the result is a
/// union over all faces and is empty when there are no faces.
pub fn match_presence<M: Matcher + ?Sized>(
    matcher: &M,
    group: &[FaceSignature],
    roster: &[SignatureRecord],
) -> MatchSet {
    let mut matches = MatchSet::default();
    for probe in group {
        if let Some(record) = matcher.credit(probe, roster) {
            matches.present.insert(record.owner_id.clone());
        }
    }
    matches
}
