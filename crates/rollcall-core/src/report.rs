use crate::matcher::MatchSet;
use crate::roster::SignatureRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Presence verdict for every roster entry that produced a reference signature.
///
/// Entries without a signature are left out entirely rather than reported absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceReport(BTreeMap<String, bool>);

impl PresenceReport {
    /// Build the report over `records` (the universe), marking ids in
    /// `matches` present and all others absent.
    pub fn build(records: &[SignatureRecord], matches: &MatchSet) -> Self {
        let verdicts = records
            .iter()
            .map(|record| (record.owner_id.clone(), matches.contains(&record.owner_id)))
            .collect();
        Self(verdicts)
    }

    pub fn get(&self, id: &str) -> Option<bool> {
        self.0.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn present_count(&self) -> usize {
        self.0.values().filter(|&&present| present).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(id, present)| (id.as_str(), *present))
    }
}
