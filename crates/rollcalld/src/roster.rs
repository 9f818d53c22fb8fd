//! Reference signatures for the roster, one entry at a time.

use crate::pipeline::{ImageSource, SignatureExtractor};
use futures_util::stream::{self, StreamExt};
use rollcall_core::{EntryOutcome, RosterEntry, RosterSignatures, SignatureRecord, SkipReason};
use rollcall_io::{AcquireError, RequestScratch};
use std::fmt::Display;

/// Build reference signatures for every roster entry.
///
/// Up to `concurrency` entries are fetched and extracted at once; outcomes are
/// still collected in roster order. A failure on one entry skips only that
/// entry.
pub async fn build_signatures(
    images: &dyn ImageSource,
    extractor: &dyn SignatureExtractor,
    scratch: &RequestScratch,
    students: &[RosterEntry],
    concurrency: usize,
) -> RosterSignatures {
    let roster: RosterSignatures = stream::iter(students.iter().cloned().enumerate())
        .map(move |(index, entry)| enroll(images, extractor, scratch, index, entry))
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect();

    if !roster.skipped.is_empty() {
        tracing::info!(
            enrolled = roster.records.len(),
            skipped = roster.skipped.len(),
            "some roster entries have no reference signature"
        );
    }
    roster
}

async fn enroll(
    images: &dyn ImageSource,
    extractor: &dyn SignatureExtractor,
    scratch: &RequestScratch,
    index: usize,
    entry: RosterEntry,
) -> EntryOutcome {
    let Some(url) = entry.reference_url() else {
        return skip(entry, SkipReason::MissingImageUrl, "no url");
    };

    let dest = scratch.reserve(&format!("student-{index}-{}", entry.id));
    let image = match images.acquire(url, &dest).await {
        Ok(image) => image,
        Err(e) => {
            let reason = match &e {
                AcquireError::Download { status } => SkipReason::Download { status: *status },
                AcquireError::Transport(_) => SkipReason::Transport,
                AcquireError::Io { .. } => SkipReason::Storage,
            };
            return skip(entry, reason, e);
        }
    };

    let bytes = match image.read().await {
        Ok(bytes) => bytes,
        Err(e) => return skip(entry, SkipReason::Storage, e),
    };

    match extractor.extract(bytes).await {
        Ok(faces) => match faces.into_iter().next() {
            Some(face) => {
                tracing::debug!(student = %entry.id, confidence = face.location.confidence, "reference face enrolled");
                EntryOutcome::Enrolled(SignatureRecord {
                    owner_id: entry.id,
                    signature: face.signature,
                })
            }
            None => skip(entry, SkipReason::NoFace, "zero faces"),
        },
        Err(e) if e.is_decode() => skip(entry, SkipReason::Decode, e),
        Err(e) => skip(entry, SkipReason::Extraction, e),
    }
}

fn skip(entry: RosterEntry, reason: SkipReason, detail: impl Display) -> EntryOutcome {
    tracing::warn!(student = %entry.id, %reason, error = %detail, "reference image skipped");
    EntryOutcome::skipped(entry.id, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use rollcall_io::ScratchSpace;

    #[tokio::test]
    async fn test_builds_in_roster_order() {
        let fx = fixture();
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/c.jpg", "c");
        fx.extractor.faces("a", &[&[1.0, 0.0]]);
        fx.extractor.faces("c", &[&[0.0, 1.0], &[9.0, 9.0]]);

        let students = vec![
            RosterEntry::new("A", "http://img/a.jpg"),
            RosterEntry::new("B", "http://img/missing.jpg"),
            RosterEntry::new("C", "http://img/c.jpg"),
        ];
        let scratch = ScratchSpace::new(fx.scratch_root()).open("req").await.unwrap();
        let roster = build_signatures(
            fx.images.as_ref(),
            fx.extractor.as_ref(),
            &scratch,
            &students,
            2,
        )
        .await;
        scratch.cleanup().await;

        let ids: Vec<_> = roster.records.iter().map(|r| r.owner_id.as_str()).collect();
        assert_eq!(ids, ["A", "C"]);
        assert_eq!(roster.records[1].signature.values(), &[0.0, 1.0]);
        assert_eq!(roster.skipped[0].id, "B");
        assert_eq!(roster.skipped[0].reason, SkipReason::Download { status: 404 });
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let fx = fixture();
        let scratch = ScratchSpace::new(fx.scratch_root()).open("req").await.unwrap();
        let roster =
            build_signatures(fx.images.as_ref(), fx.extractor.as_ref(), &scratch, &[], 4).await;
        assert!(roster.records.is_empty());
        assert!(roster.skipped.is_empty());
    }
}
