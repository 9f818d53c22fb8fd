//! Presence reconciliation: group photo + roster in, presence report out.

use crate::engine::{EngineError, EngineHandle};
use crate::roster;
use async_trait::async_trait;
use rollcall_core::{
    match_presence, AttendanceRequest, DetectedFace, FaceSignature, PresenceReport, SkippedEntry,
    ToleranceMatcher,
};
use rollcall_io::{
    AcquireError, HttpFetcher, NotifyError, RequestScratch, ScratchError, ScratchSpace,
    TransientImage, WebhookNotifier,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Fetches a remote image into a reserved scratch path.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn acquire(&self, url: &str, dest: &Path) -> Result<TransientImage, AcquireError>;
}

#[async_trait]
impl ImageSource for HttpFetcher {
    async fn acquire(&self, url: &str, dest: &Path) -> Result<TransientImage, AcquireError> {
        HttpFetcher::acquire(self, url, dest).await
    }
}

/// Turns encoded image bytes into zero or more detected faces.
#[async_trait]
pub trait SignatureExtractor: Send + Sync {
    async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError>;
}

#[async_trait]
impl SignatureExtractor for EngineHandle {
    async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        EngineHandle::extract(self, image).await
    }
}

/// Best-effort delivery of a finished report.
#[async_trait]
pub trait ResultNotifier: Send + Sync {
    async fn notify(&self, attendance_id: &str, report: &PresenceReport) -> Result<(), NotifyError>;
}

#[async_trait]
impl ResultNotifier for WebhookNotifier {
    async fn notify(&self, attendance_id: &str, report: &PresenceReport) -> Result<(), NotifyError> {
        WebhookNotifier::notify(self, attendance_id, report).await
    }
}

/// Failures that end the whole request. Problems with a single roster entry
/// never surface here; they become [`SkippedEntry`] values instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to download attendance image: {status}")]
    AttendanceDownload { status: u16 },
    #[error("attendance image could not be acquired: {0}")]
    AttendanceAcquire(#[source] AcquireError),
    #[error("attendance image could not be processed: {0}")]
    AttendanceImage(#[source] EngineError),
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Everything a successful reconciliation produced.
#[derive(Debug)]
pub struct Reconciliation {
    pub report: PresenceReport,
    pub skipped: Vec<SkippedEntry>,
    /// Faces found in the group photo.
    pub faces_detected: usize,
}

pub struct Pipeline {
    images: Arc<dyn ImageSource>,
    extractor: Arc<dyn SignatureExtractor>,
    matcher: ToleranceMatcher,
    scratch: ScratchSpace,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        images: Arc<dyn ImageSource>,
        extractor: Arc<dyn SignatureExtractor>,
        matcher: ToleranceMatcher,
        scratch: ScratchSpace,
        concurrency: usize,
    ) -> Self {
        Self {
            images,
            extractor,
            matcher,
            scratch,
            concurrency: concurrency.max(1),
        }
    }

    pub fn matcher(&self) -> &ToleranceMatcher {
        &self.matcher
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Reconcile one request. Transient images are released before this
    /// returns, on success and failure alike.
    pub async fn reconcile(&self, request: &AttendanceRequest) -> Result<Reconciliation, PipelineError> {
        let scratch = self.scratch.open(&request.attendance_id).await?;
        tracing::debug!(scratch = %scratch.path().display(), students = request.students.len(), "reconciling");
        let outcome = self.run(&scratch, request).await;
        scratch.cleanup().await;
        outcome
    }

    async fn run(
        &self,
        scratch: &RequestScratch,
        request: &AttendanceRequest,
    ) -> Result<Reconciliation, PipelineError> {
        let group = self.group_signatures(scratch, &request.attendance_image_url);
        let roster = async {
            Ok(roster::build_signatures(
                self.images.as_ref(),
                self.extractor.as_ref(),
                scratch,
                &request.students,
                self.concurrency,
            )
            .await)
        };
        // A failed group photo drops any roster work still in flight.
        let (group, roster) = tokio::try_join!(group, roster)?;

        let matches = match_presence(&self.matcher, &group, &roster.records);
        let report = PresenceReport::build(&roster.records, &matches);

        tracing::info!(
            students = request.students.len(),
            enrolled = roster.records.len(),
            skipped = roster.skipped.len(),
            faces = group.len(),
            present = report.present_count(),
            "presence report generated"
        );

        Ok(Reconciliation {
            report,
            skipped: roster.skipped,
            faces_detected: group.len(),
        })
    }

    /// The group photo is mandatory: every failure here is fatal.
    async fn group_signatures(
        &self,
        scratch: &RequestScratch,
        url: &str,
    ) -> Result<Vec<FaceSignature>, PipelineError> {
        let dest = scratch.reserve("attendance");
        let image = self.images.acquire(url, &dest).await.map_err(|e| match e {
            AcquireError::Download { status } => PipelineError::AttendanceDownload { status },
            other => PipelineError::AttendanceAcquire(other),
        })?;
        tracing::debug!(bytes = image.size(), "attendance image acquired");
        let bytes = image.read().await.map_err(PipelineError::AttendanceAcquire)?;
        let faces = self
            .extractor
            .extract(bytes)
            .await
            .map_err(PipelineError::AttendanceImage)?;

        tracing::debug!(faces = faces.len(), "attendance image processed");
        Ok(faces.into_iter().map(|face| face.signature).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use rollcall_core::{RosterEntry, SkipReason};
    use std::time::Duration;

    fn request(students: Vec<RosterEntry>) -> AttendanceRequest {
        AttendanceRequest {
            attendance_id: "att-1".into(),
            attendance_image_url: "http://img/group.jpg".into(),
            students,
        }
    }

    fn roster_ab() -> Vec<RosterEntry> {
        vec![
            RosterEntry::new("A", "http://img/a.jpg"),
            RosterEntry::new("B", "http://img/b.jpg"),
        ]
    }

    fn assert_scratch_empty(fx: &Fixture) {
        let left = std::fs::read_dir(fx.scratch_root()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(left, 0, "transient files left behind");
    }

    #[tokio::test]
    async fn test_one_face_matches_a() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/b.jpg", "b");
        fx.extractor.faces("group", &[&[0.0, 0.1]]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.faces("b", &[&[5.0, 5.0]]);

        let result = fx.pipeline().reconcile(&request(roster_ab())).await.unwrap();
        assert_eq!(
            serde_json::to_value(&result.report).unwrap(),
            serde_json::json!({"A": true, "B": false})
        );
        assert_eq!(result.faces_detected, 1);
        assert!(result.skipped.is_empty());
        assert_scratch_empty(&fx);
    }

    #[tokio::test]
    async fn test_failed_reference_download_is_excluded() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.status("http://img/b.jpg", 404);
        fx.extractor.faces("group", &[&[0.0, 0.1]]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);

        let result = fx.pipeline().reconcile(&request(roster_ab())).await.unwrap();
        assert_eq!(
            serde_json::to_value(&result.report).unwrap(),
            serde_json::json!({"A": true})
        );
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].id, "B");
        assert_eq!(result.skipped[0].reason, SkipReason::Download { status: 404 });
        assert_scratch_empty(&fx);
    }

    #[tokio::test]
    async fn test_unusable_references_never_reported() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/noface.jpg", "noface");
        fx.images.ok("http://img/junk.jpg", "junk");
        fx.extractor.faces("group", &[&[0.0, 0.0]]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.faces("noface", &[]);

        let students = vec![
            RosterEntry::new("A", "http://img/a.jpg"),
            RosterEntry::new("N", "http://img/noface.jpg"),
            RosterEntry::new("J", "http://img/junk.jpg"),
            RosterEntry { id: "U".into(), image_url: None },
        ];
        let result = fx.pipeline().reconcile(&request(students)).await.unwrap();

        assert_eq!(result.report.len(), 1);
        assert_eq!(result.report.get("A"), Some(true));
        let reasons: Vec<_> = result.skipped.iter().map(|s| (s.id.as_str(), s.reason.clone())).collect();
        assert_eq!(
            reasons,
            [
                ("N", SkipReason::NoFace),
                ("J", SkipReason::Decode),
                ("U", SkipReason::MissingImageUrl),
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_storage_and_engine_failures_skip_entries() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.unreachable("http://img/t.jpg");
        fx.images.disk_full("http://img/s.jpg");
        fx.images.ok("http://img/e.jpg", "e");
        fx.extractor.faces("group", &[&[0.0, 0.0]]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.engine_down_for("e");

        let students = vec![
            RosterEntry::new("T", "http://img/t.jpg"),
            RosterEntry::new("A", "http://img/a.jpg"),
            RosterEntry::new("S", "http://img/s.jpg"),
            RosterEntry::new("E", "http://img/e.jpg"),
        ];
        let result = fx.pipeline().reconcile(&request(students)).await.unwrap();

        assert_eq!(
            serde_json::to_value(&result.report).unwrap(),
            serde_json::json!({"A": true})
        );
        let reasons: Vec<_> = result.skipped.iter().map(|s| (s.id.as_str(), s.reason.clone())).collect();
        assert_eq!(
            reasons,
            [
                ("T", SkipReason::Transport),
                ("S", SkipReason::Storage),
                ("E", SkipReason::Extraction),
            ]
        );
        assert_scratch_empty(&fx);
    }

    #[tokio::test]
    async fn test_zero_faces_all_absent() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "empty-room");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/b.jpg", "b");
        fx.extractor.faces("empty-room", &[]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.faces("b", &[&[5.0, 5.0]]);

        let result = fx.pipeline().reconcile(&request(roster_ab())).await.unwrap();
        assert_eq!(result.report.len(), 2);
        assert_eq!(result.report.present_count(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_face_credits_earlier_member() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "twin");
        fx.images.ok("http://img/b.jpg", "twin");
        fx.extractor.faces("group", &[&[1.0, 1.0]]);
        fx.extractor.faces("twin", &[&[1.0, 1.0]]);

        let result = fx.pipeline().reconcile(&request(roster_ab())).await.unwrap();
        assert_eq!(result.report.get("A"), Some(true));
        assert_eq!(result.report.get("B"), Some(false));
    }

    #[tokio::test]
    async fn test_first_reference_face_is_used() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a-with-friend");
        // Group face matches only the second face of A's reference photo.
        fx.extractor.faces("group", &[&[7.0, 7.0]]);
        fx.extractor.faces("a-with-friend", &[&[0.0, 0.0], &[7.0, 7.0]]);

        let students = vec![RosterEntry::new("A", "http://img/a.jpg")];
        let result = fx.pipeline().reconcile(&request(students)).await.unwrap();
        assert_eq!(result.report.get("A"), Some(false));
    }

    #[tokio::test]
    async fn test_record_order_follows_roster_under_concurrency() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.extractor.faces("group", &[]);
        let mut students = Vec::new();
        for i in 0..12u64 {
            let url = format!("http://img/{i}.jpg");
            let key = format!("s{i}");
            // Earlier entries finish last.
            fx.images.ok_after(&url, &key, Duration::from_millis(60 - i * 5));
            students.push(RosterEntry::new(format!("S{i:02}"), url));
        }
        // Only odd entries have a face, so the skip list order is observable.
        for i in (1..12).step_by(2) {
            fx.extractor.faces(&format!("s{i}"), &[&[i as f32, 0.0]]);
        }
        for i in (0..12).step_by(2) {
            fx.extractor.faces(&format!("s{i}"), &[]);
        }

        let result = fx.pipeline().reconcile(&request(students)).await.unwrap();
        let skipped: Vec<_> = result.skipped.iter().map(|s| s.id.clone()).collect();
        assert_eq!(skipped, ["S00", "S02", "S04", "S06", "S08", "S10"]);
        assert_eq!(result.report.len(), 6);
    }

    #[tokio::test]
    async fn test_group_download_failure_is_fatal_and_cleaned() {
        let fx = fixture();
        fx.images.status("http://img/group.jpg", 403);
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/b.jpg", "b");
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.faces("b", &[&[5.0, 5.0]]);

        let err = fx.pipeline().reconcile(&request(roster_ab())).await.unwrap_err();
        assert!(matches!(err, PipelineError::AttendanceDownload { status: 403 }));
        assert_scratch_empty(&fx);
    }

    #[tokio::test]
    async fn test_group_decode_failure_is_fatal() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "not-a-photo");
        fx.images.ok("http://img/a.jpg", "a");
        fx.extractor.faces("a", &[&[0.0, 0.0]]);

        let students = vec![RosterEntry::new("A", "http://img/a.jpg")];
        let err = fx.pipeline().reconcile(&request(students)).await.unwrap_err();
        match err {
            PipelineError::AttendanceImage(e) => assert!(e.is_decode()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_scratch_empty(&fx);
    }

    #[tokio::test]
    async fn test_matching_twice_is_stable() {
        let fx = fixture();
        fx.images.ok("http://img/group.jpg", "group");
        fx.images.ok("http://img/a.jpg", "a");
        fx.images.ok("http://img/b.jpg", "b");
        fx.extractor.faces("group", &[&[0.0, 0.1], &[5.0, 5.1], &[0.1, 0.0]]);
        fx.extractor.faces("a", &[&[0.0, 0.0]]);
        fx.extractor.faces("b", &[&[5.0, 5.0]]);

        let pipeline = fx.pipeline();
        let first = pipeline.reconcile(&request(roster_ab())).await.unwrap();
        let second = pipeline.reconcile(&request(roster_ab())).await.unwrap();
        assert_eq!(first.report, second.report);
        assert_eq!(first.report.present_count(), 2);
    }
}
