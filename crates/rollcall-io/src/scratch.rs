//! Request-scoped transient storage for downloaded images.
//!
//! Every reconciliation gets its own directory under the scratch root, so
//! two requests (even for the same attendance id) never share a file name.
//! Paths are registered before anything is written to them and released
//! exactly once, either by [`RequestScratch::cleanup`] or on drop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use thiserror::Error;

const MAX_KEY_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("failed to create scratch directory under {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Root directory under which per-request scratch directories are created.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh, uniquely named directory for one request.
    ///
    /// The filesystem work runs on the blocking pool.
    pub async fn open(&self, request_key: &str) -> Result<RequestScratch, ScratchError> {
        let root = self.root.clone();
        let prefix = format!("attendance-{}-", sanitize(request_key));
        let dir = tokio::task::spawn_blocking(move || create_request_dir(&root, &prefix))
            .await
            .map_err(|e| ScratchError::Create {
                path: self.root.clone(),
                source: io::Error::other(e.to_string()),
            })??;

        tracing::debug!(dir = %dir.path().display(), "scratch directory created");
        Ok(RequestScratch {
            dir_path: dir.path().to_path_buf(),
            dir: Some(dir),
            registered: Mutex::new(Vec::new()),
        })
    }
}

fn create_request_dir(root: &Path, prefix: &str) -> Result<TempDir, ScratchError> {
    let create_err = |source| ScratchError::Create {
        path: root.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(root).map_err(create_err)?;
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(root)
        .map_err(create_err)
}

/// Transient namespace owned by a single request.
#[derive(Debug)]
pub struct RequestScratch {
    dir_path: PathBuf,
    /// Taken exactly once, by the first release.
    dir: Option<TempDir>,
    registered: Mutex<Vec<PathBuf>>,
}

impl RequestScratch {
    /// Reserve a file path for `key`, registering it for cleanup.
    pub fn reserve(&self, key: &str) -> PathBuf {
        let path = self.dir_path.join(format!("{}.img", sanitize(key)));
        self.registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.clone());
        path
    }

    pub fn path(&self) -> &Path {
        &self.dir_path
    }

    /// Release every registered file and the directory itself on the
    /// blocking pool.
    ///
    /// Failures are logged, never returned: a leftover file must not fail
    /// the request. A scratch dropped without `cleanup` (cancelled or
    /// panicking request) is released synchronously in `Drop`.
    pub async fn cleanup(self) {
        let released = tokio::task::spawn_blocking(move || {
            let mut scratch = self;
            scratch.release();
        })
        .await;
        if let Err(e) = released {
            tracing::warn!(error = %e, "scratch release task failed");
        }
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        let paths = std::mem::take(
            &mut *self
                .registered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut removed = 0usize;
        for path in &paths {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete transient image");
                }
            }
        }

        if let Err(e) = dir.close() {
            tracing::warn!(dir = %self.dir_path.display(), error = %e, "failed to delete scratch directory");
        }
        tracing::debug!(registered = paths.len(), removed, "scratch released");
    }
}

impl Drop for RequestScratch {
    fn drop(&mut self) {
        if self.dir.is_some() {
            tracing::debug!("scratch released on drop");
        }
        self.release();
    }
}

/// File-name-safe form of an opaque identifier.
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_KEY_LEN)
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
