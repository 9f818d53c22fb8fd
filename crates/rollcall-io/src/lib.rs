//! rollcall-io: Image acquisition, transient storage and result delivery.
//!
//! Streams remote photos into request-scoped scratch directories and posts
//! finished presence reports to a webhook.

pub mod fetch;
pub mod notify;
pub mod scratch;

pub use fetch::{AcquireError, HttpFetcher, TransientImage};
pub use notify::{NotifyError, RetryPolicy, WebhookNotifier};
pub use scratch::{RequestScratch, ScratchError, ScratchSpace};
