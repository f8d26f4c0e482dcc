//! examkit-queue: Server-side intake for sealed exam submissions.
//!
//! Submissions are validated, integrity-checked and queued; a fixed pool of
//! workers persists them with bounded retries. The pool size is the hard
//! ceiling on concurrent writes to the downstream store.

pub mod backoff;
pub mod error;
pub mod journal;
pub mod listener;
pub mod mock;
pub mod model;
pub mod queue;
pub mod store;

pub use error::{PersistError, QueueError};
pub use listener::{AttemptsInvalidator, QueueListener};
pub use model::{QueuedSubmission, SubmissionStatus};
pub use queue::{EnqueueOutcome, QueueConfig, SubmissionQueueService};
pub use store::{JsonlStore, MemoryStore, SubmissionStore};
