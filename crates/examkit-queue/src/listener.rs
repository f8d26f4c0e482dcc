//! Hooks into queue lifecycle transitions.

use std::sync::Arc;
use std::time::Duration;

use examkit_core::attempts::AttemptsCacheManager;

use crate::model::QueuedSubmission;

/// Observer of queue transitions. Called outside the queue lock.
pub trait QueueListener: Send + Sync {
    fn on_enqueued(&self, _record: &QueuedSubmission) {}
    fn on_completed(&self, _record: &QueuedSubmission) {}
    fn on_retry_scheduled(&self, _record: &QueuedSubmission, _delay: Duration) {}
    fn on_failed(&self, _record: &QueuedSubmission) {}
}

/// Drops the attempts-cache entry once a submission is recorded, so the
/// next "already attempted?" read sees it.
pub struct AttemptsInvalidator {
    cache: Arc<AttemptsCacheManager>,
}

impl AttemptsInvalidator {
    pub fn new(cache: Arc<AttemptsCacheManager>) -> Self {
        Self { cache }
    }
}

impl QueueListener for AttemptsInvalidator {
    fn on_completed(&self, record: &QueuedSubmission) {
        self.cache
            .invalidate(&record.payload.student_id, &record.payload.exam_id);
    }
}
