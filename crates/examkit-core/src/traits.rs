//! Collaborator traits the pipeline consumes.
//!
//! Exam authoring, the attempts database and the server's copy of marking
//! schemes live outside examkit; these traits are the seams they plug into.

use async_trait::async_trait;

use crate::model::{AttemptSummary, MarkingScheme};

/// Upstream source for "has this student attempted this exam" queries.
#[async_trait]
pub trait AttemptsSource: Send + Sync {
    async fn fetch(&self, student_id: &str, exam_id: &str) -> anyhow::Result<AttemptSummary>;
}

/// Server-held marking schemes, used to re-evaluate untrusted submissions.
pub trait SchemeSource: Send + Sync {
    fn scheme(&self, exam_id: &str) -> Option<MarkingScheme>;
}

/// A fixed set of schemes keyed by exam id.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemes {
    schemes: std::collections::HashMap<String, MarkingScheme>,
}

impl StaticSchemes {
    pub fn new(schemes: impl IntoIterator<Item = MarkingScheme>) -> Self {
        Self {
            schemes: schemes
                .into_iter()
                .map(|s| (s.exam_id.clone(), s))
                .collect(),
        }
    }
}

impl SchemeSource for StaticSchemes {
    fn scheme(&self, exam_id: &str) -> Option<MarkingScheme> {
        self.schemes.get(exam_id).cloned()
    }
}
