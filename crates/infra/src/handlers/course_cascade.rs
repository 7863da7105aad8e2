use std::sync::Arc;

use tracing::debug;

use clubhub_core::CourseId;
use clubhub_events::{Fact, FactEnvelope, FactHandler, HandlerError, Queue};

use crate::store::{EnrollmentSummary, Repository};

/// Mirrors course deletions and renames into the enrollment summaries.
pub struct CourseCascadeHandler {
    enrollments: Arc<dyn Repository<EnrollmentSummary>>,
}

impl CourseCascadeHandler {
    pub fn new(enrollments: Arc<dyn Repository<EnrollmentSummary>>) -> Self {
        Self { enrollments }
    }

    fn rename(&self, course_id: CourseId, title: String) -> Result<(), HandlerError> {
        let found = self
            .enrollments
            .find_by_id(&course_id)
            .map_err(|e| HandlerError::transient(e.to_string()))?;
        match found {
            Some(mut summary) if summary.course_title != title => {
                summary.course_title = title;
                self.enrollments
                    .save(summary)
                    .map_err(|e| HandlerError::transient(e.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl FactHandler for CourseCascadeHandler {
    fn queue(&self) -> Queue {
        Queue::CourseCascade
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        match envelope.decode()? {
            Fact::CourseDeleted(f) => {
                let course_id = CourseId::from_uuid(f.resource_id);
                let removed = self
                    .enrollments
                    .delete(&course_id)
                    .map_err(|e| HandlerError::transient(e.to_string()))?;
                debug!(%course_id, removed, "course enrollments dropped");
                Ok(())
            }
            Fact::CourseUpdated(f) => self.rename(CourseId::from_uuid(f.resource_id), f.name),
            other => Err(HandlerError::malformed(format!(
                "unexpected {} on {}",
                other.routing_key(),
                self.queue()
            ))),
        }
    }
}
