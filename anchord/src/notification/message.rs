//! Completion message schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{Did, Job};

/// Document type tag attached to job notifications.
pub const JOB_DOCUMENT_TYPE: &str = "job";

/// Kind of event a notification reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobCompleted,
}

/// Message handed to a notification sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub event_type: EventType,
    pub account_id: String,
    pub recorded: DateTime<Utc>,
    pub document_type: String,
    pub document_id: String,
    pub status: String,
    /// Last log message of the job, empty when it has none.
    #[serde(default)]
    pub message: String,
}

impl NotificationMessage {
    /// Completion message for a finalized job snapshot.
    pub fn job_completed(account_id: &Did, job: &Job) -> Self {
        Self {
            event_type: EventType::JobCompleted,
            account_id: account_id.to_string(),
            recorded: Utc::now(),
            document_type: JOB_DOCUMENT_TYPE.to_string(),
            document_id: job.id.to_string(),
            status: job.status.to_string(),
            message: job
                .last_log()
                .map(|log| log.message.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Status;

    #[test]
    fn test_job_completed_message() {
        let did = Did::new([1; 20]);
        let mut job = Job::new(did, "anchor document");
        job.add_log("submit", "tx mined");
        job.transition(Status::Success).unwrap();

        let msg = NotificationMessage::job_completed(&did, &job);
        assert_eq!(msg.event_type, EventType::JobCompleted);
        assert_eq!(msg.account_id, did.to_string());
        assert_eq!(msg.document_type, "job");
        assert_eq!(msg.document_id, job.id.to_string());
        assert_eq!(msg.status, "success");
        assert_eq!(msg.message, "tx mined");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event_type"], "job_completed");
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn test_message_empty_without_logs() {
        let did = Did::new([1; 20]);
        let job = Job::new(did, "anchor document");
        let msg = NotificationMessage::job_completed(&did, &job);
        assert!(msg.message.is_empty());
        assert_eq!(msg.status, "pending");
    }
}
