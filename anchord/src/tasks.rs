//! Built-in queue task types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use task_queue::{TaskError, TaskParams, TaskType};

use crate::jobs::{Did, JobId, JobManager};

/// Reports the status of a job: `account_id` and `job_id` parameters,
/// returns the status snapshot as JSON.
pub struct JobStatusTask {
    manager: Arc<dyn JobManager>,
}

impl JobStatusTask {
    pub const NAME: &'static str = "job_status";

    pub fn new(manager: Arc<dyn JobManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TaskType for JobStatusTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, params: TaskParams) -> Result<Value, TaskError> {
        let account_id: Did = params.str("account_id")?.parse()?;
        let job_id: JobId = params.str("job_id")?.parse()?;
        let status = self.manager.get_job_status(&account_id, &job_id).await?;
        Ok(serde_json::to_value(status)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use crate::database::repositories::{InMemoryJobRepository, JobRepository};
    use crate::jobs::{Job, Manager};
    use crate::notification::NoopSender;

    #[tokio::test]
    async fn test_reports_job_status() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let did = Did::new([9; 20]);
        let mut job = Job::new(did, "anchor document");
        job.add_log("sign", "signed");
        repo.save(&job).await.unwrap();

        let manager = Manager::new(JobsConfig::default(), repo, Arc::new(NoopSender));
        let task = JobStatusTask::new(Arc::new(manager));

        let value = task
            .run(
                TaskParams::new()
                    .with("account_id", did.to_string())
                    .with("job_id", job.id.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["message"], "signed");
        assert_eq!(value["job_id"], job.id.to_string());
    }

    #[tokio::test]
    async fn test_rejects_bad_parameters() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let manager = Manager::new(JobsConfig::default(), repo, Arc::new(NoopSender));
        let task = JobStatusTask::new(Arc::new(manager));

        assert!(task.run(TaskParams::new()).await.is_err());
        assert!(task
            .run(
                TaskParams::new()
                    .with("account_id", "0x01")
                    .with("job_id", JobId::new().to_string()),
            )
            .await
            .is_err());
    }
}
