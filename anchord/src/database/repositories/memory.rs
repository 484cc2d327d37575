//! In-process job repository.

use async_trait::async_trait;
use dashmap::DashMap;

use super::JobRepository;
use crate::jobs::{Did, Job, JobId};
use crate::{Error, Result};

/// Job repository backed by a concurrent map; nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<(Did, JobId), Job>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get(&self, account_id: &Did, job_id: &JobId) -> Result<Job> {
        self.jobs
            .get(&(*account_id, *job_id))
            .map(|job| job.value().clone())
            .ok_or_else(|| Error::not_found("Job", job_id.to_string()))
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.insert((job.did, job.id), job.clone());
        Ok(())
    }

    async fn list(&self, account_id: &Did) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.key().0 == *account_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
