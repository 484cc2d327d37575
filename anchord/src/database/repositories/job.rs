//! Job repository.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::database::retry::JOB_SAVE_RETRY;
use crate::jobs::{Did, Job, JobId};
use crate::{Error, Result};

/// Keyed persistence of job records.
///
/// `save` is a full-record upsert. Concurrent saves of the same job race
/// and the last one wins.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Load a job, failing with [`Error::NotFound`] when it does not exist.
    async fn get(&self, account_id: &Did, job_id: &JobId) -> Result<Job>;
    async fn save(&self, job: &Job) -> Result<()>;
    /// All jobs of an account, oldest first.
    async fn list(&self, account_id: &Did) -> Result<Vec<Job>>;
}

/// Row in the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobDbModel {
    pub account_id: String,
    pub job_id: String,
    pub description: String,
    /// pending, success or failed
    pub status: String,
    /// JSON-encoded [`Job`]
    pub data: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JobDbModel {
    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            account_id: job.did.to_string(),
            job_id: job.id.to_string(),
            description: job.description.clone(),
            status: job.status.to_string(),
            data: serde_json::to_string(job)?,
            created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }

    pub fn into_job(self) -> Result<Job> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn get(&self, account_id: &Did, job_id: &JobId) -> Result<Job> {
        let job_id = job_id.to_string();
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE account_id = ? AND job_id = ?")
            .bind(account_id.to_string())
            .bind(&job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", job_id.as_str()))?
            .into_job()
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let row = JobDbModel::from_job(job)?;
        JOB_SAVE_RETRY.run("save_job", || async {
            sqlx::query(
                r#"
                INSERT INTO jobs (account_id, job_id, description, status, data, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(account_id, job_id) DO UPDATE SET
                    description = excluded.description,
                    status = excluded.status,
                    data = excluded.data,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.account_id)
            .bind(&row.job_id)
            .bind(&row.description)
            .bind(&row.status)
            .bind(&row.data)
            .bind(&row.created_at)
            .bind(&row.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list(&self, account_id: &Did) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM jobs WHERE account_id = ? ORDER BY created_at, rowid",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobDbModel::into_job).collect()
    }
}
