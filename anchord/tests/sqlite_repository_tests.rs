//! SQLite job repository tests.

use std::sync::Arc;

use anchord::config::JobsConfig;
use anchord::database::repositories::{JobRepository, SqlxJobRepository};
use anchord::database::{self, DbPool};
use anchord::jobs::{Did, Job, JobId, JobManager, Manager, Status};
use anchord::notification::NoopSender;
use tokio_util::sync::CancellationToken;

async fn memory_pool() -> DbPool {
    let pool = database::init_pool("sqlite::memory:").await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    pool
}

fn did(byte: u8) -> Did {
    Did::new([byte; 20])
}

#[tokio::test]
async fn test_save_and_get() {
    let repo = SqlxJobRepository::new(memory_pool().await);
    let mut job = Job::new(did(1), "anchor document");
    job.add_log("sign", "signed");
    job.set_value("root", vec![0xde, 0xad]);
    job.task_status.insert("sign".to_string(), Status::Success);

    repo.save(&job).await.unwrap();
    let loaded = repo.get(&did(1), &job.id).await.unwrap();
    assert_eq!(loaded, job);
}

#[tokio::test]
async fn test_save_is_an_upsert() {
    let repo = SqlxJobRepository::new(memory_pool().await);
    let mut job = Job::new(did(1), "mint");
    repo.save(&job).await.unwrap();

    job.add_log("mint", "minted");
    job.transition(Status::Success).unwrap();
    repo.save(&job).await.unwrap();

    let loaded = repo.get(&did(1), &job.id).await.unwrap();
    assert_eq!(loaded.status, Status::Success);
    assert_eq!(loaded.logs.len(), 1);
    assert_eq!(repo.list(&did(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_job_is_not_found() {
    let repo = SqlxJobRepository::new(memory_pool().await);
    let err = repo.get(&did(1), &JobId::new()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_jobs_are_scoped_per_account() {
    let repo = SqlxJobRepository::new(memory_pool().await);
    let job = Job::new(did(1), "mint");
    repo.save(&job).await.unwrap();

    assert!(repo.get(&did(2), &job.id).await.unwrap_err().is_not_found());
    assert!(repo.list(&did(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_oldest_first() {
    let repo = SqlxJobRepository::new(memory_pool().await);
    let mut ids = Vec::new();
    for i in 0..3 {
        let job = Job::new(did(1), format!("job {i}"));
        repo.save(&job).await.unwrap();
        ids.push(job.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let listed: Vec<JobId> = repo
        .list(&did(1))
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display());

    let job = Job::new(did(3), "anchor document");
    {
        let pool = database::init_pool(&url).await.unwrap();
        database::run_migrations(&pool).await.unwrap();
        SqlxJobRepository::new(pool.clone()).save(&job).await.unwrap();
        pool.close().await;
    }

    let pool = database::init_pool(&url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let loaded = SqlxJobRepository::new(pool.clone())
        .get(&did(3), &job.id)
        .await
        .unwrap();
    assert_eq!(loaded.id, job.id);
    pool.close().await;
}

#[tokio::test]
async fn test_concurrent_saves_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display());
    let pool = database::init_pool(&url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let repo = Arc::new(SqlxJobRepository::new(pool.clone()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let job = Job::new(did(4), format!("job {i}"));
            repo.save(&job).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(repo.list(&did(4)).await.unwrap().len(), 20);
    pool.close().await;
}

#[tokio::test]
async fn test_manager_over_sqlite() {
    let repo = Arc::new(SqlxJobRepository::new(memory_pool().await));
    let manager = Manager::new(JobsConfig::default(), repo, Arc::new(NoopSender));

    let (job_id, mut done) = manager
        .execute_within_job(
            CancellationToken::new(),
            did(5),
            None,
            "anchor document",
            |ctx| async move {
                ctx.manager
                    .update_task_status(&ctx.account_id, &ctx.job_id, Status::Success, "anchor", "anchored")
                    .await?;
                Ok(())
            },
        )
        .await
        .unwrap();

    done.recv().await.unwrap().unwrap();
    manager.wait_for_job(&did(5), &job_id).await.unwrap();

    let status = manager.get_job_status(&did(5), &job_id).await.unwrap();
    assert_eq!(status.status, Status::Success);
    assert_eq!(status.message, "anchored");
}
