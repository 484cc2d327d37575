//! Job manager: runs work on behalf of an account and keeps its job record
//! consistent.
//!
//! [`Manager::execute_within_job`] creates (or resumes) a job, spawns the work
//! function on its own task and spawns a second task that races the work
//! against the caller's cancellation token. Whichever finishes first decides
//! how the job is finalized:
//!
//! - work finished: the job is reloaded (the work may have updated it), marked
//!   `Success` when the job was created by this call and the work succeeded,
//!   or `Failed` with a tagged log entry when the work reported an error.
//! - cancelled: a log entry is appended and the job stays `Pending` so it can
//!   be resumed. The work task is not aborted; it keeps running detached and
//!   its own task status updates are the only trace of its outcome.
//!
//! The finalize outcome is sent once on the returned done channel. Jobs
//! created by the call also get a best-effort completion notification.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::model::{Did, Job, JobId, Status, StatusResponse};
use crate::config::JobsConfig;
use crate::database::repositories::JobRepository;
use crate::notification::{Delivery, NotificationMessage, NotificationSender};
use crate::{Error, Result};

/// Log prefix tagging entries written by the manager itself.
pub const MANAGER_LOG_PREFIX: &str = "manager";

/// Task name of the log entry recorded when a job's context is cancelled.
pub const CANCELLED_LOG_TASK: &str = "context cancelled";

/// Error type work functions report.
pub type WorkError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a work function.
pub type WorkResult = std::result::Result<(), WorkError>;

/// Receives the single finalize outcome of an `execute_within_job` call.
pub type JobDone = mpsc::Receiver<Result<()>>;

/// Type-erased work function, as taken by [`JobManager::execute_within_job`].
pub type BoxedWork = Box<dyn FnOnce(WorkContext) -> BoxFuture<'static, WorkResult> + Send>;

/// What a work function gets to run with.
#[derive(Clone)]
pub struct WorkContext {
    pub account_id: Did,
    pub job_id: JobId,
    /// The manager owning the job, for task status and value updates and
    /// for starting nested jobs.
    pub manager: Arc<dyn JobManager>,
}

impl std::fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkContext")
            .field("account_id", &self.account_id)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// Job operations available to work functions and other callers.
#[async_trait]
pub trait JobManager: Send + Sync {
    /// Run `work` inside a new or resumed job.
    ///
    /// See [`Manager::execute_within_job`]; this form takes the work boxed so
    /// it can be called through `dyn JobManager`, e.g. to start a nested job
    /// from inside a work function.
    async fn execute_within_job(
        &self,
        cancel: CancellationToken,
        account_id: Did,
        existing_job_id: Option<JobId>,
        description: &str,
        work: BoxedWork,
    ) -> Result<(JobId, JobDone)>;

    /// Validity window for tasks started on behalf of a job.
    fn default_task_timeout(&self) -> Duration;

    /// Store `value` under `key` on the job.
    async fn update_job_with_value(
        &self,
        account_id: &Did,
        job_id: &JobId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Record the status of one named task and append a log entry for it.
    async fn update_task_status(
        &self,
        account_id: &Did,
        job_id: &JobId,
        status: Status,
        task_name: &str,
        message: &str,
    ) -> Result<()>;

    async fn get_job(&self, account_id: &Did, job_id: &JobId) -> Result<Job>;

    async fn get_job_status(&self, account_id: &Did, job_id: &JobId) -> Result<StatusResponse>;

    /// Poll until the job leaves `Pending`.
    ///
    /// Returns `Ok(())` on `Success` and [`Error::JobFailed`] carrying the
    /// last log message on `Failed`.
    async fn wait_for_job(&self, account_id: &Did, job_id: &JobId) -> Result<()>;
}

struct Inner {
    config: JobsConfig,
    repo: Arc<dyn JobRepository>,
    notifier: Arc<dyn NotificationSender>,
    notify_permits: Arc<Semaphore>,
}

/// Job manager backed by a [`JobRepository`].
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn new(
        config: JobsConfig,
        repo: Arc<dyn JobRepository>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        let notify_permits = Arc::new(Semaphore::new(config.max_inflight_notifications.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                repo,
                notifier,
                notify_permits,
            }),
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Run `work` inside a job.
    ///
    /// When `existing_job_id` names a stored job it is reused as is;
    /// otherwise a new `Pending` job is created and persisted before this
    /// returns. Work errors never surface here, only on the done channel.
    pub async fn execute_within_job<F, Fut>(
        &self,
        cancel: CancellationToken,
        account_id: Did,
        existing_job_id: Option<JobId>,
        description: &str,
        work: F,
    ) -> Result<(JobId, JobDone)>
    where
        F: FnOnce(WorkContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        let work: BoxedWork = Box::new(move |ctx| work(ctx).boxed());
        self.spawn_job(cancel, account_id, existing_job_id, description, work)
            .await
    }

    /// All jobs of an account, oldest first.
    pub async fn list_jobs(&self, account_id: &Did) -> Result<Vec<Job>> {
        self.inner.repo.list(account_id).await
    }

    async fn spawn_job(
        &self,
        cancel: CancellationToken,
        account_id: Did,
        existing_job_id: Option<JobId>,
        description: &str,
        work: BoxedWork,
    ) -> Result<(JobId, JobDone)> {
        let (job, created) = self
            .load_or_create(&account_id, existing_job_id, description)
            .await?;
        let job_id = job.id;

        let span = info_span!(
            "job",
            job_id = %job_id,
            account_id = %account_id,
            description = %job.description
        );

        let ctx = WorkContext {
            account_id,
            job_id,
            manager: Arc::new(self.clone()),
        };
        let work = tokio::spawn(work(ctx).instrument(span.clone()));

        // Capacity 1 so the finalize task never blocks on a slow listener.
        let (done_tx, done_rx) = mpsc::channel(1);
        let finalize = Finalize {
            account_id,
            job_id,
            description: job.description,
            created,
        };
        tokio::spawn(
            self.clone()
                .finalize(finalize, cancel, work, done_tx)
                .instrument(span),
        );

        Ok((job_id, done_rx))
    }

    async fn load_or_create(
        &self,
        account_id: &Did,
        existing_job_id: Option<JobId>,
        description: &str,
    ) -> Result<(Job, bool)> {
        if let Some(job_id) = existing_job_id {
            match self.inner.repo.get(account_id, &job_id).await {
                Ok(job) => {
                    debug!(job_id = %job_id, account_id = %account_id, "Resuming existing job");
                    return Ok((job, false));
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        job_id = %job_id,
                        account_id = %account_id,
                        "Job not found, creating a new one"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let job = Job::new(*account_id, description);
        self.inner.repo.save(&job).await?;
        info!(job_id = %job.id, account_id = %account_id, "Created job: {}", description);
        Ok((job, true))
    }

    async fn finalize(
        self,
        job: Finalize,
        cancel: CancellationToken,
        work: JoinHandle<WorkResult>,
        done_tx: mpsc::Sender<Result<()>>,
    ) {
        let (snapshot, done) = tokio::select! {
            biased;
            joined = work => {
                let outcome = joined.unwrap_or_else(|e| Err(format!("work panicked: {}", e).into()));
                self.complete(&job, outcome).await
            }
            _ = cancel.cancelled() => self.record_cancellation(&job).await,
        };

        if done_tx.try_send(done).is_err() {
            error!("job done channel capacity breach");
        }

        if job.created {
            if let Some(snapshot) = snapshot {
                self.dispatch_notification(&job.account_id, &snapshot);
            }
        }
    }

    /// Finalize after the work reported back.
    async fn complete(&self, job: &Finalize, outcome: WorkResult) -> (Option<Job>, Result<()>) {
        let action = format!("{}[{}]", MANAGER_LOG_PREFIX, job.description);
        let failure = outcome.err().map(|e| Error::WorkFailure {
            action: action.clone(),
            message: e.to_string(),
        });

        let mut snapshot = match self.inner.repo.get(&job.account_id, &job.job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to reload job for finalize: {}", e);
                let err = match failure {
                    Some(failure) => failure.append(e),
                    None => e,
                };
                return (None, Err(err));
            }
        };

        if let Some(failure) = &failure {
            warn!("Job work failed: {}", failure);
            snapshot.add_log(action, failure.to_string());
            snapshot.try_transition(Status::Failed);
        } else if job.created {
            snapshot.try_transition(Status::Success);
        } else {
            // Resumed jobs keep their status; task updates own it.
            debug!("Resumed job work finished");
        }

        let mut done = failure.map_or(Ok(()), Err);
        if let Err(e) = self.inner.repo.save(&snapshot).await {
            error!("Failed to persist finalized job: {}", e);
            done = Err(match done {
                Err(failure) => failure.append(e),
                Ok(()) => e,
            });
        }

        (Some(snapshot), done)
    }

    /// Finalize after the caller cancelled; the job stays pending.
    async fn record_cancellation(&self, job: &Finalize) -> (Option<Job>, Result<()>) {
        let message = format!(
            "Job {} for account {} with description \"{}\" is stopped because its context was cancelled",
            job.job_id, job.account_id, job.description
        );
        warn!("{}", message);

        let mut snapshot = match self.inner.repo.get(&job.account_id, &job.job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to reload cancelled job: {}", e);
                return (None, Err(e));
            }
        };

        snapshot.add_log(CANCELLED_LOG_TASK, message);
        let done = self.inner.repo.save(&snapshot).await;
        if let Err(e) = &done {
            error!("Failed to persist cancelled job: {}", e);
        }
        (Some(snapshot), done)
    }

    /// Send a completion message on a detached task.
    ///
    /// Bounded by the in-flight semaphore and the notification timeout;
    /// outcomes are only logged.
    fn dispatch_notification(&self, account_id: &Did, job: &Job) {
        let message = NotificationMessage::job_completed(account_id, job);
        let notifier = self.inner.notifier.clone();
        let permits = self.inner.notify_permits.clone();
        let timeout = self.inner.config.notification_timeout;

        tokio::spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match tokio::time::timeout(timeout, notifier.send(&message)).await {
                    Ok(Ok(Delivery::Sent)) => debug!("Job notification sent"),
                    Ok(Ok(Delivery::Disabled)) => debug!("Job notification disabled"),
                    Ok(Err(e)) => warn!("Failed to send job notification: {}", e),
                    Err(_) => warn!("Job notification timed out after {:?}", timeout),
                }
            }
            .in_current_span(),
        );
    }
}

/// Identity of the job a finalize task is responsible for.
struct Finalize {
    account_id: Did,
    job_id: JobId,
    description: String,
    created: bool,
}

#[async_trait]
impl JobManager for Manager {
    async fn execute_within_job(
        &self,
        cancel: CancellationToken,
        account_id: Did,
        existing_job_id: Option<JobId>,
        description: &str,
        work: BoxedWork,
    ) -> Result<(JobId, JobDone)> {
        self.spawn_job(cancel, account_id, existing_job_id, description, work)
            .await
    }

    fn default_task_timeout(&self) -> Duration {
        self.inner.config.task_valid_duration
    }

    async fn update_job_with_value(
        &self,
        account_id: &Did,
        job_id: &JobId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        let mut job = self.get_job(account_id, job_id).await?;
        job.set_value(key, value);
        self.inner.repo.save(&job).await
    }

    async fn update_task_status(
        &self,
        account_id: &Did,
        job_id: &JobId,
        status: Status,
        task_name: &str,
        message: &str,
    ) -> Result<()> {
        let mut job = self.get_job(account_id, job_id).await?;
        job.task_status.insert(task_name.to_string(), status);
        job.add_log(task_name, message);
        self.inner.repo.save(&job).await
    }

    async fn get_job(&self, account_id: &Did, job_id: &JobId) -> Result<Job> {
        self.inner.repo.get(account_id, job_id).await
    }

    async fn get_job_status(&self, account_id: &Did, job_id: &JobId) -> Result<StatusResponse> {
        Ok(self.get_job(account_id, job_id).await?.status_response())
    }

    async fn wait_for_job(&self, account_id: &Did, job_id: &JobId) -> Result<()> {
        loop {
            let resp = self.get_job_status(account_id, job_id).await?;
            match resp.status {
                Status::Success => return Ok(()),
                Status::Failed => {
                    return Err(Error::JobFailed {
                        job_id: job_id.to_string(),
                        message: resp.message,
                    });
                }
                Status::Pending => tokio::time::sleep(self.inner.config.wait_poll_interval).await,
            }
        }
    }
}
