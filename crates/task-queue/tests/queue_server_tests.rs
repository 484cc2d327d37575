//! Integration tests for the queue server lifecycle and task submission.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use task_queue::{
    QueueConfig, QueueError, QueueServer, TaskError, TaskParams, TaskQueuer, TaskType,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Ping {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskType for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    async fn run(&self, params: TaskParams) -> Result<Value, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n: i64 = params.get("n")?;
        Ok(json!({ "pong": n }))
    }
}

struct Sleepy;

#[async_trait]
impl TaskType for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn run(&self, params: TaskParams) -> Result<Value, TaskError> {
        let wait = params.duration("wait")?;
        tokio::time::sleep(wait).await;
        Ok(Value::Null)
    }
}

struct Failing;

#[async_trait]
impl TaskType for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _params: TaskParams) -> Result<Value, TaskError> {
        Err("rpc timeout".into())
    }
}

struct Running {
    server: Arc<QueueServer>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    startup_err: mpsc::Receiver<QueueError>,
}

impl Running {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.await.expect("queue server task panicked");
    }
}

async fn start_server(config: QueueConfig) -> Running {
    let server = Arc::new(QueueServer::new(config));
    server
        .register_task_type(
            "ping",
            Arc::new(Ping {
                calls: AtomicUsize::new(0),
            }),
        )
        .await
        .unwrap();
    server.register_task_type("sleepy", Arc::new(Sleepy)).await.unwrap();
    server.register_task_type("failing", Arc::new(Failing)).await.unwrap();

    let cancel = CancellationToken::new();
    let (err_tx, startup_err) = mpsc::channel(1);
    let handle = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { server.start(cancel, err_tx).await }
    });

    tokio::time::timeout(Duration::from_secs(2), async {
        while !server.is_running().await {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("queue server did not start");

    Running {
        server,
        cancel,
        handle,
        startup_err,
    }
}

#[tokio::test]
async fn test_enqueue_before_start_returns_not_initialised() {
    let server = QueueServer::new(QueueConfig::default());
    let err = server
        .enqueue_job("ping", TaskParams::new().with("n", 1))
        .await
        .unwrap_err();

    assert_eq!(err, QueueError::NotInitialised);
    assert_eq!(err.to_string(), "queue hasn't been initialised");
}

#[tokio::test]
async fn test_ping_returns_computed_result() {
    let config = QueueConfig::default();
    let valid_for = config.task_valid_duration;
    let mut running = start_server(config).await;

    let result = running
        .server
        .enqueue_job("ping", TaskParams::new().with("n", 1))
        .await
        .unwrap();
    let value = result.get(valid_for).await.unwrap();
    assert_eq!(value, json!({ "pong": 1 }));

    assert!(running.startup_err.try_recv().is_err());
    running.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_through_trait_object() {
    let running = start_server(QueueConfig::default()).await;
    let queuer: Arc<dyn TaskQueuer> = running.server.clone();

    let result = queuer
        .enqueue_job("ping", TaskParams::new().with("n", 7))
        .await
        .unwrap();
    assert_eq!(
        result.get(Duration::from_secs(2)).await.unwrap(),
        json!({ "pong": 7 })
    );

    running.shutdown().await;
}

#[tokio::test]
async fn test_unknown_task_name_fails_fast() {
    let running = start_server(QueueConfig::default()).await;

    let err = running
        .server
        .enqueue_job("nope", TaskParams::new())
        .await
        .unwrap_err();
    assert_eq!(err, QueueError::UnknownTask("nope".to_string()));

    running.shutdown().await;
}

#[tokio::test]
async fn test_task_error_surfaces_through_result() {
    let running = start_server(QueueConfig::default()).await;

    let result = running
        .server
        .enqueue_job("failing", TaskParams::new())
        .await
        .unwrap();
    let err = result.get(Duration::from_secs(2)).await.unwrap_err();
    match err {
        QueueError::TaskFailed { task, message } => {
            assert_eq!(task, "failing");
            assert!(message.contains("rpc timeout"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_task_outliving_validity_expires() {
    let config = QueueConfig {
        task_valid_duration: Duration::from_millis(50),
        ..Default::default()
    };
    let running = start_server(config).await;

    let result = running
        .server
        .enqueue_job(
            "sleepy",
            TaskParams::new().with("wait", 5_000_000_000u64),
        )
        .await
        .unwrap();
    let err = result.get(Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(err, QueueError::Expired { .. }));

    running.shutdown().await;
}

#[tokio::test]
async fn test_get_times_out_before_task_finishes() {
    let running = start_server(QueueConfig::default()).await;

    let result = running
        .server
        .enqueue_job("sleepy", TaskParams::new().with("wait", 500_000_000u64))
        .await
        .unwrap();
    let err = result.get(Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, QueueError::Timeout { .. }));

    running.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_enqueues() {
    let running = start_server(QueueConfig::default()).await;

    let mut handles = Vec::new();
    for n in 0..50i64 {
        let server = running.server.clone();
        handles.push(tokio::spawn(async move {
            let result = server
                .enqueue_job("ping", TaskParams::new().with("n", n))
                .await?;
            result.get(Duration::from_secs(5)).await
        }));
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap().unwrap();
        assert_eq!(value, json!({ "pong": n }));
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_after_stop_returns_not_initialised() {
    let running = start_server(QueueConfig::default()).await;
    let server = running.server.clone();
    running.shutdown().await;

    assert!(!server.is_running().await);
    let err = server
        .enqueue_job("ping", TaskParams::new().with("n", 1))
        .await
        .unwrap_err();
    assert_eq!(err, QueueError::NotInitialised);
}

#[tokio::test]
async fn test_register_after_start_is_rejected() {
    let running = start_server(QueueConfig::default()).await;

    let err = running
        .server
        .register_task_type("late", Arc::new(Sleepy))
        .await
        .unwrap_err();
    assert_eq!(err, QueueError::AlreadyStarted);

    running.shutdown().await;
}

#[tokio::test]
async fn test_second_start_reports_already_started() {
    let running = start_server(QueueConfig::default()).await;

    let (err_tx, mut err_rx) = mpsc::channel(1);
    running
        .server
        .start(CancellationToken::new(), err_tx)
        .await;
    assert_eq!(err_rx.recv().await, Some(QueueError::AlreadyStarted));

    running.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_reported_on_startup_channel() {
    let server = QueueServer::new(QueueConfig {
        num_workers: 0,
        ..Default::default()
    });

    let (err_tx, mut err_rx) = mpsc::channel(1);
    // Returns without waiting for cancellation.
    tokio::time::timeout(
        Duration::from_secs(1),
        server.start(CancellationToken::new(), err_tx),
    )
    .await
    .expect("start should return on a startup error");

    assert!(matches!(err_rx.recv().await, Some(QueueError::Validation(_))));
    assert!(!server.is_running().await);
}

#[tokio::test]
async fn test_stop_closes_tasks_that_never_ran() {
    let running = start_server(QueueConfig {
        num_workers: 1,
        worker_wait_time_ms: 5,
        ..Default::default()
    })
    .await;

    let busy = running
        .server
        .enqueue_job("sleepy", TaskParams::new().with("wait", 200_000_000u64))
        .await
        .unwrap();
    // Let the only worker pick up the sleeper before queueing behind it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued = running
        .server
        .enqueue_job("ping", TaskParams::new().with("n", 1))
        .await
        .unwrap();

    let server = running.server.clone();
    running.shutdown().await;
    assert!(!server.is_running().await);

    // The running task finishes before the workers exit.
    assert_eq!(busy.get(Duration::from_secs(1)).await, Ok(Value::Null));

    let started = std::time::Instant::now();
    assert_eq!(
        queued.get(Duration::from_secs(2)).await,
        Err(QueueError::Closed)
    );
    assert!(started.elapsed() < Duration::from_secs(1));
}
