//! Node lifecycle: start long-running servers, stop them together.

use std::sync::Arc;

use async_trait::async_trait;
use task_queue::QueueServer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// A long-running service owned by the node.
#[async_trait]
pub trait Server: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `cancel` fires.
    ///
    /// Startup failures are reported on `startup_err` before returning.
    async fn start(&self, cancel: CancellationToken, startup_err: mpsc::Sender<Error>);
}

#[async_trait]
impl Server for QueueServer {
    fn name(&self) -> &str {
        QueueServer::NAME
    }

    async fn start(&self, cancel: CancellationToken, startup_err: mpsc::Sender<Error>) {
        let (queue_err_tx, mut queue_err_rx) = mpsc::channel(1);
        // Returns early only after reporting a startup error.
        QueueServer::start(self, cancel, queue_err_tx).await;
        if let Ok(e) = queue_err_rx.try_recv() {
            let _ = startup_err.send(Error::Queue(e)).await;
        }
    }
}

/// Set of servers started and stopped as one unit.
pub struct Node {
    servers: Vec<Arc<dyn Server>>,
}

impl Node {
    pub fn new(servers: Vec<Arc<dyn Server>>) -> Self {
        Self { servers }
    }

    /// Run every server until `cancel` fires.
    ///
    /// If any server fails to start, the others are cancelled and the first
    /// startup error is returned once all of them have stopped.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let servers_cancel = cancel.child_token();
        let (err_tx, mut err_rx) = mpsc::channel(self.servers.len().max(1));

        for server in &self.servers {
            let server = server.clone();
            let token = servers_cancel.clone();
            let err_tx = err_tx.clone();
            info!("Starting {}", server.name());
            tracker.spawn(async move {
                server.start(token, err_tx).await;
                debug!("{} stopped", server.name());
            });
        }
        drop(err_tx);
        tracker.close();

        let result = tokio::select! {
            biased;
            Some(e) = err_rx.recv() => {
                error!("Server failed to start: {}", e);
                Err(e)
            }
            _ = cancel.cancelled() => {
                info!("Shutdown requested, stopping servers");
                Ok(())
            }
            _ = tracker.wait() => Ok(()),
        };

        servers_cancel.cancel();
        tracker.wait().await;
        info!("All servers stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    struct Blocking {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Server for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn start(&self, cancel: CancellationToken, _startup_err: mpsc::Sender<Error>) {
            cancel.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Broken;

    #[async_trait]
    impl Server for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&self, _cancel: CancellationToken, startup_err: mpsc::Sender<Error>) {
            let _ = startup_err.send(Error::config("no port")).await;
        }
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let stopped = Arc::new(AtomicBool::new(false));
        let node = Node::new(vec![Arc::new(Blocking {
            stopped: stopped.clone(),
        })]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        node.run(cancel).await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_startup_error_stops_other_servers() {
        let stopped = Arc::new(AtomicBool::new(false));
        let node = Node::new(vec![
            Arc::new(Blocking {
                stopped: stopped.clone(),
            }),
            Arc::new(Broken),
        ]);

        let cancel = CancellationToken::new();
        let err = tokio::time::timeout(Duration::from_secs(2), node.run(cancel.clone()))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }
}
