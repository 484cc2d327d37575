//! Brokers carry task submissions from the server to the workers.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::Result;
use crate::task::TaskSignature;

/// Transport between task submission and worker execution.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Hand a submission to the broker.
    async fn send_task(&self, signature: TaskSignature) -> Result<()>;

    /// Take the next submission, if any is waiting.
    async fn next_task(&self) -> Result<Option<TaskSignature>>;

    /// Notified whenever a submission arrives.
    fn notifier(&self) -> Arc<Notify>;
}

/// Process-local FIFO broker.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queue: Mutex<VecDeque<TaskSignature>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submissions waiting for a worker.
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send_task(&self, signature: TaskSignature) -> Result<()> {
        self.queue.lock().push_back(signature);
        self.notify.notify_one();
        Ok(())
    }

    async fn next_task(&self) -> Result<Option<TaskSignature>> {
        Ok(self.queue.lock().pop_front())
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::params::TaskParams;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = InMemoryBroker::new();
        for name in ["a", "b", "c"] {
            broker
                .send_task(TaskSignature::new(name, TaskParams::new(), Duration::from_secs(1)))
                .await
                .unwrap();
        }
        assert_eq!(broker.depth(), 3);

        let mut order = Vec::new();
        while let Some(sig) = broker.next_task().await.unwrap() {
            order.push(sig.name);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(broker.depth(), 0);
    }

    #[tokio::test]
    async fn test_send_wakes_waiter() {
        let broker = Arc::new(InMemoryBroker::new());
        let notify = broker.notifier();
        let waiter = tokio::spawn(async move { notify.notified().await });

        broker
            .send_task(TaskSignature::new("ping", TaskParams::new(), Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }
}
