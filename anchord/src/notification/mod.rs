//! Completion notifications.
//!
//! The job manager hands finished jobs to a [`NotificationSender`]. Delivery
//! is best effort: failures are logged by the caller and never affect the job.

mod message;
mod webhook;

pub use message::{EventType, JOB_DOCUMENT_TYPE, NotificationMessage};
pub use webhook::{WebhookConfig, WebhookSender};

use async_trait::async_trait;

use crate::Result;

/// What happened to a message handed to a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The sender is not configured to deliver anything.
    Disabled,
}

/// Transport for completion messages.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<Delivery>;
}

/// Sender that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSender;

#[async_trait]
impl NotificationSender for NoopSender {
    async fn send(&self, _message: &NotificationMessage) -> Result<Delivery> {
        Ok(Delivery::Disabled)
    }
}
