//! Channel subscribers.
//!
//! Each subscriber owns a broadcast receiver for one topic and hands every
//! payload to a [`MessageHandler`]. Handler failures are logged and the loop
//! keeps going; a lagging receiver skips what it missed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::db::DbHandle;
use super::models::{NotificationMessage, PullRequestDeleteMessage};

/// Processes raw payloads from one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &str) -> anyhow::Result<()>;
}

/// Spawn a task feeding `rx` into `handler` until `cancel` fires or the
/// channel closes.
pub fn spawn_subscriber(
    topic: &'static str,
    rx: broadcast::Receiver<String>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_subscriber(topic, rx, handler, cancel))
}

pub async fn run_subscriber(
    topic: &'static str,
    mut rx: broadcast::Receiver<String>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    tracing::info!(topic, handler = handler.name(), "Subscriber started");
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(payload) => {
                if let Err(e) = handler.handle(&payload).await {
                    tracing::error!(topic, handler = handler.name(), "Message handling failed: {:#}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(topic, skipped, "Subscriber lagged; messages dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!(topic, handler = handler.name(), "Subscriber stopped");
}

/// Stops tracking pull requests announced on `pull-request:delete`.
pub struct PullRequestDeleteHandler {
    db: DbHandle,
}

impl PullRequestDeleteHandler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageHandler for PullRequestDeleteHandler {
    fn name(&self) -> &'static str {
        "pull-request-delete"
    }

    async fn handle(&self, payload: &str) -> anyhow::Result<()> {
        let msg: PullRequestDeleteMessage = serde_json::from_str(payload)?;
        let id = msg.id;
        let deleted = self
            .db
            .call(move |db| db.delete_tracked_pull_request(id))
            .await?;
        if deleted {
            tracing::info!(
                repository = %msg.repository,
                number = msg.pull_request_number,
                reason = msg.reason.as_deref().unwrap_or("-"),
                "Stopped tracking pull request"
            );
        } else {
            tracing::debug!(id, "Pull request already untracked");
        }
        Ok(())
    }
}

/// Persists notifications announced on `notification:create`.
pub struct NotificationHandler {
    db: DbHandle,
}

impl NotificationHandler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "notification-create"
    }

    async fn handle(&self, payload: &str) -> anyhow::Result<()> {
        let msg: NotificationMessage = serde_json::from_str(payload)?;
        let title = msg.title.clone();
        let created = self.db.call(move |db| db.create_notification(&msg)).await?;
        match created {
            Some(n) => tracing::info!(id = n.id, title = %title, "Notification created"),
            None => tracing::debug!(title = %title, "Duplicate notification ignored"),
        }
        Ok(())
    }
}
