//! Pull-request housekeeping job.
//!
//! One pass lists the tracked pull requests once, fetches each one's live
//! state, partitions the results in memory and publishes one message per
//! action: a `pull-request:delete` for every merged PR and a
//! `notification:create` for every open PR that is stale or conflicting.
//!
//! Per-item failures are collected in the [`CoordinatorReport`]; only a
//! failure to list the tracked set aborts the pass. Nothing is retried
//! within a pass, so subscribers must tolerate re-published messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, NOTIFICATION_CREATE_TOPIC, PULL_REQUEST_DELETE_TOPIC, publish_json};
use super::db::DbHandle;
use super::github::GitHubClient;
use super::models::*;
use crate::errors::CoordinatorError;

/// Where the coordinator gets its pull requests from.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    async fn list_tracked(&self) -> anyhow::Result<Vec<TrackedPullRequest>>;

    async fn fetch_detail(&self, pr: &TrackedPullRequest) -> anyhow::Result<PullRequestDetail>;
}

/// Tracked set from the database, live state from GitHub.
pub struct TrackedPullRequestSource {
    db: DbHandle,
    github: GitHubClient,
}

impl TrackedPullRequestSource {
    pub fn new(db: DbHandle, github: GitHubClient) -> Self {
        Self { db, github }
    }
}

#[async_trait]
impl PullRequestSource for TrackedPullRequestSource {
    async fn list_tracked(&self) -> anyhow::Result<Vec<TrackedPullRequest>> {
        self.db.call(|db| db.list_tracked_pull_requests()).await
    }

    async fn fetch_detail(&self, pr: &TrackedPullRequest) -> anyhow::Result<PullRequestDetail> {
        Ok(self
            .github
            .get_pull_request(&pr.repository, pr.pull_request_number)
            .await?)
    }
}

/// GitHub's `mergeable_state`, folded into the cases the job acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeableBucket {
    Mergeable,
    Conflicting,
    Blocked,
    Behind,
    Draft,
    Unknown,
}

impl MergeableBucket {
    pub fn from_state(state: Option<&str>) -> Self {
        match state {
            Some("clean") | Some("has_hooks") | Some("unstable") => Self::Mergeable,
            Some("dirty") => Self::Conflicting,
            Some("blocked") => Self::Blocked,
            Some("behind") => Self::Behind,
            Some("draft") => Self::Draft,
            _ => Self::Unknown,
        }
    }
}

/// A fetched pull request with the fields the partition keys on.
#[derive(Debug, Clone, PartialEq)]
pub struct PrActionItem {
    pub tracked: TrackedPullRequest,
    pub detail: PullRequestDetail,
    pub open: bool,
    pub merged: bool,
    pub bucket: MergeableBucket,
    pub age_days: i64,
}

impl PrActionItem {
    pub fn new(tracked: TrackedPullRequest, detail: PullRequestDetail, now: DateTime<Utc>) -> Self {
        let age_days = (now - detail.created_at).num_days().max(0);
        Self {
            open: detail.state == "open",
            merged: detail.merged || detail.merged_at.is_some(),
            bucket: MergeableBucket::from_state(detail.mergeable_state.as_deref()),
            age_days,
            tracked,
            detail,
        }
    }

    fn slug(&self) -> String {
        format!("{}#{}", self.tracked.repository, self.tracked.pull_request_number)
    }
}

/// Result of partitioning one pass worth of items.
#[derive(Debug, Default)]
pub struct Partition {
    pub merged: Vec<PrActionItem>,
    pub stale: Vec<PrActionItem>,
    pub conflicting: Vec<PrActionItem>,
    /// Closed without merging, or open with nothing to report.
    pub idle: usize,
}

/// Split items along independent axes. An open PR can be both stale and
/// conflicting.
pub fn partition(items: Vec<PrActionItem>, stale_after_days: i64) -> Partition {
    let mut out = Partition::default();
    for item in items {
        if item.merged {
            out.merged.push(item);
            continue;
        }
        if !item.open {
            out.idle += 1;
            continue;
        }
        let stale = item.age_days >= stale_after_days;
        let conflicting = item.bucket == MergeableBucket::Conflicting;
        if stale {
            out.stale.push(item.clone());
        }
        if conflicting {
            out.conflicting.push(item);
        } else if !stale {
            out.idle += 1;
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub stale_after_days: i64,
    pub max_concurrent_fetches: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            stale_after_days: 14,
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    FetchDetail,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub repository: String,
    pub pull_request_number: i64,
    pub stage: FailureStage,
    pub error: String,
}

/// Outcome of one coordinator pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorReport {
    pub fetched: usize,
    pub processed: usize,
    pub deletions_published: usize,
    pub notifications_published: usize,
    pub failures: Vec<ItemFailure>,
}

pub struct PullRequestCoordinator {
    source: Arc<dyn PullRequestSource>,
    channel: Arc<dyn Channel>,
    settings: CoordinatorSettings,
}

impl PullRequestCoordinator {
    pub fn new(
        source: Arc<dyn PullRequestSource>,
        channel: Arc<dyn Channel>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            source,
            channel,
            settings,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CoordinatorReport, CoordinatorError> {
        let tracked = self
            .source
            .list_tracked()
            .await
            .map_err(CoordinatorError::Upstream)?;
        let mut report = CoordinatorReport {
            fetched: tracked.len(),
            ..CoordinatorReport::default()
        };

        let source = self.source.clone();
        let mut results: Vec<(TrackedPullRequest, anyhow::Result<PullRequestDetail>)> =
            futures::stream::iter(tracked)
                .map(|pr| {
                    let source = source.clone();
                    async move {
                        let detail = source.fetch_detail(&pr).await;
                        (pr, detail)
                    }
                })
                .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
                .collect()
                .await;
        results.sort_by_key(|(pr, _)| pr.id);

        let mut items = Vec::with_capacity(results.len());
        for (pr, detail) in results {
            match detail {
                Ok(detail) => items.push(PrActionItem::new(pr, detail, now)),
                Err(e) => {
                    tracing::warn!(
                        repository = %pr.repository,
                        number = pr.pull_request_number,
                        "Failed to fetch pull request detail: {:#}",
                        e
                    );
                    report.failures.push(ItemFailure {
                        repository: pr.repository,
                        pull_request_number: pr.pull_request_number,
                        stage: FailureStage::FetchDetail,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        report.processed = items.len();

        let parts = partition(items, self.settings.stale_after_days);

        for item in &parts.merged {
            let msg = PullRequestDeleteMessage {
                id: item.tracked.id,
                pull_request_number: item.tracked.pull_request_number,
                repository: item.tracked.repository.clone(),
                reason: Some("merged".to_string()),
            };
            if self
                .publish(&mut report, item, PULL_REQUEST_DELETE_TOPIC, &msg)
                .await
            {
                report.deletions_published += 1;
            }
        }

        let notices = parts
            .stale
            .iter()
            .map(|item| (item, stale_notice(item)))
            .chain(parts.conflicting.iter().map(|item| (item, conflict_notice(item))));
        for (item, msg) in notices {
            if self
                .publish(&mut report, item, NOTIFICATION_CREATE_TOPIC, &msg)
                .await
            {
                report.notifications_published += 1;
            }
        }

        tracing::info!(
            fetched = report.fetched,
            processed = report.processed,
            deletions = report.deletions_published,
            notifications = report.notifications_published,
            failures = report.failures.len(),
            idle = parts.idle,
            "Pull request coordinator pass complete"
        );
        Ok(report)
    }

    async fn publish<T: Serialize>(
        &self,
        report: &mut CoordinatorReport,
        item: &PrActionItem,
        topic: &str,
        msg: &T,
    ) -> bool {
        match publish_json(self.channel.as_ref(), topic, msg).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pr = %item.slug(), topic, "Failed to publish: {}", e);
                report.failures.push(ItemFailure {
                    repository: item.tracked.repository.clone(),
                    pull_request_number: item.tracked.pull_request_number,
                    stage: FailureStage::Publish,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Run a pass every `interval` until `cancel` fires. The first pass runs
    /// immediately. A failed pass is logged and the next one runs on schedule.
    pub async fn run_scheduled(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_once(Utc::now()).await {
                tracing::error!("Pull request coordinator pass aborted: {}", e);
            }
        }
        tracing::info!("Pull request coordinator stopped");
    }
}

fn stale_notice(item: &PrActionItem) -> NotificationMessage {
    NotificationMessage {
        title: "Stale pull request".to_string(),
        message: format!(
            "{} \"{}\" has been open for {} days",
            item.slug(),
            item.detail.title,
            item.age_days
        ),
        kind: NotificationKind::Warning,
        link: Some(item.detail.html_url.clone()),
    }
}

fn conflict_notice(item: &PrActionItem) -> NotificationMessage {
    NotificationMessage {
        title: "Pull request has merge conflicts".to_string(),
        message: format!("{} \"{}\" cannot be merged cleanly", item.slug(), item.detail.title),
        kind: NotificationKind::Error,
        link: Some(item.detail.html_url.clone()),
    }
}
