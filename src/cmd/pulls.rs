//! Pull-request commands (`testboard coordinate` and `testboard track-pr`).

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;

use testboard::config::AppConfig;
use testboard::dashboard::channel::{
    MemoryChannel, NOTIFICATION_CREATE_TOPIC, PULL_REQUEST_DELETE_TOPIC,
};
use testboard::dashboard::coordinator::{PullRequestCoordinator, TrackedPullRequestSource};
use testboard::dashboard::db::DbHandle;
use testboard::dashboard::github::{GitHubClient, parse_owner_repo};
use testboard::dashboard::server::open_database;
use testboard::dashboard::subscribers::{
    MessageHandler, NotificationHandler, PullRequestDeleteHandler,
};

fn github_client(config: &AppConfig) -> Result<GitHubClient> {
    GitHubClient::new(
        &config.github.api_base,
        config.github.token.clone(),
        config.retry_policy(),
    )
}

/// Run one coordinator pass. Messages are collected first and then handed
/// to the same handlers the server subscribes, so a one-shot run applies
/// everything it published before exiting.
pub async fn cmd_coordinate(config: &AppConfig, dry_run: bool) -> Result<()> {
    let db = DbHandle::new(open_database(&config.server.db_path)?);
    let channel = Arc::new(MemoryChannel::new());
    let coordinator = PullRequestCoordinator::new(
        Arc::new(TrackedPullRequestSource::new(db.clone(), github_client(config)?)),
        channel.clone(),
        config.coordinator_settings(),
    );

    let report = coordinator.run_once(Utc::now()).await?;

    if dry_run {
        for message in channel.published() {
            println!("{} {}", message.topic, message.payload);
        }
    } else {
        let delete_handler = PullRequestDeleteHandler::new(db.clone());
        let notification_handler = NotificationHandler::new(db);
        for message in channel.published() {
            let handler: &dyn MessageHandler = match message.topic.as_str() {
                PULL_REQUEST_DELETE_TOPIC => &delete_handler,
                NOTIFICATION_CREATE_TOPIC => &notification_handler,
                _ => continue,
            };
            if let Err(e) = handler.handle(&message.payload).await {
                tracing::error!(topic = %message.topic, "Failed to apply message: {:#}", e);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn cmd_track_pr(
    config: &AppConfig,
    repository: &str,
    number: i64,
    title: Option<&str>,
) -> Result<()> {
    let Some(repository) = parse_owner_repo(repository) else {
        bail!(
            "Invalid repository '{}': expected owner/name or a GitHub URL",
            repository
        );
    };
    if number <= 0 {
        bail!("Invalid pull request number: {}", number);
    }

    let (title, author) = match title {
        Some(title) => (title.to_string(), None),
        None => {
            let detail = github_client(config)?
                .get_pull_request(&repository, number)
                .await
                .with_context(|| format!("Failed to fetch {}#{}", repository, number))?;
            (detail.title, detail.user.map(|u| u.login))
        }
    };

    let db = DbHandle::new(open_database(&config.server.db_path)?);
    let tracked = db
        .call(move |db| {
            db.track_pull_request(&repository, number, &title, author.as_deref())
        })
        .await?;
    println!(
        "Tracking {}#{} (id {}): {}",
        tracked.repository, tracked.pull_request_number, tracked.id, tracked.title
    );
    Ok(())
}
