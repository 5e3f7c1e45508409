//! Report client commands (`testboard report` and `testboard watch`).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use testboard::config::AppConfig;
use testboard::dashboard::models::ReportStatus;
use testboard::dashboard::poller::{HttpReportFetcher, PollerSnapshot, ReportFetcher, ReportPoller};
use testboard::dashboard::query::{ReportRequest, ReportResponse};

fn build_request(
    date: Option<&str>,
    enrichments: Option<&str>,
    force: bool,
) -> Result<ReportRequest> {
    let force = force.then_some("true");
    ReportRequest::parse(date, enrichments, force, Utc::now().date_naive())
        .context("Invalid report request")
}

fn fetcher_for(config: &AppConfig, url: Option<&str>) -> Result<HttpReportFetcher> {
    let base = url.map(str::to_string).unwrap_or_else(|| config.server_url());
    HttpReportFetcher::new(&base, config.retry_policy())
}

pub async fn cmd_report(
    config: &AppConfig,
    date: Option<&str>,
    force: bool,
    enrichments: Option<&str>,
    url: Option<&str>,
) -> Result<()> {
    let request = build_request(date, enrichments, force)?;
    let fetcher = fetcher_for(config, url)?;
    let response = fetcher.fetch(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn describe(response: &ReportResponse) -> String {
    let summary = &response.summary;
    match summary.status {
        ReportStatus::Ready => format!(
            "{} ready: {}/{} passed ({:.1}%)",
            summary.date,
            summary.passed_runs,
            summary.total_runs,
            summary.success_rate * 100.0
        ),
        status => format!(
            "{} {}: {}",
            summary.date,
            status.as_str(),
            summary.message.as_deref().unwrap_or("")
        ),
    }
}

fn print_snapshot(snapshot: &PollerSnapshot) {
    if let Some(primary) = &snapshot.primary {
        println!("{}", describe(primary));
    }
    if let Some(comparison) = &snapshot.comparison {
        println!("  previous day: {}", describe(comparison));
    }
    if let Some(error) = &snapshot.last_error {
        eprintln!("  last error: {}", error);
    }
}

pub async fn cmd_watch(
    config: &AppConfig,
    date: Option<&str>,
    force: bool,
    url: Option<&str>,
) -> Result<()> {
    let request = build_request(date, None, false)?;
    let fetcher = Arc::new(fetcher_for(config, url)?);
    let poller = ReportPoller::new(fetcher, request.date, config.poller_settings());
    let mut rx = poller.subscribe();

    if let Err(e) = poller.start().await {
        if poller.snapshot().primary.is_none() {
            return Err(e.context("Initial report load failed"));
        }
        tracing::warn!("Initial load incomplete: {:#}", e);
    }
    if force {
        poller.request_force_refresh();
        poller.confirm_force_refresh().await?;
    }

    let mut last_printed = None;
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let key = (
            snapshot.primary_status(),
            snapshot.last_error.clone(),
            snapshot.comparison.as_ref().map(|c| c.summary.status),
        );
        if last_printed.as_ref() != Some(&key) {
            print_snapshot(&snapshot);
            last_printed = Some(key);
        }
        if !snapshot.refreshing && snapshot.primary_status() != Some(ReportStatus::Pending) {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
        }
    }

    poller.shutdown();
    Ok(())
}
