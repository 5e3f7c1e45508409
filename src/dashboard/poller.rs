//! Client-side report poller.
//!
//! Holds the latest primary and comparison-day reports for one date. While
//! the primary report is pending it re-fetches on a fixed interval; the loop
//! ends when the report is no longer pending (whether a poll or a refresh saw
//! it) or the poller is shut down. A tick that lands during a refresh is
//! skipped.
//! Refreshes fetch both reports in parallel, and a forced refresh has to be
//! requested and then confirmed.
//!
//! State is published through a `watch` channel so a UI (or the `watch`
//! command) can render every change.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::models::{Enrichments, ReportStatus};
use super::query::{ReportRequest, ReportResponse};
use super::retry::{RetryPolicy, send_with_retry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Fetches a report from wherever the query service lives.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch(&self, request: ReportRequest) -> anyhow::Result<ReportResponse>;
}

/// Fetches reports from a running server's `/api/e2e-reports`.
pub struct HttpReportFetcher {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpReportFetcher {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }
}

#[async_trait]
impl ReportFetcher for HttpReportFetcher {
    async fn fetch(&self, request: ReportRequest) -> anyhow::Result<ReportResponse> {
        let url = format!("{}/api/e2e-reports", self.base_url);
        let date = request.date.format("%Y-%m-%d").to_string();
        let enrichments = request.enrichments.to_query_value();
        let resp = send_with_retry(&self.retry, || {
            let mut query = vec![("date", date.as_str()), ("enrichments", enrichments.as_str())];
            if request.force {
                query.push(("force", "true"));
            }
            self.http.get(&url).query(&query)
        })
        .await?;
        Ok(resp.json::<ReportResponse>().await?)
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Enrichments requested for the primary report. The comparison report
    /// is always summary-only.
    pub enrichments: Enrichments,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            enrichments: Enrichments::full(),
        }
    }
}

/// Everything a view needs to render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerSnapshot {
    pub primary: Option<ReportResponse>,
    pub comparison: Option<ReportResponse>,
    pub last_error: Option<String>,
    pub refreshing: bool,
    pub awaiting_force_confirmation: bool,
    pub polling: bool,
}

impl PollerSnapshot {
    pub fn primary_status(&self) -> Option<ReportStatus> {
        self.primary.as_ref().map(|r| r.summary.status)
    }

    pub fn controls_enabled(&self) -> bool {
        !self.refreshing
    }
}

pub struct ReportPoller {
    fetcher: Arc<dyn ReportFetcher>,
    date: NaiveDate,
    settings: PollerSettings,
    state: watch::Sender<PollerSnapshot>,
    refresh_in_flight: AtomicBool,
    /// Generation and stop token of the running poll loop, if any.
    poll_loop: Mutex<Option<(u64, CancellationToken)>>,
    poll_generation: AtomicU64,
    cancel: CancellationToken,
}

impl ReportPoller {
    pub fn new(fetcher: Arc<dyn ReportFetcher>, date: NaiveDate, settings: PollerSettings) -> Arc<Self> {
        let (state, _) = watch::channel(PollerSnapshot::default());
        Arc::new(Self {
            fetcher,
            date,
            settings,
            state,
            refresh_in_flight: AtomicBool::new(false),
            poll_loop: Mutex::new(None),
            poll_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn comparison_date(&self) -> NaiveDate {
        self.date.pred_opt().unwrap_or(self.date)
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        self.state.borrow().clone()
    }

    pub fn controls_enabled(&self) -> bool {
        self.snapshot().controls_enabled()
    }

    /// Initial load: same as a plain refresh.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<bool> {
        self.refresh().await
    }

    pub async fn refresh(self: &Arc<Self>) -> anyhow::Result<bool> {
        self.run_refresh(false).await
    }

    /// First step of a forced refresh; nothing is fetched until confirmed.
    pub fn request_force_refresh(&self) {
        self.state
            .send_modify(|s| s.awaiting_force_confirmation = true);
    }

    pub fn cancel_force_refresh(&self) {
        self.state
            .send_modify(|s| s.awaiting_force_confirmation = false);
    }

    /// Confirm a requested forced refresh. Returns `Ok(false)` when no
    /// confirmation was pending or another refresh is in flight.
    pub async fn confirm_force_refresh(self: &Arc<Self>) -> anyhow::Result<bool> {
        let mut was_awaiting = false;
        self.state.send_modify(|s| {
            was_awaiting = s.awaiting_force_confirmation;
            s.awaiting_force_confirmation = false;
        });
        if !was_awaiting {
            return Ok(false);
        }
        self.run_refresh(true).await
    }

    /// Stop polling. An in-flight fetch is left to finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns `Ok(false)` without fetching when a refresh is already running.
    async fn run_refresh(self: &Arc<Self>, force: bool) -> anyhow::Result<bool> {
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refresh already in flight; ignoring");
            return Ok(false);
        }
        self.state.send_modify(|s| s.refreshing = true);

        let primary = ReportRequest {
            date: self.date,
            enrichments: self.settings.enrichments,
            force,
        };
        let comparison = ReportRequest::new(self.comparison_date());
        let (primary, comparison) = tokio::join!(
            self.fetcher.fetch(primary),
            self.fetcher.fetch(comparison)
        );

        let mut first_error = None;
        self.state.send_modify(|s| {
            match &primary {
                Ok(resp) => s.primary = Some(resp.clone()),
                Err(e) => first_error = Some(format!("{:#}", e)),
            }
            match &comparison {
                Ok(resp) => s.comparison = Some(resp.clone()),
                Err(e) => {
                    first_error.get_or_insert_with(|| format!("{:#}", e));
                }
            }
            s.last_error = first_error.clone();
            s.refreshing = false;
        });
        self.refresh_in_flight.store(false, Ordering::Release);

        if let Ok(resp) = &primary {
            if resp.summary.is_pending() {
                self.ensure_polling();
            } else {
                self.stop_polling();
            }
        }
        match first_error {
            Some(e) => Err(anyhow::anyhow!(e)),
            None => Ok(true),
        }
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut slot = self.poll_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(_, token)| !token.is_cancelled()) {
            return;
        }
        let generation = self.poll_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = self.cancel.child_token();
        *slot = Some((generation, token.clone()));
        drop(slot);

        self.state.send_modify(|s| s.polling = true);
        let this = self.clone();
        tokio::spawn(async move { this.poll_loop(generation, token).await });
    }

    /// Stop the running poll loop. A fetch it has in flight is discarded.
    fn stop_polling(&self) {
        let stopped = self
            .poll_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((generation, token)) = stopped {
            token.cancel();
            self.state.send_modify(|s| s.polling = false);
            tracing::debug!(date = %self.date, generation, "Polling stopped by refresh");
        }
    }

    async fn poll_loop(self: Arc<Self>, generation: u64, token: CancellationToken) {
        tracing::debug!(date = %self.date, generation, "Polling pending report");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
            if self.refresh_in_flight.load(Ordering::Acquire) {
                tracing::debug!(date = %self.date, "Refresh in flight; skipping poll");
                continue;
            }
            let request = ReportRequest {
                date: self.date,
                enrichments: self.settings.enrichments,
                force: false,
            };
            let result = self.fetcher.fetch(request).await;
            if token.is_cancelled() {
                break;
            }
            match result {
                Ok(resp) => {
                    let pending = resp.summary.is_pending();
                    self.state.send_modify(|s| {
                        s.primary = Some(resp);
                        s.last_error = None;
                    });
                    if !pending {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(date = %self.date, "Poll failed: {:#}", e);
                    self.state
                        .send_modify(|s| s.last_error = Some(format!("{:#}", e)));
                }
            }
        }

        let mut slot = self.poll_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(current, _)| *current == generation) {
            *slot = None;
            self.state.send_modify(|s| s.polling = false);
        }
        drop(slot);
        tracing::debug!(date = %self.date, generation, "Polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::models::ReportSummary;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn pending(day: &str) -> ReportResponse {
        ReportResponse {
            success: true,
            summary: ReportSummary::placeholder(day),
            details: Some(Vec::new()),
            message: Some("Report is being generated...".to_string()),
        }
    }

    fn ready(day: &str) -> ReportResponse {
        let mut summary = ReportSummary::placeholder(day);
        summary.status = ReportStatus::Ready;
        summary.total_runs = 10;
        summary.message = None;
        ReportResponse {
            success: true,
            summary,
            details: None,
            message: None,
        }
    }

    /// Scripted fetcher: the primary date follows `script` (last entry
    /// repeats), any other date is ready.
    struct ScriptedFetcher {
        primary: NaiveDate,
        script: Mutex<VecDeque<ReportResponse>>,
        calls: Mutex<Vec<ReportRequest>>,
        delay: Duration,
        fail: bool,
    }

    impl ScriptedFetcher {
        fn new(primary: NaiveDate, script: Vec<ReportResponse>) -> Self {
            Self {
                primary,
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn calls(&self) -> Vec<ReportRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn primary_calls(&self) -> usize {
            self.calls().iter().filter(|r| r.date == self.primary).count()
        }
    }

    #[async_trait]
    impl ReportFetcher for ScriptedFetcher {
        async fn fetch(&self, request: ReportRequest) -> anyhow::Result<ReportResponse> {
            self.calls.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("connection refused");
            }
            let day = request.date.format("%Y-%m-%d").to_string();
            if request.date != self.primary {
                return Ok(ready(&day));
            }
            let mut script = self.script.lock().unwrap();
            let resp = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            Ok(resp.unwrap_or_else(|| ready(&day)))
        }
    }

    fn poller(fetcher: Arc<ScriptedFetcher>) -> Arc<ReportPoller> {
        let day = fetcher.primary;
        ReportPoller::new(fetcher, day, PollerSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_every_interval_until_ready() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(
            d,
            vec![pending("2025-10-09"), pending("2025-10-09"), ready("2025-10-09")],
        ));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        assert_eq!(p.snapshot().primary_status(), Some(ReportStatus::Pending));
        assert_eq!(fetcher.primary_calls(), 1);

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(fetcher.primary_calls(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fetcher.primary_calls(), 2);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fetcher.primary_calls(), 3);
        assert_eq!(p.snapshot().primary_status(), Some(ReportStatus::Ready));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.primary_calls(), 3);
        assert!(!p.snapshot().polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_load_never_polls() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(d, vec![ready("2025-10-09")]));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(fetcher.primary_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_day_is_fetched_summary_only() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(d, vec![pending("2025-10-09")]));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        let comparison: Vec<ReportRequest> = fetcher
            .calls()
            .into_iter()
            .filter(|r| r.date == date("2025-10-08"))
            .collect();
        // Fetched once on load; the poll loop only re-fetches the primary day.
        assert_eq!(comparison.len(), 1);
        assert_eq!(comparison[0].enrichments, Enrichments::summary_only());
        assert!(p.snapshot().comparison.is_some());
        p.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(d, vec![pending("2025-10-09")]));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(fetcher.primary_calls(), 2);

        p.shutdown();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.primary_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_requires_confirmation() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(d, vec![ready("2025-10-09")]));
        let p = poller(fetcher.clone());

        assert!(!p.confirm_force_refresh().await.unwrap());
        assert!(fetcher.calls().is_empty());

        p.request_force_refresh();
        assert!(p.snapshot().awaiting_force_confirmation);
        p.cancel_force_refresh();
        assert!(!p.confirm_force_refresh().await.unwrap());

        p.request_force_refresh();
        assert!(p.confirm_force_refresh().await.unwrap());
        assert!(!p.snapshot().awaiting_force_confirmation);

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        let primary = calls.iter().find(|r| r.date == d).unwrap();
        let comparison = calls.iter().find(|r| r.date != d).unwrap();
        assert!(primary.force);
        assert!(!comparison.force);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_while_in_flight_is_a_no_op() {
        let d = date("2025-10-09");
        let mut fetcher = ScriptedFetcher::new(d, vec![ready("2025-10-09")]);
        fetcher.delay = Duration::from_secs(1);
        let fetcher = Arc::new(fetcher);
        let p = poller(fetcher.clone());

        let first = {
            let p = p.clone();
            tokio::spawn(async move { p.refresh().await })
        };
        tokio::task::yield_now().await;
        assert!(!p.controls_enabled());

        assert!(!p.refresh().await.unwrap());
        assert!(first.await.unwrap().unwrap());
        assert!(p.controls_enabled());
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_seeing_ready_stops_scheduled_poll() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(
            d,
            vec![pending("2025-10-09"), ready("2025-10-09"), pending("2025-10-09")],
        ));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        assert!(p.snapshot().polling);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(p.refresh().await.unwrap());
        assert_eq!(fetcher.primary_calls(), 2);
        assert!(!p.snapshot().polling);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetcher.primary_calls(), 2);
        let snap = p.snapshot();
        assert_eq!(snap.primary_status(), Some(ReportStatus::Ready));
        assert!(!snap.polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_seeing_pending_keeps_single_loop() {
        let d = date("2025-10-09");
        let fetcher = Arc::new(ScriptedFetcher::new(d, vec![pending("2025-10-09")]));
        let p = poller(fetcher.clone());

        p.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        p.refresh().await.unwrap();
        assert_eq!(fetcher.primary_calls(), 2);

        // Still one loop on the original schedule: one tick at t=5s.
        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(fetcher.primary_calls(), 3);
        assert!(p.snapshot().polling);
        p.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tick_skipped_while_refresh_in_flight() {
        let d = date("2025-10-09");
        let mut fetcher = ScriptedFetcher::new(d, vec![pending("2025-10-09")]);
        fetcher.delay = Duration::from_secs(3);
        let fetcher = Arc::new(fetcher);
        let p = poller(fetcher.clone());

        // Loaded at t=3s; the first tick is due at t=8s.
        p.start().await.unwrap();
        assert_eq!(fetcher.primary_calls(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let refresh = {
            let p = p.clone();
            tokio::spawn(async move { p.refresh().await })
        };

        // The refresh runs from t=6s to t=9s, so the t=8s tick does not fetch.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(fetcher.primary_calls(), 2);
        assert!(refresh.await.unwrap().unwrap());

        // The next tick, at t=13s, fetches again.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(fetcher.primary_calls(), 3);
        p.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_reenabled_after_failure() {
        let d = date("2025-10-09");
        let mut fetcher = ScriptedFetcher::new(d, Vec::new());
        fetcher.fail = true;
        let p = poller(Arc::new(fetcher));

        let err = p.refresh().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        let snap = p.snapshot();
        assert!(snap.controls_enabled());
        assert!(snap.last_error.is_some());
        assert!(!snap.polling);
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_query_and_accepts_202() {
        use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/api/e2e-reports",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("date").map(String::as_str), Some("2025-10-09"));
                assert_eq!(q.get("force").map(String::as_str), Some("true"));
                assert!(q.contains_key("enrichments"));
                (StatusCode::ACCEPTED, Json(pending("2025-10-09")))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = HttpReportFetcher::new(&format!("http://{}", addr), RetryPolicy::none()).unwrap();
        let resp = fetcher
            .fetch(ReportRequest {
                date: date("2025-10-09"),
                enrichments: Enrichments::full(),
                force: true,
            })
            .await
            .unwrap();
        assert!(resp.summary.is_pending());
    }
}
