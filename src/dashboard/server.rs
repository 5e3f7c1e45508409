use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::channel::{
    BroadcastChannel, NOTIFICATION_CREATE_TOPIC, PULL_REQUEST_DELETE_TOPIC, REPORT_GENERATE_TOPIC,
};
use super::consumer::{ReportGenerator, StoredRunsComputer};
use super::coordinator::{PullRequestCoordinator, TrackedPullRequestSource};
use super::db::{DbHandle, ReportDb};
use super::dispatch::GenerationDispatcher;
use super::github::GitHubClient;
use super::query::ReportQueryService;
use super::subscribers::{NotificationHandler, PullRequestDeleteHandler, spawn_subscriber};
use crate::config::AppConfig;

/// Open (creating parent directories) and migrate the database.
pub fn open_database(path: &std::path::Path) -> Result<ReportDb> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    ReportDb::new(path).context("Failed to initialize report database")
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Everything running next to the HTTP server.
pub struct Services {
    pub state: Arc<AppState>,
    pub channel: Arc<BroadcastChannel>,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Wire the pipeline together and start the background subscribers.
    /// Must be called inside a tokio runtime.
    pub fn start(config: &AppConfig, db: DbHandle) -> Result<Self> {
        let channel = Arc::new(BroadcastChannel::new(config.server.channel_capacity));
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // Subscribe before anything can publish so no message is missed.
        if config.server.embedded_generator {
            let generator = Arc::new(ReportGenerator::new(
                db.clone(),
                Arc::new(StoredRunsComputer::new(db.clone())),
            ));
            tasks.push(spawn_subscriber(
                REPORT_GENERATE_TOPIC,
                channel.subscribe(REPORT_GENERATE_TOPIC)?,
                generator,
                cancel.clone(),
            ));
        }
        tasks.push(spawn_subscriber(
            PULL_REQUEST_DELETE_TOPIC,
            channel.subscribe(PULL_REQUEST_DELETE_TOPIC)?,
            Arc::new(PullRequestDeleteHandler::new(db.clone())),
            cancel.clone(),
        ));
        tasks.push(spawn_subscriber(
            NOTIFICATION_CREATE_TOPIC,
            channel.subscribe(NOTIFICATION_CREATE_TOPIC)?,
            Arc::new(NotificationHandler::new(db.clone())),
            cancel.clone(),
        ));

        if config.coordinator.enabled {
            let github = GitHubClient::new(
                &config.github.api_base,
                config.github.token.clone(),
                config.retry_policy(),
            )?;
            let coordinator = PullRequestCoordinator::new(
                Arc::new(TrackedPullRequestSource::new(db.clone(), github)),
                channel.clone(),
                config.coordinator_settings(),
            );
            let interval = Duration::from_secs(config.coordinator.interval_secs.max(1));
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.run_scheduled(interval, token).await
            }));
        }

        let dispatcher = GenerationDispatcher::new(channel.clone());
        let reports = Arc::new(ReportQueryService::new(
            db.clone(),
            dispatcher,
            config.query_settings(),
        ));
        let state = Arc::new(AppState { db, reports });

        Ok(Self {
            state,
            channel,
            cancel,
            tasks,
        })
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
    }
}

/// Start the dashboard server and block until shutdown.
pub async fn start_server(config: AppConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let db = DbHandle::new(open_database(&config.server.db_path)?);
    let services = Services::start(&config, db)?;
    let app = build_router(services.state.clone(), config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        db = %config.server.db_path.display(),
        embedded_generator = config.server.embedded_generator,
        coordinator = config.coordinator.enabled,
        "testboard running"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    services.shutdown().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig::default()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_through_full_router() {
        let db = DbHandle::new(ReportDb::new_in_memory().unwrap());
        let services = Services::start(&test_config(), db).unwrap();
        let app = build_router(services.state.clone(), true);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_report_is_generated_in_process() {
        let db = DbHandle::new(ReportDb::new_in_memory().unwrap());
        db.call(|db| {
            let app = db.create_application("checkout", None, None, None)?;
            for status in ["passed", "passed", "failed"] {
                db.create_manual_run(app.id, "2025-10-09", "ci", status, None)?;
            }
            Ok(())
        })
        .await
        .unwrap();
        let services = Services::start(&test_config(), db).unwrap();
        let app = build_router(services.state.clone(), false);

        let first = app
            .clone()
            .oneshot(get("/api/e2e-reports?date=2025-10-09"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let mut status = StatusCode::ACCEPTED;
        let mut body = serde_json::Value::Null;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(get("/api/e2e-reports?date=2025-10-09"))
                .await
                .unwrap();
            status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            body = serde_json::from_slice(&bytes).unwrap();
            if status == StatusCode::OK {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["totalRuns"], 3);
        assert_eq!(body["summary"]["passedRuns"], 2);

        services.shutdown().await;
    }

    #[test]
    fn test_open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/testboard.db");
        open_database(&path).unwrap();
        assert!(path.exists());
    }
}
