use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::models::*;

/// Async-safe handle to the dashboard database.
///
/// Wraps `ReportDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ReportDb>>,
}

impl DbHandle {
    pub fn new(db: ReportDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ReportDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ReportDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Aggregate counts written when a report becomes ready.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportTotals {
    pub total_runs: i64,
    pub passed_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
}

impl ReportTotals {
    pub fn from_details(details: &[NewReportDetail]) -> Self {
        let total_runs: i64 = details.iter().map(|d| d.total_runs).sum();
        let passed_runs: i64 = details.iter().map(|d| d.passed_runs).sum();
        let failed_runs: i64 = details.iter().map(|d| d.failed_runs).sum();
        let success_rate = if total_runs > 0 {
            passed_runs as f64 / total_runs as f64
        } else {
            0.0
        };
        Self {
            total_runs,
            passed_runs,
            failed_runs,
            success_rate,
        }
    }
}

const SUMMARY_COLUMNS: &str = "id, date, status, total_runs, passed_runs, failed_runs, success_rate, message, created_at, updated_at";

pub struct ReportDb {
    conn: Connection,
}

impl ReportDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS applications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    display_name TEXT,
                    team TEXT,
                    repository TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS report_summaries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL DEFAULT 'pending',
                    total_runs INTEGER NOT NULL DEFAULT 0,
                    passed_runs INTEGER NOT NULL DEFAULT 0,
                    failed_runs INTEGER NOT NULL DEFAULT 0,
                    success_rate REAL NOT NULL DEFAULT 0,
                    message TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS report_details (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    summary_id INTEGER NOT NULL REFERENCES report_summaries(id) ON DELETE CASCADE,
                    application_id INTEGER NOT NULL,
                    total_runs INTEGER NOT NULL DEFAULT 0,
                    passed_runs INTEGER NOT NULL DEFAULT 0,
                    failed_runs INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS manual_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    application_id INTEGER NOT NULL,
                    report_date TEXT NOT NULL,
                    triggered_by TEXT NOT NULL,
                    status TEXT NOT NULL,
                    notes TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS generation_claims (
                    date TEXT PRIMARY KEY,
                    request_id TEXT NOT NULL,
                    claimed_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tracked_pull_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repository TEXT NOT NULL,
                    pull_request_number INTEGER NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    author TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(repository, pull_request_number)
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    kind TEXT NOT NULL DEFAULT 'info',
                    link TEXT,
                    dedupe_key TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_report_details_summary ON report_details(summary_id);
                CREATE INDEX IF NOT EXISTS idx_manual_runs_date ON manual_runs(report_date);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Raw connection access for test fixtures that need explicit ids.
    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Report summaries ──────────────────────────────────────────────

    pub fn get_summary_by_date(&self, date: &str) -> Result<Option<ReportSummary>> {
        let sql = format!(
            "SELECT {} FROM report_summaries WHERE date = ?1",
            SUMMARY_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![date], |row| {
                Ok(ReportSummaryRow {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    status: row.get(2)?,
                    total_runs: row.get(3)?,
                    passed_runs: row.get(4)?,
                    failed_runs: row.get(5)?,
                    success_rate: row.get(6)?,
                    message: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })
            .optional()
            .context("Failed to query report summary")?;
        row.map(|r| r.into_summary()).transpose()
    }

    /// Insert the pending row for `date`. Returns `None` when a summary for
    /// the date already exists, whatever its status.
    pub fn create_pending_summary(&self, date: &str) -> Result<Option<ReportSummary>> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO report_summaries (date, status, message) VALUES (?1, 'pending', ?2)",
                params![date, PENDING_MESSAGE],
            )
            .context("Failed to insert pending summary")?;
        if inserted == 0 {
            return Ok(None);
        }
        self.get_summary_by_date(date)
    }

    /// Move the pending summary for `date` to ready and attach its details
    /// in one transaction.
    pub fn complete_summary(
        &self,
        date: &str,
        totals: ReportTotals,
        message: Option<&str>,
        details: &[NewReportDetail],
    ) -> Result<ReportSummary> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let summary_id: i64 = tx
            .query_row(
                "SELECT id FROM report_summaries WHERE date = ?1 AND status = 'pending'",
                params![date],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up pending summary")?
            .ok_or_else(|| anyhow::anyhow!("No pending summary for {}", date))?;

        tx.execute(
            "UPDATE report_summaries
             SET status = 'ready', total_runs = ?1, passed_runs = ?2, failed_runs = ?3,
                 success_rate = ?4, message = ?5, updated_at = datetime('now')
             WHERE id = ?6",
            params![
                totals.total_runs,
                totals.passed_runs,
                totals.failed_runs,
                totals.success_rate,
                message,
                summary_id
            ],
        )
        .context("Failed to mark summary ready")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO report_details (summary_id, application_id, total_runs, passed_runs, failed_runs)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context("Failed to prepare detail insert")?;
            for d in details {
                stmt.execute(params![
                    summary_id,
                    d.application_id,
                    d.total_runs,
                    d.passed_runs,
                    d.failed_runs
                ])
                .context("Failed to insert report detail")?;
            }
        }

        tx.commit().context("Failed to commit ready summary")?;
        self.get_summary_by_date(date)?
            .context("Summary not found after completion")
    }

    /// Delete a summary; its details go with it via `ON DELETE CASCADE`.
    pub fn delete_summary(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM report_summaries WHERE id = ?1", params![id])
            .context("Failed to delete report summary")?;
        Ok(deleted > 0)
    }

    pub fn list_details(&self, summary_id: i64) -> Result<Vec<ReportDetail>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, summary_id, application_id, total_runs, passed_runs, failed_runs
                 FROM report_details WHERE summary_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_details")?;
        let rows = stmt
            .query_map(params![summary_id], |row| {
                Ok(ReportDetail {
                    id: row.get(0)?,
                    summary_id: row.get(1)?,
                    application_id: row.get(2)?,
                    total_runs: row.get(3)?,
                    passed_runs: row.get(4)?,
                    failed_runs: row.get(5)?,
                })
            })
            .context("Failed to query report details")?;
        let mut details = Vec::new();
        for row in rows {
            details.push(row.context("Failed to read report detail row")?);
        }
        Ok(details)
    }

    pub fn count_details(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM report_details", [], |row| row.get(0))
            .context("Failed to count report details")
    }

    // ── Generation claims ─────────────────────────────────────────────

    /// Record that a generation request for `date` is being dispatched.
    ///
    /// Returns `false` when another request claimed the date less than
    /// `ttl_secs` ago. `force` overrides a live claim.
    pub fn claim_generation(
        &self,
        date: &str,
        request_id: &str,
        now_secs: i64,
        ttl_secs: i64,
        force: bool,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO generation_claims (date, request_id, claimed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(date) DO UPDATE SET
                     request_id = excluded.request_id,
                     claimed_at = excluded.claimed_at
                 WHERE ?4 = 1 OR generation_claims.claimed_at <= ?5",
                params![date, request_id, now_secs, force, now_secs.saturating_sub(ttl_secs)],
            )
            .context("Failed to record generation claim")?;
        Ok(changed > 0)
    }

    pub fn release_claim(&self, date: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM generation_claims WHERE date = ?1", params![date])
            .context("Failed to release generation claim")?;
        Ok(())
    }

    // ── Applications & manual runs ────────────────────────────────────

    pub fn create_application(
        &self,
        name: &str,
        display_name: Option<&str>,
        team: Option<&str>,
        repository: Option<&str>,
    ) -> Result<Application> {
        self.conn
            .execute(
                "INSERT INTO applications (name, display_name, team, repository) VALUES (?1, ?2, ?3, ?4)",
                params![name, display_name, team, repository],
            )
            .context("Failed to insert application")?;
        Ok(Application {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            display_name: display_name.map(str::to_string),
            team: team.map(str::to_string),
            repository: repository.map(str::to_string),
        })
    }

    /// Look up applications by id. Unknown ids are simply absent from the map.
    pub fn get_applications(&self, ids: &[i64]) -> Result<HashMap<i64, Application>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, display_name, team, repository FROM applications WHERE id IN ({})",
            placeholders
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_applications")?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(Application {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                    team: row.get(3)?,
                    repository: row.get(4)?,
                })
            })
            .context("Failed to query applications")?;
        let mut apps = HashMap::new();
        for row in rows {
            let app = row.context("Failed to read application row")?;
            apps.insert(app.id, app);
        }
        Ok(apps)
    }

    pub fn create_manual_run(
        &self,
        application_id: i64,
        report_date: &str,
        triggered_by: &str,
        status: &str,
        notes: Option<&str>,
    ) -> Result<ManualRun> {
        self.conn
            .execute(
                "INSERT INTO manual_runs (application_id, report_date, triggered_by, status, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![application_id, report_date, triggered_by, status, notes],
            )
            .context("Failed to insert manual run")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, application_id, report_date, triggered_by, status, notes, created_at
                 FROM manual_runs WHERE id = ?1",
                params![id],
                read_manual_run,
            )
            .context("Manual run not found after insert")
    }

    pub fn list_manual_runs_for_date(&self, report_date: &str) -> Result<Vec<ManualRun>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, application_id, report_date, triggered_by, status, notes, created_at
                 FROM manual_runs WHERE report_date = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_manual_runs_for_date")?;
        let rows = stmt
            .query_map(params![report_date], read_manual_run)
            .context("Failed to query manual runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read manual run row")?);
        }
        Ok(runs)
    }

    // ── Tracked pull requests ─────────────────────────────────────────

    /// Start tracking a pull request. Tracking the same PR twice returns the
    /// existing row.
    pub fn track_pull_request(
        &self,
        repository: &str,
        pull_request_number: i64,
        title: &str,
        author: Option<&str>,
    ) -> Result<TrackedPullRequest> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO tracked_pull_requests (repository, pull_request_number, title, author)
                 VALUES (?1, ?2, ?3, ?4)",
                params![repository, pull_request_number, title, author],
            )
            .context("Failed to insert tracked pull request")?;
        self.conn
            .query_row(
                "SELECT id, repository, pull_request_number, title, author, created_at
                 FROM tracked_pull_requests WHERE repository = ?1 AND pull_request_number = ?2",
                params![repository, pull_request_number],
                read_tracked_pull_request,
            )
            .context("Tracked pull request not found after insert")
    }

    pub fn list_tracked_pull_requests(&self) -> Result<Vec<TrackedPullRequest>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, repository, pull_request_number, title, author, created_at
                 FROM tracked_pull_requests ORDER BY id",
            )
            .context("Failed to prepare list_tracked_pull_requests")?;
        let rows = stmt
            .query_map([], read_tracked_pull_request)
            .context("Failed to query tracked pull requests")?;
        let mut prs = Vec::new();
        for row in rows {
            prs.push(row.context("Failed to read tracked pull request row")?);
        }
        Ok(prs)
    }

    /// Returns `false` if the row was already gone.
    pub fn delete_tracked_pull_request(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM tracked_pull_requests WHERE id = ?1",
                params![id],
            )
            .context("Failed to delete tracked pull request")?;
        Ok(deleted > 0)
    }

    // ── Notifications ─────────────────────────────────────────────────

    /// Insert a notification unless one with the same dedupe key exists.
    pub fn create_notification(&self, msg: &NotificationMessage) -> Result<Option<Notification>> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO notifications (title, message, kind, link, dedupe_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    msg.title,
                    msg.message,
                    msg.kind.as_str(),
                    msg.link,
                    msg.dedupe_key()
                ],
            )
            .context("Failed to insert notification")?;
        if inserted == 0 {
            return Ok(None);
        }
        let id = self.conn.last_insert_rowid();
        let notification = self
            .conn
            .query_row(
                "SELECT id, title, message, kind, link, created_at FROM notifications WHERE id = ?1",
                params![id],
                read_notification_row,
            )
            .context("Notification not found after insert")?;
        notification.into_notification().map(Some)
    }

    pub fn list_notifications(&self) -> Result<Vec<Notification>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, message, kind, link, created_at FROM notifications ORDER BY id DESC",
            )
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map([], read_notification_row)
            .context("Failed to query notifications")?;
        let mut notifications = Vec::new();
        for row in rows {
            let r = row.context("Failed to read notification row")?;
            notifications.push(r.into_notification()?);
        }
        Ok(notifications)
    }
}

fn read_manual_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ManualRun> {
    Ok(ManualRun {
        id: row.get(0)?,
        application_id: row.get(1)?,
        report_date: row.get(2)?,
        triggered_by: row.get(3)?,
        status: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn read_tracked_pull_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedPullRequest> {
    Ok(TrackedPullRequest {
        id: row.get(0)?,
        repository: row.get(1)?,
        pull_request_number: row.get(2)?,
        title: row.get(3)?,
        author: row.get(4)?,
        created_at: row.get(5)?,
    })
}

struct NotificationRow {
    id: i64,
    title: String,
    message: String,
    kind: String,
    link: Option<String>,
    created_at: String,
}

impl NotificationRow {
    fn into_notification(self) -> Result<Notification> {
        let kind: NotificationKind = self.kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        Ok(Notification {
            id: self.id,
            title: self.title,
            message: self.message,
            kind,
            link: self.link,
            created_at: self.created_at,
        })
    }
}

fn read_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        kind: row.get(3)?,
        link: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(application_id: i64, passed: i64, failed: i64) -> NewReportDetail {
        NewReportDetail {
            application_id,
            total_runs: passed + failed,
            passed_runs: passed,
            failed_runs: failed,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = ReportDb::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_open_on_disk_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testboard.db");
        {
            let db = ReportDb::new(&path).unwrap();
            db.create_pending_summary("2025-10-09").unwrap();
        }
        let reopened = ReportDb::new(&path).unwrap();
        assert!(reopened.get_summary_by_date("2025-10-09").unwrap().is_some());
    }

    #[test]
    fn test_missing_summary_is_none() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.get_summary_by_date("2025-10-09").unwrap().is_none());
    }

    #[test]
    fn test_create_pending_summary_once_per_date() {
        let db = ReportDb::new_in_memory().unwrap();
        let first = db.create_pending_summary("2025-10-09").unwrap().unwrap();
        assert_eq!(first.status, ReportStatus::Pending);
        assert_eq!(first.message.as_deref(), Some(PENDING_MESSAGE));

        assert!(db.create_pending_summary("2025-10-09").unwrap().is_none());
        assert!(db.create_pending_summary("2025-10-10").unwrap().is_some());
    }

    #[test]
    fn test_complete_summary_writes_totals_and_details() {
        let db = ReportDb::new_in_memory().unwrap();
        db.create_pending_summary("2025-10-09").unwrap();
        let details = vec![detail(1, 5, 1), detail(2, 3, 1)];
        let totals = ReportTotals::from_details(&details);

        let summary = db
            .complete_summary("2025-10-09", totals, Some("done"), &details)
            .unwrap();

        assert_eq!(summary.status, ReportStatus::Ready);
        assert_eq!(summary.total_runs, 10);
        assert_eq!(summary.passed_runs, 8);
        assert_eq!(summary.failed_runs, 2);
        assert!((summary.success_rate - 0.8).abs() < f64::EPSILON);
        let rows = db.list_details(summary.id.unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].application_id, 1);
    }

    #[test]
    fn test_complete_summary_requires_pending_row() {
        let db = ReportDb::new_in_memory().unwrap();
        let totals = ReportTotals::from_details(&[]);
        assert!(db.complete_summary("2025-10-09", totals, None, &[]).is_err());

        db.create_pending_summary("2025-10-09").unwrap();
        db.complete_summary("2025-10-09", totals, None, &[]).unwrap();
        // Already ready: never goes back through completion.
        assert!(db.complete_summary("2025-10-09", totals, None, &[]).is_err());
    }

    #[test]
    fn test_totals_with_no_runs() {
        let totals = ReportTotals::from_details(&[]);
        assert_eq!(totals.total_runs, 0);
        assert_eq!(totals.success_rate, 0.0);
    }

    #[test]
    fn test_delete_summary_cascades_to_details() {
        let db = ReportDb::new_in_memory().unwrap();
        db.create_pending_summary("2025-10-09").unwrap();
        let details = vec![detail(1, 2, 0)];
        let summary = db
            .complete_summary("2025-10-09", ReportTotals::from_details(&details), None, &details)
            .unwrap();
        assert_eq!(db.count_details().unwrap(), 1);

        assert!(db.delete_summary(summary.id.unwrap()).unwrap());
        assert!(db.get_summary_by_date("2025-10-09").unwrap().is_none());
        assert_eq!(db.count_details().unwrap(), 0);
        assert!(!db.delete_summary(summary.id.unwrap()).unwrap());
    }

    #[test]
    fn test_claim_blocks_within_ttl() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.claim_generation("2025-10-09", "a", 1_000, 600, false).unwrap());
        assert!(!db.claim_generation("2025-10-09", "b", 1_100, 600, false).unwrap());
        // A different date is independent.
        assert!(db.claim_generation("2025-10-10", "c", 1_100, 600, false).unwrap());
    }

    #[test]
    fn test_claim_expires_after_ttl() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.claim_generation("2025-10-09", "a", 1_000, 600, false).unwrap());
        assert!(db.claim_generation("2025-10-09", "b", 1_600, 600, false).unwrap());
    }

    #[test]
    fn test_claim_force_overrides_live_claim() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.claim_generation("2025-10-09", "a", 1_000, 600, false).unwrap());
        assert!(db.claim_generation("2025-10-09", "b", 1_001, 600, true).unwrap());
    }

    #[test]
    fn test_release_claim_allows_new_claim() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.claim_generation("2025-10-09", "a", 1_000, 600, false).unwrap());
        db.release_claim("2025-10-09").unwrap();
        assert!(db.claim_generation("2025-10-09", "b", 1_001, 600, false).unwrap());
    }

    #[test]
    fn test_claim_with_unbounded_ttl_never_expires() {
        let db = ReportDb::new_in_memory().unwrap();
        assert!(db.claim_generation("2025-10-09", "a", 1_000, i64::MAX, false).unwrap());
        assert!(!db.claim_generation("2025-10-09", "b", i64::MAX, i64::MAX, false).unwrap());
    }

    #[test]
    fn test_get_applications_skips_unknown_ids() {
        let db = ReportDb::new_in_memory().unwrap();
        let web = db
            .create_application("web", Some("Web"), Some("frontend"), Some("acme/web"))
            .unwrap();
        let apps = db.get_applications(&[web.id, 999]).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[&web.id].display_name.as_deref(), Some("Web"));
        assert!(db.get_applications(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_manual_runs_filtered_by_date() {
        let db = ReportDb::new_in_memory().unwrap();
        db.create_manual_run(1, "2025-10-09", "alice", "passed", None)
            .unwrap();
        db.create_manual_run(1, "2025-10-10", "bob", "failed", Some("flaky"))
            .unwrap();
        let runs = db.list_manual_runs_for_date("2025-10-09").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, "alice");
    }

    #[test]
    fn test_track_pull_request_is_idempotent() {
        let db = ReportDb::new_in_memory().unwrap();
        let a = db
            .track_pull_request("acme/web", 42, "Add login", Some("octocat"))
            .unwrap();
        let b = db
            .track_pull_request("acme/web", 42, "Add login", Some("octocat"))
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(db.list_tracked_pull_requests().unwrap().len(), 1);

        assert!(db.delete_tracked_pull_request(a.id).unwrap());
        assert!(!db.delete_tracked_pull_request(a.id).unwrap());
    }

    #[test]
    fn test_create_notification_dedupes() {
        let db = ReportDb::new_in_memory().unwrap();
        let msg = NotificationMessage {
            title: "Stale pull request".to_string(),
            message: "acme/web#42 open for 20 days".to_string(),
            kind: NotificationKind::Warning,
            link: None,
        };
        let created = db.create_notification(&msg).unwrap().unwrap();
        assert_eq!(created.kind, NotificationKind::Warning);
        assert!(db.create_notification(&msg).unwrap().is_none());
        assert_eq!(db.list_notifications().unwrap().len(), 1);
    }
}
