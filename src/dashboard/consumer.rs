//! Report generator: the consumer side of `e2e:report:generate`.
//!
//! On a request it writes the pending summary, computes the report and moves
//! the summary to ready with its detail rows. A request for a date that
//! already has a summary (pending or ready) is ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::db::{DbHandle, ReportTotals};
use super::models::{GenerationRequest, NewReportDetail};
use super::query::parse_report_date;
use super::subscribers::MessageHandler;

/// Output of a report computation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputedReport {
    pub details: Vec<NewReportDetail>,
    pub message: Option<String>,
}

/// Computes per-application run counts for a date.
#[async_trait]
pub trait ReportComputer: Send + Sync {
    async fn compute(&self, date: &str) -> anyhow::Result<ComputedReport>;
}

/// Builds a report from the manual runs recorded for the date.
pub struct StoredRunsComputer {
    db: DbHandle,
}

impl StoredRunsComputer {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReportComputer for StoredRunsComputer {
    async fn compute(&self, date: &str) -> anyhow::Result<ComputedReport> {
        let key = date.to_string();
        let runs = self
            .db
            .call(move |db| db.list_manual_runs_for_date(&key))
            .await?;

        let mut per_app: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
        for run in &runs {
            let counts = per_app.entry(run.application_id).or_default();
            match run.status.as_str() {
                "passed" => counts.0 += 1,
                "failed" => counts.1 += 1,
                _ => {}
            }
        }

        let details = per_app
            .into_iter()
            .map(|(application_id, (passed, failed))| NewReportDetail {
                application_id,
                total_runs: passed + failed,
                passed_runs: passed,
                failed_runs: failed,
            })
            .collect();
        Ok(ComputedReport {
            details,
            message: Some(format!("Generated from {} recorded runs", runs.len())),
        })
    }
}

pub struct ReportGenerator {
    db: DbHandle,
    computer: Arc<dyn ReportComputer>,
}

impl ReportGenerator {
    pub fn new(db: DbHandle, computer: Arc<dyn ReportComputer>) -> Self {
        Self { db, computer }
    }

    /// Process one request. Returns `false` when it was a duplicate.
    pub async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<bool> {
        let date = parse_report_date(&request.date)?
            .format("%Y-%m-%d")
            .to_string();
        let request_id = request.request_id.as_deref().unwrap_or("-");

        let key = date.clone();
        let created = self
            .db
            .call(move |db| db.create_pending_summary(&key))
            .await?;
        if created.is_none() {
            tracing::debug!(date = %date, request_id, "Summary already exists; ignoring duplicate request");
            return Ok(false);
        }
        tracing::info!(date = %date, request_id, "Generating report");

        let computed = match self.computer.compute(&date).await {
            Ok(c) => c,
            Err(e) => {
                self.abandon(&date).await?;
                return Err(e.context(format!("Report computation failed for {}", date)));
            }
        };

        let totals = ReportTotals::from_details(&computed.details);
        let key = date.clone();
        let completed = self
            .db
            .call(move |db| {
                let summary = db.complete_summary(
                    &key,
                    totals,
                    computed.message.as_deref(),
                    &computed.details,
                )?;
                db.release_claim(&key)?;
                Ok(summary)
            })
            .await;
        let summary = match completed {
            Ok(summary) => summary,
            Err(e) => {
                self.abandon(&date).await?;
                return Err(e.context(format!("Failed to store report for {}", date)));
            }
        };

        tracing::info!(
            date = %date,
            request_id,
            total_runs = summary.total_runs,
            success_rate = summary.success_rate,
            "Report ready"
        );
        Ok(true)
    }

    /// Drop the pending row and the dispatch claim so the next read
    /// re-triggers generation.
    async fn abandon(&self, date: &str) -> anyhow::Result<()> {
        let key = date.to_string();
        self.db
            .call(move |db| {
                if let Some(id) = db.get_summary_by_date(&key)?.and_then(|s| s.id) {
                    db.delete_summary(id)?;
                }
                db.release_claim(&key)
            })
            .await
    }
}

#[async_trait]
impl MessageHandler for ReportGenerator {
    fn name(&self) -> &'static str {
        "report-generator"
    }

    async fn handle(&self, payload: &str) -> anyhow::Result<()> {
        let request: GenerationRequest = serde_json::from_str(payload)?;
        self.generate(&request).await.map(|_| ())
    }
}
