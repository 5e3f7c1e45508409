//! Report read path.
//!
//! Decides between serving a cached report, reporting an in-progress one,
//! and asking the generator for a new one. The caller never waits on the
//! generator: an absent report is answered with a pending placeholder and a
//! single generation request goes out on the channel.
//!
//! Concurrent readers of the same absent date are serialized per date and a
//! generation claim is recorded before publishing, so only the first of them
//! dispatches. With `dedupe_dispatch` off every reader dispatches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::db::DbHandle;
use super::dispatch::GenerationDispatcher;
use super::models::*;
use crate::errors::ReportError;

/// Tuning for the query service.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub dedupe_dispatch: bool,
    /// How long a dispatched-but-unanswered request blocks re-dispatch. Also
    /// the age after which a pending summary is reported as stale.
    pub claim_ttl: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            dedupe_dispatch: true,
            claim_ttl: Duration::from_secs(600),
        }
    }
}

/// A validated report request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRequest {
    pub date: NaiveDate,
    pub enrichments: Enrichments,
    pub force: bool,
}

impl ReportRequest {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            enrichments: Enrichments::default(),
            force: false,
        }
    }

    /// Validate raw query inputs. Nothing is read or written here, so a
    /// rejected request has no side effects.
    pub fn parse(
        date: Option<&str>,
        enrichments: Option<&str>,
        force: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, ReportError> {
        let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => parse_report_date(raw)?,
            None => today,
        };
        let enrichments = match enrichments {
            Some(raw) => {
                Enrichments::parse(raw).map_err(|e| ReportError::validation("enrichments", e))?
            }
            None => Enrichments::default(),
        };
        Ok(Self {
            date,
            enrichments,
            force: force.is_some_and(is_truthy),
        })
    }
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_report_date(raw: &str) -> Result<NaiveDate, ReportError> {
    let well_formed = raw.len() == 10
        && raw
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !well_formed {
        return Err(ReportError::validation(
            "date",
            format!("'{}' is not in YYYY-MM-DD format", raw),
        ));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ReportError::validation("date", format!("'{}' is not a valid calendar date", raw))
    })
}

fn is_truthy(raw: &str) -> bool {
    let raw = raw.trim();
    raw == "1" || raw.eq_ignore_ascii_case("true")
}

/// Result of a report query.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The report is not ready. `triggered` is true when this call published
    /// the generation request.
    Pending {
        summary: ReportSummary,
        triggered: bool,
    },
    Ready {
        summary: ReportSummary,
        details: Option<Vec<DetailView>>,
    },
}

impl ReportOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReportOutcome::Pending { .. })
    }

    pub fn summary(&self) -> &ReportSummary {
        match self {
            ReportOutcome::Pending { summary, .. } | ReportOutcome::Ready { summary, .. } => {
                summary
            }
        }
    }

    pub fn into_payload(self) -> ReportResponse {
        match self {
            ReportOutcome::Pending { summary, .. } => ReportResponse {
                success: true,
                summary,
                details: Some(Vec::new()),
                message: Some(PENDING_MESSAGE.to_string()),
            },
            ReportOutcome::Ready { summary, details } => ReportResponse {
                success: true,
                summary,
                details,
                message: None,
            },
        }
    }
}

/// JSON body of the report endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportResponse {
    pub success: bool,
    pub summary: ReportSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<DetailView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-date async locks serializing check-and-dispatch.
#[derive(Clone, Default)]
struct DateLockMap {
    locks: Arc<Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>>,
}

impl DateLockMap {
    async fn acquire(&self, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody is holding so the map stays small.
            locks.retain(|d, l| *d == date || Arc::strong_count(l) > 1);
            locks.entry(date).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct ReportQueryService {
    db: DbHandle,
    dispatcher: GenerationDispatcher,
    settings: QuerySettings,
    date_locks: DateLockMap,
}

impl ReportQueryService {
    pub fn new(db: DbHandle, dispatcher: GenerationDispatcher, settings: QuerySettings) -> Self {
        Self {
            db,
            dispatcher,
            settings,
            date_locks: DateLockMap::default(),
        }
    }

    pub async fn get_report(&self, request: ReportRequest) -> Result<ReportOutcome, ReportError> {
        let _guard = if self.settings.dedupe_dispatch {
            Some(self.date_locks.acquire(request.date).await)
        } else {
            None
        };

        let date = request.date.format("%Y-%m-%d").to_string();
        let key = date.clone();
        let existing = self
            .db
            .call(move |db| db.get_summary_by_date(&key))
            .await
            .map_err(ReportError::Infrastructure)?;

        if request.force {
            if let Some(summary) = existing {
                self.invalidate(&summary).await?;
            }
            return self.trigger(request.date, &date, true).await;
        }

        match existing {
            None => self.trigger(request.date, &date, false).await,
            Some(summary) if summary.is_pending() => {
                self.warn_if_stale(&summary);
                Ok(ReportOutcome::Pending {
                    summary,
                    triggered: false,
                })
            }
            Some(summary) => self.assemble_ready(summary, request.enrichments).await,
        }
    }

    /// Delete a summary (details cascade) ahead of a forced regeneration.
    async fn invalidate(&self, summary: &ReportSummary) -> Result<(), ReportError> {
        let Some(id) = summary.id else {
            return Ok(());
        };
        self.db
            .call(move |db| db.delete_summary(id))
            .await
            .map_err(ReportError::Infrastructure)?;
        tracing::info!(
            date = %summary.date,
            summary_id = id,
            previous_status = summary.status.as_str(),
            "Deleted report for forced regeneration"
        );
        Ok(())
    }

    async fn trigger(
        &self,
        date: NaiveDate,
        date_key: &str,
        force: bool,
    ) -> Result<ReportOutcome, ReportError> {
        let request_id = uuid::Uuid::new_v4().to_string();

        if self.settings.dedupe_dispatch {
            let key = date_key.to_string();
            let id = request_id.clone();
            let now = Utc::now().timestamp();
            let ttl = self.claim_ttl_secs();
            let claimed = self
                .db
                .call(move |db| db.claim_generation(&key, &id, now, ttl, force))
                .await
                .map_err(ReportError::Infrastructure)?;
            if !claimed {
                tracing::debug!(date = %date_key, "Generation already requested; not dispatching again");
                return Ok(ReportOutcome::Pending {
                    summary: ReportSummary::placeholder(date_key),
                    triggered: false,
                });
            }
        }

        match self
            .dispatcher
            .publish_generation_request(date, Some(request_id))
            .await
        {
            Ok(_) => Ok(ReportOutcome::Pending {
                summary: ReportSummary::placeholder(date_key),
                triggered: true,
            }),
            Err(e) => {
                if self.settings.dedupe_dispatch {
                    let key = date_key.to_string();
                    if let Err(release_err) = self.db.call(move |db| db.release_claim(&key)).await {
                        tracing::warn!(date = %date_key, "Failed to release generation claim: {:#}", release_err);
                    }
                }
                tracing::error!(date = %date_key, "Failed to publish generation request: {}", e);
                Err(ReportError::Publish(e))
            }
        }
    }

    /// Claim TTL in whole seconds, clamped so very large TTLs never wrap.
    fn claim_ttl_secs(&self) -> i64 {
        i64::try_from(self.settings.claim_ttl.as_secs()).unwrap_or(i64::MAX)
    }

    fn warn_if_stale(&self, summary: &ReportSummary) {
        let Some(updated_at) = summary.updated_at.as_deref() else {
            return;
        };
        let Ok(updated) = NaiveDateTime::parse_from_str(updated_at, "%Y-%m-%d %H:%M:%S") else {
            return;
        };
        let age = Utc::now().naive_utc() - updated;
        if age.num_seconds() > self.claim_ttl_secs() {
            tracing::warn!(
                date = %summary.date,
                pending_secs = age.num_seconds(),
                "Report has been pending longer than the claim TTL; the generator may have stalled"
            );
        }
    }

    async fn assemble_ready(
        &self,
        summary: ReportSummary,
        enrichments: Enrichments,
    ) -> Result<ReportOutcome, ReportError> {
        if !enrichments.include_details {
            return Ok(ReportOutcome::Ready {
                summary,
                details: None,
            });
        }
        let Some(summary_id) = summary.id else {
            return Ok(ReportOutcome::Ready {
                summary,
                details: Some(Vec::new()),
            });
        };

        let date = summary.date.clone();
        let (details, apps, runs) = self
            .db
            .call(move |db| {
                let details = db.list_details(summary_id)?;
                let ids: Vec<i64> = details.iter().map(|d| d.application_id).collect();
                let apps = db.get_applications(&ids)?;
                let runs = if enrichments.include_manual_runs {
                    db.list_manual_runs_for_date(&date)?
                } else {
                    Vec::new()
                };
                Ok((details, apps, runs))
            })
            .await
            .map_err(ReportError::Infrastructure)?;

        let mut views = Vec::with_capacity(details.len());
        for detail in details {
            let Some(app) = apps.get(&detail.application_id) else {
                tracing::debug!(
                    summary_id,
                    application_id = detail.application_id,
                    "Dropping detail row for unknown application"
                );
                continue;
            };
            let manual_runs = enrichments.include_manual_runs.then(|| {
                runs.iter()
                    .filter(|r| r.application_id == detail.application_id)
                    .cloned()
                    .collect()
            });
            views.push(DetailView {
                application: enrichments.include_app_info.then(|| app.clone()),
                manual_runs,
                detail,
            });
        }

        Ok(ReportOutcome::Ready {
            summary,
            details: Some(views),
        })
    }
}
