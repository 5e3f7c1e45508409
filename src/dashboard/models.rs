use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message returned alongside a pending report.
pub const PENDING_MESSAGE: &str = "Report is being generated...";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Ready,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            _ => Err(format!("Invalid report status: {}", s)),
        }
    }
}

/// Per-date aggregate of a daily E2E report.
///
/// `id` and the timestamps are `None` on the placeholder returned while a
/// report has been requested but the generator has not written a row yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: Option<i64>,
    pub date: String,
    pub status: ReportStatus,
    pub total_runs: i64,
    pub passed_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
    pub message: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ReportSummary {
    pub fn placeholder(date: &str) -> Self {
        Self {
            id: None,
            date: date.to_string(),
            status: ReportStatus::Pending,
            total_runs: 0,
            passed_runs: 0,
            failed_runs: 0,
            success_rate: 0.0,
            message: Some(PENDING_MESSAGE.to_string()),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReportStatus::Pending
    }
}

/// Intermediate row type for reading summaries from SQLite.
pub(crate) struct ReportSummaryRow {
    pub id: i64,
    pub date: String,
    pub status: String,
    pub total_runs: i64,
    pub passed_runs: i64,
    pub failed_runs: i64,
    pub success_rate: f64,
    pub message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReportSummaryRow {
    pub fn into_summary(self) -> anyhow::Result<ReportSummary> {
        let status = ReportStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        Ok(ReportSummary {
            id: Some(self.id),
            date: self.date,
            status,
            total_runs: self.total_runs,
            passed_runs: self.passed_runs,
            failed_runs: self.failed_runs,
            success_rate: self.success_rate,
            message: self.message,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        })
    }
}

/// Per-application breakdown row attached to a ready summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    pub id: i64,
    pub summary_id: i64,
    pub application_id: i64,
    pub total_runs: i64,
    pub passed_runs: i64,
    pub failed_runs: i64,
}

/// Detail row as written by the generator, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReportDetail {
    pub application_id: i64,
    pub total_runs: i64,
    pub passed_runs: i64,
    pub failed_runs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub team: Option<String>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualRun {
    pub id: i64,
    pub application_id: i64,
    pub report_date: String,
    pub triggered_by: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
}

/// A detail row as served to the dashboard, optionally enriched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailView {
    #[serde(flatten)]
    pub detail: ReportDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Application>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_runs: Option<Vec<ManualRun>>,
}

/// Optional enrichments of a report response.
///
/// Encoded on the wire as a JSON object, e.g.
/// `{"includeDetails":true,"includeAppInfo":true}`. Missing flags are false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Enrichments {
    #[serde(default)]
    pub include_details: bool,
    #[serde(default)]
    pub include_app_info: bool,
    #[serde(default)]
    pub include_manual_runs: bool,
}

impl Enrichments {
    /// Everything the dashboard's main view asks for.
    pub fn full() -> Self {
        Self {
            include_details: true,
            include_app_info: true,
            include_manual_runs: true,
        }
    }

    pub fn summary_only() -> Self {
        Self::default()
    }

    /// Parse the JSON-encoded query parameter.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| format!("not valid JSON: {}", e))?;
        if !value.is_object() {
            return Err("expected a JSON object".to_string());
        }
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    pub fn to_query_value(&self) -> String {
        // Serializing three bools cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Wire shape of the `e2e:report:generate` message.
///
/// `request_id` is always serialized (as `null` when absent) so consumers
/// see a stable shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub date: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Wire shape of the `pull-request:delete` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDeleteMessage {
    pub id: i64,
    pub pull_request_number: i64,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

/// Wire shape of the `notification:create` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMessage {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl NotificationMessage {
    /// Key used by the notification subscriber to ignore re-published messages.
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.title,
            self.message,
            self.link.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub created_at: String,
}

/// A pull request the dashboard keeps track of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPullRequest {
    pub id: i64,
    pub repository: String,
    pub pull_request_number: i64,
    pub title: String,
    pub author: Option<String>,
    pub created_at: String,
}

/// Live pull-request state as reported by GitHub (subset of fields).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestDetail {
    pub number: i64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub mergeable_state: Option<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<PullRequestAuthor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestAuthor {
    pub login: String,
}
