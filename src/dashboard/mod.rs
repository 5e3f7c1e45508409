//! Test-report dashboard back-end.
//!
//! ## Overview
//!
//! Clients ask for a daily E2E report that may not exist yet. The query
//! service answers immediately: a cached report when it is ready, a pending
//! placeholder otherwise. An absent report is requested from the generator
//! over the message channel and the client polls until it is ready.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  poll   ┌──────────────────────────────────────────────────┐
//! │  poller  │ ──────> │  server.rs  (axum Router, Services)              │
//! │ (client) │ <────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ 200/202 │         │                                        │
//!                      │         │ ReportQueryService::get_report()       │
//!                      │         v                                        │
//!                      │  query.rs  (per-date lock, generation claims)    │
//!                      │         │                                        │
//!                      │         │ GenerationDispatcher (if absent/force) │
//!                      │         v                                        │
//!                      │  channel.rs  e2e:report:generate                 │
//!                      │         │                                        │
//!                      │         v                                        │
//!                      │  consumer.rs  (ReportGenerator) ──> db.rs        │
//!                      └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Shared types and wire shapes of channel messages        |
//! | `db`          | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)     |
//! | `dispatch`    | Publishes `{date, requestId}` generation requests       |
//! | `subscribers` | Topic loops plus the PR-delete and notification sinks   |
//! | `coordinator` | Scheduled pull-request housekeeping job                 |
//! | `github`      | GitHub REST client (explicitly constructed)             |
//! | `retry`       | `(attempt, error) -> delay \| stop` policy for HTTP     |
//!
//! ## Typical Request Flow (absent report)
//!
//! 1. `GET /api/e2e-reports?date=2025-10-09` → `api::get_report()`
//! 2. The query service takes the date's lock, finds no summary, records a
//!    generation claim and publishes one request. The client gets 202.
//! 3. The generator writes the pending summary, computes, and moves it to
//!    ready with one detail row per application.
//! 4. The client's next poll gets 200 with the summary; nothing is published.

pub mod api;
pub mod channel;
pub mod consumer;
pub mod coordinator;
pub mod db;
pub mod dispatch;
pub mod github;
pub mod models;
pub mod poller;
pub mod query;
pub mod retry;
pub mod server;
pub mod subscribers;
