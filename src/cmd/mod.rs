//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`, `InitDb`                                  |
//! | `report`        | `Report`, `Watch`                                  |
//! | `pulls`         | `Coordinate`, `TrackPr`                            |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod pulls;
pub mod report;
pub mod serve;

pub use config::cmd_config;
pub use pulls::{cmd_coordinate, cmd_track_pr};
pub use report::{cmd_report, cmd_watch};
pub use serve::{cmd_init_db, cmd_serve};
