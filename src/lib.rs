//! nestflux - Session and rate statistics for fixed-interval nest surveys
//!
//! nestflux turns a raw table of 3-minute field scans into effort-corrected
//! nest-building statistics through a deterministic pipeline: load → sessionize
//! → summarize → biweekly aggregation → rates and Poisson intervals, with an
//! independent period aggregation over the raw scans.
//!
//! ## Modules
//!
//! - **Session pipeline**: time-gap sessions, counter repair, per-session counts
//! - **Aggregation**: biweekly windows, whole-table statistics, period bins

pub mod biweekly;
pub mod config;
pub mod error;
pub mod period;
pub mod pipeline;
pub mod qc;
pub mod schema;
pub mod sessionizer;
pub mod stats;
pub mod summarizer;
pub mod table;
pub mod types;

pub use config::{PeriodConfig, PeriodWidth, SexFilterScope, SurveyConfig};
pub use error::ComputeError;
pub use pipeline::{
    periods_from_rows, run_survey, stats_from_session_table, SurveyOutput, SurveyProcessor,
};
pub use stats::{poisson_ci, rate_per_100hr};
pub use table::{format_records, OutputFormat, Record};

// Schema exports
pub use schema::{parse_array, parse_ndjson, RawRow, ScanLoader, SCHEMA_VERSION};

/// nestflux version recorded in every run manifest
pub const NESTFLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run manifests
pub const PRODUCER_NAME: &str = "nestflux";
