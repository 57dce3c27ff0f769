//! Setlist Sync Library
//!
//! Pushes yearly setlist source files into the raw sink through the ingestion
//! function, and reconciles source / raw / derived tiers per year.
//!
//! - **fetch**: paginated, total-bounded reads
//! - **ingest**: batch submission with retry and failure bisection
//! - **reconcile**: per-year set differences across the three tiers

pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod models;
pub mod reconcile;
pub mod rest;
pub mod source;

// Re-exports for convenient access
pub use config::{Config, Credential};
pub use error::{Result, SyncError};
pub use fetch::{fetch_all, fetch_distinct_ids, Page, PageRange, PageSource, RowQuery, TableRef};
pub use ingest::{ingest, BatchSink, IngestPolicy};
pub use models::{IdSet, IngestOutcome, Record};
pub use reconcile::{ReconciliationReport, Reconciler, TierSpec, YearReconciliation};
pub use rest::RestClient;
