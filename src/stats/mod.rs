//! Run statistics.
//!
//! Stats are a derived projection of a run's results and the reports they
//! reference; they are always regenerated, never edited by hand.

pub mod aggregator;
pub mod service;

pub use aggregator::{compute_stats, needs_backfill};
pub use service::StatsService;
