//! Persistent storage for benchmarks, test cases and evaluation reports.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **DocumentStore**: versioned JSON documents with compare-and-swap
//! - **MemoryStore** / **SqliteStore**: the two backends
//! - **EvalStore**: typed facade doing targeted updates with retry-on-conflict
//!
//! # Usage
//!
//! ```rust,ignore
//! use bench_forge::storage::{EvalStore, SqliteStore};
//! use std::sync::Arc;
//!
//! let backend = SqliteStore::open("sqlite://bench-forge.db").await?;
//! let store = EvalStore::new(Arc::new(backend)).with_max_conflict_retries(10);
//!
//! store
//!     .record_result(&benchmark_id, &run_id, &test_case_id, &result)
//!     .await?;
//! ```

pub mod document;
pub mod memory;
pub mod repository;
pub mod sqlite;

pub use document::{DocumentStore, StoreError, StoredDocument};
pub use memory::MemoryStore;
pub use repository::{EvalStore, BENCHMARKS, DEFAULT_MAX_CONFLICT_RETRIES, REPORTS, TEST_CASES};
pub use sqlite::SqliteStore;
