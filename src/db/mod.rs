//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into domain records.
//!
//! Callers import from `ingest_worker::db`; the repository API and the view
//! models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{EligibleSource, LatestFetched, WorkerStatus};
