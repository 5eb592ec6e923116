//! Benchmark harness core for pgvector.
//!
//! - [`filter`]: backend-neutral filter trees and their lowering to SQL
//! - [`distance`]: metric operators and score normalization
//! - [`clients`]: configurator, upload and search clients
//! - [`report`]: tabulation of benchmark result files

pub mod capabilities;
pub mod clients;
pub mod config;
pub mod distance;
pub mod filter;
pub mod observability;
#[cfg(feature = "csv-export")]
pub mod report;
