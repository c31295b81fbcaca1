// Reproduces a provisioning race in managed SQL database services: a freshly
// created database can be reported as nonexistent for a long time, especially
// when many databases are created concurrently. Each trial owns a uniquely
// named database, so trials never contend with each other and a run can be
// repeated against the same server.

pub mod classify;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod observe;
pub mod orchestrator;
pub mod retry;
pub mod service;

pub use metrics::*;

pub type Result<T> = std::result::Result<T, error::ServiceError>;
