//! Download orchestration engine.
//!
//! Turns submitted (source, query) jobs into per-file tasks through lazy
//! adapter pagination, and drains them through a fixed pool of workers:
//! rate-limit admission, proxy selection, fetch, blacklist check, write,
//! progress report. Per-task failures never take down a job; cancelling
//! one job never disturbs another.

mod paths;
mod runner;
mod types;
mod worker;

pub use paths::sanitize_filename;
pub use runner::DownloadEngine;
pub use types::{EngineError, EngineStatus, JobInfo, JobQuery, JobSpec};
