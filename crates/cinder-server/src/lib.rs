//! cinder-server: the readiness-driven pipeline server.
//!
//! Accepted connections move through read, parse+execute, and write
//! stages, each backed by its own worker pool, with a dedicated accept
//! thread and a kernel-readiness thread feeding the pipeline. Commands
//! run against the partitioned store from `cinder-store`.

pub mod config;
pub mod connection;
mod jobs;
pub mod orchestrator;
pub mod pool;
mod sync;

pub use config::ServerConfig;
pub use orchestrator::Orchestrator;
pub use pool::{Job, PoolError, WorkerPool};
