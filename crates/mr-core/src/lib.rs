//! # mr-core
//!
//! Supervision engine behind `mr`: runs a fixed set of configured jobs side by
//! side, probes their health, keeps a live registry of the healthy ones and
//! restarts or drains them on request.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mr_core::{JobConfig, JobManager, JobSpec, OutputHub};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut web = JobSpec::new("web", "python3");
//! web.args = vec!["-m".into(), "http.server".into()];
//!
//! let config = JobConfig::new("mr.toml").with_job(web);
//! let manager = JobManager::new(config, OutputHub::stdout(), &CancellationToken::new());
//! manager.start_jobs();
//!
//! manager.wait_terminate(mr_core::signal::wait_for_shutdown_signal()).await;
//! # }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod health;
pub mod manager;
pub mod output;
pub mod registry;
pub mod runner;
pub mod signal;
pub mod supervisor;
pub mod types;

pub use config::JobConfig;
pub use error::JobError;
pub use health::HealthCheck;
pub use manager::JobManager;
pub use output::{JobOutput, OutputHub};
pub use registry::LiveRegistry;
pub use runner::{ProcessRunner, Runner};
pub use supervisor::{JobScope, RunningJob};
pub use types::*;
