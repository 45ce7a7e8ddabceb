//! Run untrusted Python snippets in an isolated Docker container.
//!
//! The pipeline for one snippet: host-side safety screening, static import
//! discovery, whitelist enforcement, an admission gate on live container
//! utilization, transactional pip installs, bounded execution, and
//! guaranteed cleanup of every artifact the run created.
//!
//! ```no_run
//! use agentrun::{AgentRun, RunnerConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = AgentRun::new(RunnerConfig::new("my_container")).await?;
//! let output = runner.execute("print('Hello, world!')").await?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod imports;
pub mod runner;
pub mod screen;
pub mod server;

mod deps;
mod executor;
mod governor;

pub use config::RunnerConfig;
pub use runner::AgentRun;
