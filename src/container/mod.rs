//! Capability layer over an already-running container.
//!
//! Everything the execution pipeline needs from the container runtime is
//! expressed as the [`ContainerApi`] trait: run a command, copy a file in,
//! delete a path, push resource limits, read utilization. The rest of the
//! crate never talks to Docker directly.

mod docker;
mod error;
pub mod mock;

pub use docker::DockerContainer;
pub use error::ContainerError;

use async_trait::async_trait;

/// Captured result of one command run inside the container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Decoded stdout (UTF-8, lossy).
    pub stdout: String,
    /// Decoded stderr (UTF-8, lossy).
    pub stderr: String,
    /// Process exit code.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Resource limits applied to the container.
///
/// Produced by [`crate::config::RunnerConfig::validate`], which guarantees
/// every field is positive and `memswap_bytes >= memory_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU time in microseconds per 100ms scheduling period.
    pub cpu_quota: i64,
    /// RAM ceiling in bytes.
    pub memory_bytes: i64,
    /// Combined RAM + swap ceiling in bytes.
    pub memswap_bytes: i64,
}

/// Point-in-time utilization snapshot of the container.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStats {
    /// CPU usage as a percentage of the available CPU time.
    pub cpu_usage_pct: f64,
    /// Memory currently in use, in bytes.
    pub mem_used: u64,
    /// Memory limit the container runs under, in bytes (0 if unknown).
    pub mem_limit: u64,
}

/// Operations the execution pipeline requires from a container runtime.
///
/// Implementations: [`DockerContainer`] for a real daemon and
/// [`mock::MockContainer`] for tests.
#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Runs a command synchronously inside the container and captures both
    /// output streams and the exit code. A non-zero exit is reported through
    /// [`ExecOutput::exit_code`], not as an error.
    async fn exec(&self, cmd: &[String], workdir: Option<&str>)
        -> Result<ExecOutput, ContainerError>;

    /// Places a byte blob at `dest_path` inside the container. The
    /// destination directory is assumed writable.
    async fn copy_in(&self, bytes: &[u8], dest_path: &str) -> Result<(), ContainerError>;

    /// Deletes a file inside the container. A missing file is not an error.
    async fn remove_path(&self, path: &str) -> Result<(), ContainerError>;

    /// Applies resource limits to the running container.
    async fn reconfigure(&self, limits: &ResourceLimits) -> Result<(), ContainerError>;

    /// Reads current CPU and memory utilization.
    async fn stats(&self) -> Result<ContainerStats, ContainerError>;
}

/// Convenience for building an owned command vector from string literals.
pub(crate) fn command<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}
