//! Docker implementation of the container capability layer.
//!
//! Talks to an already-running container through the daemon API: exec with
//! captured streams, file copy-in via an in-memory tar archive, live stats,
//! and resource reconfiguration. Containers are never created or removed
//! here; provisioning is the host's job.

use bollard::container::{
    InspectContainerOptions, StatsOptions, UpdateContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::debug;

use super::{command, ContainerApi, ContainerError, ContainerStats, ExecOutput, ResourceLimits};

/// Adapter handle for one running Docker container.
pub struct DockerContainer {
    docker: Docker,
    name: String,
}

impl DockerContainer {
    /// Connects to the local Docker daemon and verifies the named container
    /// exists. Fails with [`ContainerError::Unreachable`] if the daemon does
    /// not respond and [`ContainerError::NotFound`] if the container is
    /// unknown.
    pub async fn connect(name: &str) -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| ContainerError::unreachable(err.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|err| ContainerError::unreachable(err.to_string()))?;

        let container = Self {
            docker,
            name: name.to_string(),
        };

        container
            .docker
            .inspect_container(&container.name, None::<InspectContainerOptions>)
            .await
            .map_err(|err| container.map_api_error(err))?;

        debug!("Connected to container {}", container.name);
        Ok(container)
    }

    /// Maps a daemon API error onto the adapter taxonomy: HTTP 404 means the
    /// container is gone, anything else means the runtime is unusable.
    fn map_api_error(&self, err: bollard::errors::Error) -> ContainerError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ContainerError::not_found(&self.name),
            other => ContainerError::unreachable(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl ContainerApi for DockerContainer {
    async fn exec(
        &self,
        cmd: &[String],
        workdir: Option<&str>,
    ) -> Result<ExecOutput, ContainerError> {
        let exec = self
            .docker
            .create_exec(
                &self.name,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    working_dir: workdir.map(str::to_string),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| self.map_api_error(err))?;

        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|err| self.map_api_error(err))?
        {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.extend_from_slice(&message);
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.extend_from_slice(&message);
                        }
                        Ok(_) => {}
                        Err(err) => return Err(self.map_api_error(err)),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|err| self.map_api_error(err))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: inspect.exit_code.unwrap_or(0),
        })
    }

    async fn copy_in(&self, bytes: &[u8], dest_path: &str) -> Result<(), ContainerError> {
        let (dir, file_name) = dest_path.rsplit_once('/').ok_or_else(|| {
            ContainerError::exec_failed(format!("destination is not an absolute path: {dest_path}"))
        })?;
        let dir = if dir.is_empty() { "/" } else { dir };

        // The upload endpoint only accepts tar archives, so wrap the blob
        // in a single-entry archive built in memory.
        let mut archive = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        archive
            .append_data(&mut header, file_name, bytes)
            .map_err(|err| ContainerError::exec_failed(format!("failed to build archive: {err}")))?;
        let tar_bytes = Bytes::from(archive.into_inner().map_err(|err| {
            ContainerError::exec_failed(format!("failed to finalize archive: {err}"))
        })?);

        self.docker
            .upload_to_container(
                &self.name,
                Some(UploadToContainerOptions {
                    path: dir.to_string(),
                    ..Default::default()
                }),
                tar_bytes.into(),
            )
            .await
            .map_err(|err| self.map_api_error(err))?;

        debug!("Copied {} bytes to {}:{}", bytes.len(), self.name, dest_path);
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), ContainerError> {
        // rm -f so a file that is already gone is not an error.
        let output = self
            .exec(&command(["rm", "-f", path]), None)
            .await?;
        if !output.success() {
            return Err(ContainerError::exec_failed(format!(
                "rm -f {path} exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn reconfigure(&self, limits: &ResourceLimits) -> Result<(), ContainerError> {
        self.docker
            .update_container(
                &self.name,
                UpdateContainerOptions::<String> {
                    cpu_quota: Some(limits.cpu_quota),
                    memory: Some(limits.memory_bytes),
                    memory_swap: Some(limits.memswap_bytes),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| self.map_api_error(err))?;

        debug!(
            "Applied limits to {}: cpu_quota={} memory={} memswap={}",
            self.name, limits.cpu_quota, limits.memory_bytes, limits.memswap_bytes
        );
        Ok(())
    }

    async fn stats(&self) -> Result<ContainerStats, ContainerError> {
        let mut stream = self.docker.stats(
            &self.name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );

        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(err)) => return Err(self.map_api_error(err)),
            None => {
                return Err(ContainerError::exec_failed(
                    "stats stream ended without a sample",
                ))
            }
        };

        let cpu_usage_pct = cpu_usage_pct(
            stats.cpu_stats.cpu_usage.total_usage,
            stats.precpu_stats.cpu_usage.total_usage,
            stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            stats.cpu_stats.online_cpus.unwrap_or(1),
        );

        Ok(ContainerStats {
            cpu_usage_pct,
            mem_used: stats.memory_stats.usage.unwrap_or(0),
            mem_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}

/// Computes CPU usage the way the Docker CLI does: the container's share of
/// the system CPU delta between the two samples, scaled by the core count.
fn cpu_usage_pct(
    cpu_total: u64,
    precpu_total: u64,
    system_total: u64,
    presystem_total: u64,
    online_cpus: u64,
) -> f64 {
    let cpu_delta = cpu_total.saturating_sub(precpu_total);
    let system_delta = system_total.saturating_sub(presystem_total);

    if system_delta == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)] // Counters fit f64 precision in practice
    let pct = (cpu_delta as f64 / system_delta as f64) * online_cpus.max(1) as f64 * 100.0;
    pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_nonexistent_container() {
        // Requires a reachable daemon; skip otherwise.
        let Ok(docker) = Docker::connect_with_local_defaults() else {
            return;
        };
        if docker.ping().await.is_err() {
            return;
        }

        let result = DockerContainer::connect("agentrun-does-not-exist-xyz").await;
        match result {
            Err(err) => assert!(err.is_not_found(), "unexpected error: {err}"),
            Ok(_) => panic!("connect to a nonexistent container should fail"),
        }
    }

    #[test]
    fn test_cpu_usage_pct_zero_system_delta() {
        assert_eq!(cpu_usage_pct(200, 100, 500, 500, 4), 0.0);
        assert_eq!(cpu_usage_pct(100, 100, 0, 0, 4), 0.0);
    }

    #[test]
    fn test_cpu_usage_pct_half_of_one_core() {
        // Container consumed half the system delta on a single core.
        let pct = cpu_usage_pct(1_500, 1_000, 2_000, 1_000, 1);
        assert!((pct - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_usage_pct_scales_with_core_count() {
        let pct = cpu_usage_pct(1_500, 1_000, 2_000, 1_000, 4);
        assert!((pct - 200.0).abs() < f64::EPSILON);
    }
}
