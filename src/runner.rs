//! The execution pipeline: screen, resolve dependencies, gate on capacity,
//! install, run, clean up.
//!
//! Every recoverable failure is converted into a diagnostic outcome string;
//! only an unreachable container runtime surfaces as an error to the
//! embedding application. On every exit path past the install step the
//! transient dependencies are released and the snippet file is gone.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::container::{ContainerApi, ContainerError, DockerContainer};
use crate::deps::DependencyManager;
use crate::executor::Executor;
use crate::governor::Governor;
use crate::{imports, screen};

pub use crate::executor::TIMEOUT_OUTCOME;

/// How often the capacity gate is polled while waiting for headroom.
pub const CAPACITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a run waits for headroom before giving up.
pub const CAPACITY_WAIT_LIMIT: Duration = Duration::from_secs(30);

/// Outcome when the capacity gate never opened.
pub const OVER_CAPACITY_OUTCOME: &str = "Container over capacity";

/// Outcome when a dependency install failed.
pub const INSTALL_FAILED_OUTCOME: &str = "Failed to install dependencies";

/// Executes untrusted Python snippets in an isolated, already-running
/// container.
///
/// Construction validates the configuration, applies the resource limits to
/// the container, and installs the cached dependencies; any of those
/// failing fails construction. Afterwards any number of [`execute`] calls
/// may run concurrently.
///
/// [`execute`]: AgentRun::execute
pub struct AgentRun {
    deps: DependencyManager,
    governor: Governor,
    executor: Executor,
}

impl AgentRun {
    /// Connects to the local Docker daemon and the configured container.
    pub async fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        let container = DockerContainer::connect(&config.container_name)
            .await
            .with_context(|| format!("cannot use container {:?}", config.container_name))?;
        Self::with_container(config, Arc::new(container)).await
    }

    /// Builds a runner on top of any container adapter. This is how tests
    /// inject [`crate::container::mock::MockContainer`].
    pub async fn with_container(
        config: RunnerConfig,
        container: Arc<dyn ContainerApi>,
    ) -> Result<Self> {
        let limits = config.validate()?;

        let governor = Governor::new(container.clone());
        governor
            .apply(&limits)
            .await
            .context("failed to apply resource limits to the container")?;

        let deps = DependencyManager::new(
            container.clone(),
            config.dependencies_whitelist.clone(),
            config.cached_dependencies.clone(),
        );
        deps.warm_cache()
            .await
            .context("failed to install cached dependencies")?;

        let executor = Executor::new(container, Duration::from_secs(config.default_timeout));

        info!(
            container = %config.container_name,
            timeout_secs = config.default_timeout,
            "Runner ready"
        );

        Ok(Self {
            deps,
            governor,
            executor,
        })
    }

    /// Runs one snippet through the full pipeline and returns its outcome:
    /// the program's stdout, its error trace, or one of the fixed
    /// diagnostic strings.
    ///
    /// Returns `Err` only when the container runtime itself is gone.
    pub async fn execute(&self, source: &str) -> Result<String> {
        if let Err(reason) = screen::check(source) {
            warn!(phase = "screen", kind = "unsafe_code", reason = %reason, "Rejected snippet");
            return Ok(reason);
        }

        let deps = imports::extract(source);
        debug!(phase = "deps_check", dependencies = ?deps, "Resolved imports");

        if let Err(package) = self.deps.ensure_allowed(&deps) {
            warn!(
                phase = "deps_check",
                kind = "dependency_blocked",
                package = %package,
                transient = ?deps,
                "Dependency not whitelisted"
            );
            return Ok(format!("Dependency not in whitelist: {package}"));
        }

        match self.wait_for_headroom().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    phase = "capacity",
                    kind = "capacity_exhausted",
                    transient = ?deps,
                    "Gave up waiting for container headroom"
                );
                return Ok(OVER_CAPACITY_OUTCOME.to_string());
            }
            Err(err) => return Err(self.fatal("capacity", &deps, err)),
        }

        let installed = match self.deps.install(&deps).await {
            Ok(installed) => installed,
            Err(err) if err.is_unreachable() => {
                return Err(anyhow::Error::new(err).context("container lost during install"));
            }
            Err(err) => {
                warn!(
                    phase = "install",
                    kind = "install_failed",
                    transient = ?deps,
                    error = %err,
                    "Dependency install failed"
                );
                return Ok(INSTALL_FAILED_OUTCOME.to_string());
            }
        };
        debug!(phase = "install", installed = ?installed, "Dependencies ready");

        // The executor owns snippet-file cleanup; dependency release below
        // must run no matter how the run went.
        let result = self.executor.run(source).await;

        self.deps.release(&deps).await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_unreachable() => Err(self.fatal("execute", &deps, err)),
            Err(err) => {
                warn!(
                    phase = "execute",
                    kind = "execution_error",
                    transient = ?deps,
                    error = %err,
                    "Run failed inside the container"
                );
                Ok(err.to_string())
            }
        }
    }

    async fn wait_for_headroom(&self) -> Result<bool, ContainerError> {
        let deadline = tokio::time::Instant::now() + CAPACITY_WAIT_LIMIT;
        loop {
            if self.governor.has_headroom().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(CAPACITY_POLL_INTERVAL).await;
        }
    }

    fn fatal(&self, phase: &str, deps: &BTreeSet<String>, err: ContainerError) -> anyhow::Error {
        error!(
            phase = phase,
            kind = "container_unreachable",
            transient = ?deps,
            error = %err,
            "Container runtime unreachable"
        );
        anyhow::Error::new(err)
    }
}
