//! Package installs inside the container, with whitelist enforcement and
//! guaranteed removal of transient installs.
//!
//! pip is a process-global resource in the container and must never run
//! concurrently, so every install/uninstall happens under one async mutex.
//! tokio's mutex queues waiters in FIFO order, which gives the fairness the
//! pipeline needs: a stream of short requests cannot starve a long install.
//! Snippet execution itself happens outside the lock.
//!
//! Two in-flight requests may need the same transient package. A per-package
//! refcount (held under the same lock) lets the second request reuse the
//! first one's install; the package is uninstalled by whichever request
//! drops the count back to zero. Only packages some request actually
//! installed are ever removed: anything found present out-of-band (image
//! preinstalls, leaks from a dead process) is left alone.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::container::{command, ContainerApi, ContainerError};

/// Why an install pass failed.
#[derive(Debug, thiserror::Error)]
pub(crate) enum InstallError {
    /// pip exited non-zero for a package.
    #[error("failed to install package {package:?}")]
    PackageFailed { package: String },

    /// The container itself failed mid-install.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl InstallError {
    /// Returns true if the container runtime is gone, which is fatal to the
    /// whole pipeline rather than just this run.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Container(err) if err.is_unreachable())
    }
}

#[derive(Default)]
struct DepState {
    /// In-flight requests currently relying on each package.
    refcounts: HashMap<String, usize>,
    /// Transient packages installed by this process, pending removal.
    installed_here: HashSet<String>,
}

/// Installs and removes snippet dependencies through the container adapter.
pub(crate) struct DependencyManager {
    container: Arc<dyn ContainerApi>,
    whitelist: Vec<String>,
    cached: Vec<String>,
    state: Mutex<DepState>,
}

impl DependencyManager {
    pub fn new(
        container: Arc<dyn ContainerApi>,
        whitelist: Vec<String>,
        cached: Vec<String>,
    ) -> Self {
        Self {
            container,
            whitelist,
            cached,
            state: Mutex::new(DepState::default()),
        }
    }

    fn allows_any(&self) -> bool {
        self.whitelist
            .iter()
            .any(|entry| entry == crate::config::WHITELIST_ANY)
    }

    fn is_cached(&self, package: &str) -> bool {
        self.cached.iter().any(|cached| cached == package)
    }

    /// Checks every dependency against the whitelist. Returns the first
    /// disallowed package name, before any install is attempted.
    pub fn ensure_allowed(&self, deps: &BTreeSet<String>) -> Result<(), String> {
        if self.allows_any() {
            return Ok(());
        }
        for dep in deps {
            if !self.whitelist.contains(dep) {
                return Err(dep.clone());
            }
        }
        Ok(())
    }

    /// Installs every cached dependency once. Called at construction;
    /// failure here is fatal.
    pub async fn warm_cache(&self) -> Result<(), InstallError> {
        // Lock order matches install(): pip never runs concurrently.
        let _state = self.state.lock().await;
        for package in &self.cached {
            if self.probe_installed(package).await? {
                debug!("Cached dependency {} already present", package);
                continue;
            }
            self.pip_install(package).await?;
            info!("Warmed cached dependency {}", package);
        }
        Ok(())
    }

    /// Installs the missing dependencies of one run, sequentially, under
    /// the pip lock. Returns the packages this call actually installed; on
    /// failure those are rolled back before the error is returned.
    ///
    /// Presence is decided by asking pip, not by in-process bookkeeping, so
    /// packages left behind by anything else are recognized and reused.
    pub async fn install(&self, deps: &BTreeSet<String>) -> Result<Vec<String>, InstallError> {
        if deps.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        let mut referenced: Vec<String> = Vec::new();
        let mut installed: Vec<String> = Vec::new();

        for dep in deps {
            if self.is_cached(dep) {
                continue;
            }
            *state.refcounts.entry(dep.clone()).or_insert(0) += 1;
            referenced.push(dep.clone());

            if state.installed_here.contains(dep) {
                // Another in-flight run installed it; share the install.
                debug!("Reusing in-flight install of {}", dep);
                continue;
            }
            let present = match self.probe_installed(dep).await {
                Ok(present) => present,
                Err(err) => {
                    self.rollback(&mut state, &referenced, &installed).await;
                    return Err(err.into());
                }
            };
            if present {
                debug!("Package {} already present, skipping install", dep);
                continue;
            }

            match self.pip_install(dep).await {
                Ok(()) => {
                    state.installed_here.insert(dep.clone());
                    installed.push(dep.clone());
                }
                Err(err) => {
                    self.rollback(&mut state, &referenced, &installed).await;
                    return Err(err);
                }
            }
        }

        Ok(installed)
    }

    /// Drops one run's claim on its dependencies and removes every
    /// transient package whose claim count reached zero. Best-effort: one
    /// failed uninstall is logged and does not stop the rest.
    pub async fn release(&self, deps: &BTreeSet<String>) {
        if deps.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        for dep in deps {
            if self.is_cached(dep) {
                continue;
            }
            let Some(count) = state.refcounts.get_mut(dep) else {
                continue;
            };
            *count -= 1;
            if *count > 0 {
                debug!("Package {} still in use by another run", dep);
                continue;
            }
            state.refcounts.remove(dep);
            if state.installed_here.remove(dep) {
                if let Err(err) = self.pip_uninstall(dep).await {
                    warn!("Failed to uninstall transient package {}: {}", dep, err);
                }
            }
        }
    }

    /// Undoes the claims and installs of a partially-failed install pass.
    async fn rollback(&self, state: &mut DepState, referenced: &[String], installed: &[String]) {
        for dep in referenced {
            match state.refcounts.get_mut(dep) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    state.refcounts.remove(dep);
                }
                None => {}
            }
        }
        for dep in installed {
            if state.refcounts.contains_key(dep) {
                // Another run picked up a shared claim; leave it installed.
                continue;
            }
            state.installed_here.remove(dep);
            if let Err(err) = self.pip_uninstall(dep).await {
                warn!("Rollback failed to uninstall {}: {}", dep, err);
            }
        }
    }

    async fn probe_installed(&self, package: &str) -> Result<bool, ContainerError> {
        let output = self
            .container
            .exec(&command(["pip", "show", package]), None)
            .await?;
        Ok(output.success())
    }

    async fn pip_install(&self, package: &str) -> Result<(), InstallError> {
        let output = self
            .container
            .exec(&command(["pip", "install", "--user", package]), None)
            .await?;
        if !output.success() {
            warn!(
                "pip install {} exited with {}: {}",
                package,
                output.exit_code,
                output.stderr.trim()
            );
            return Err(InstallError::PackageFailed {
                package: package.to_string(),
            });
        }
        Ok(())
    }

    async fn pip_uninstall(&self, package: &str) -> Result<(), ContainerError> {
        let output = self
            .container
            .exec(&command(["pip", "uninstall", "-y", package]), None)
            .await?;
        if !output.success() {
            return Err(ContainerError::exec_failed(format!(
                "pip uninstall {package} exited with {}",
                output.exit_code
            )));
        }
        Ok(())
    }
}
