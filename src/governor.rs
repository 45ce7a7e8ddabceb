//! Application-level admission control on top of the runtime's own limits.
//!
//! The container runtime enforces the hard ceilings; this gate exists so an
//! overloaded container yields a clear "over capacity" answer instead of
//! letting new runs pile up and stall.

use std::sync::Arc;

use tracing::debug;

use crate::container::{ContainerApi, ContainerError, ResourceLimits};

/// CPU usage above this percentage means no headroom.
pub const CPU_THRESHOLD_PCT: f64 = 80.0;

/// Memory headroom required below the container limit, in bytes (50 MiB).
pub const MEMORY_HEADROOM_BYTES: u64 = 50 * 1024 * 1024;

/// Admission gate over live container utilization.
pub(crate) struct Governor {
    container: Arc<dyn ContainerApi>,
}

impl Governor {
    pub fn new(container: Arc<dyn ContainerApi>) -> Self {
        Self { container }
    }

    /// Pushes the validated limits onto the running container.
    pub async fn apply(&self, limits: &ResourceLimits) -> Result<(), ContainerError> {
        self.container.reconfigure(limits).await
    }

    /// Reads live stats and decides whether another run may be admitted.
    pub async fn has_headroom(&self) -> Result<bool, ContainerError> {
        let stats = self.container.stats().await?;

        if stats.cpu_usage_pct > CPU_THRESHOLD_PCT {
            debug!(
                "No headroom: cpu {:.1}% above {:.0}%",
                stats.cpu_usage_pct, CPU_THRESHOLD_PCT
            );
            return Ok(false);
        }

        if stats.mem_limit > 0 && stats.mem_used + MEMORY_HEADROOM_BYTES > stats.mem_limit {
            debug!(
                "No headroom: {} of {} bytes used",
                stats.mem_used, stats.mem_limit
            );
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::mock::MockContainer;
    use crate::container::ContainerStats;

    fn governor_with_stats(stats: ContainerStats) -> (Arc<MockContainer>, Governor) {
        let container = Arc::new(MockContainer::new());
        container.set_stats(stats);
        let governor = Governor::new(container.clone() as Arc<dyn ContainerApi>);
        (container, governor)
    }

    #[tokio::test]
    async fn test_headroom_when_idle() {
        let (_container, governor) = governor_with_stats(ContainerStats {
            cpu_usage_pct: 10.0,
            mem_used: 20 * 1024 * 1024,
            mem_limit: 512 * 1024 * 1024,
        });
        assert!(governor.has_headroom().await.unwrap());
    }

    #[tokio::test]
    async fn test_no_headroom_when_cpu_saturated() {
        let (_container, governor) = governor_with_stats(ContainerStats {
            cpu_usage_pct: 95.0,
            mem_used: 0,
            mem_limit: 512 * 1024 * 1024,
        });
        assert!(!governor.has_headroom().await.unwrap());
    }

    #[tokio::test]
    async fn test_no_headroom_when_memory_tight() {
        // Within 50 MiB of the limit.
        let (_container, governor) = governor_with_stats(ContainerStats {
            cpu_usage_pct: 10.0,
            mem_used: 480 * 1024 * 1024,
            mem_limit: 512 * 1024 * 1024,
        });
        assert!(!governor.has_headroom().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_memory_limit_gates_on_cpu_only() {
        let (_container, governor) = governor_with_stats(ContainerStats {
            cpu_usage_pct: 10.0,
            mem_used: u64::MAX / 2,
            mem_limit: 0,
        });
        assert!(governor.has_headroom().await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_pushes_limits() {
        let container = Arc::new(MockContainer::new());
        let governor = Governor::new(container.clone() as Arc<dyn ContainerApi>);
        let limits = ResourceLimits {
            cpu_quota: 50_000,
            memory_bytes: 104_857_600,
            memswap_bytes: 512 * 1024 * 1024,
        };
        governor.apply(&limits).await.unwrap();
        assert_eq!(container.limits(), Some(limits));
    }
}
