//! Runner configuration, loaded from `agentrun.toml`.
//!
//! Handles parsing and validation of the execution limits, dependency
//! whitelist, and cached dependency set. Validation happens once, before
//! anything touches the container.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::container::ResourceLimits;

/// Whitelist entry that permits every installable package.
pub const WHITELIST_ANY: &str = "*";

/// Configuration for an [`crate::runner::AgentRun`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Name of the running container that snippets execute in.
    pub container_name: String,

    /// CPU time in microseconds per 100ms scheduling period (default: 50,000,
    /// i.e. half a core).
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    /// Wall-clock cap on interpreter execution, in seconds (default: 20).
    #[serde(default = "default_timeout_secs")]
    pub default_timeout: u64,

    /// RAM ceiling as a size string with required unit suffix `b|k|m|g`
    /// (default: "100m").
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Combined RAM + swap ceiling; must be at least `memory_limit`
    /// (default: "512m").
    #[serde(default = "default_memswap_limit")]
    pub memswap_limit: String,

    /// Package names snippets may pull in. `["*"]` permits anything
    /// installable, `[]` forbids installs entirely.
    #[serde(default = "default_whitelist")]
    pub dependencies_whitelist: Vec<String>,

    /// Packages installed once at construction and never removed.
    #[serde(default)]
    pub cached_dependencies: Vec<String>,
}

fn default_cpu_quota() -> i64 {
    50_000
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_memory_limit() -> String {
    "100m".to_string()
}

fn default_memswap_limit() -> String {
    "512m".to_string()
}

fn default_whitelist() -> Vec<String> {
    vec![WHITELIST_ANY.to_string()]
}

impl RunnerConfig {
    /// Creates a configuration for the named container with default limits.
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            cpu_quota: default_cpu_quota(),
            default_timeout: default_timeout_secs(),
            memory_limit: default_memory_limit(),
            memswap_limit: default_memswap_limit(),
            dependencies_whitelist: default_whitelist(),
            cached_dependencies: Vec::new(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Returns true if the whitelist permits every package.
    pub fn allows_any_dependency(&self) -> bool {
        self.dependencies_whitelist
            .iter()
            .any(|entry| entry == WHITELIST_ANY)
    }

    /// Checks every invariant and resolves the size strings, producing the
    /// limits to push onto the container.
    pub fn validate(&self) -> Result<ResourceLimits> {
        anyhow::ensure!(
            !self.container_name.is_empty(),
            "container_name must not be empty"
        );
        anyhow::ensure!(self.cpu_quota > 0, "cpu_quota must be a positive integer");
        anyhow::ensure!(
            self.default_timeout > 0,
            "default_timeout must be a positive number of seconds"
        );

        let memory_bytes = parse_size(&self.memory_limit)
            .with_context(|| format!("invalid memory_limit: {:?}", self.memory_limit))?;
        let memswap_bytes = parse_size(&self.memswap_limit)
            .with_context(|| format!("invalid memswap_limit: {:?}", self.memswap_limit))?;
        anyhow::ensure!(
            memswap_bytes >= memory_bytes,
            "memswap_limit ({}) must be at least memory_limit ({})",
            self.memswap_limit,
            self.memory_limit
        );

        if !self.allows_any_dependency() {
            for cached in &self.cached_dependencies {
                anyhow::ensure!(
                    self.dependencies_whitelist.contains(cached),
                    "cached dependency {cached:?} is not in the whitelist"
                );
            }
        }

        Ok(ResourceLimits {
            cpu_quota: self.cpu_quota,
            memory_bytes,
            memswap_bytes,
        })
    }
}

/// Parse a size string like "100m" or "2g" to bytes.
///
/// The format is `<integer><unit>` with unit one of `b`, `k`, `m`, `g`
/// (case-insensitive, powers of 1024). The unit suffix is required and the
/// value must be positive.
pub fn parse_size(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    anyhow::ensure!(
        trimmed.len() >= 2 && trimmed.is_ascii(),
        "size must be <integer><unit> with unit one of b/k/m/g"
    );

    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
    let multiplier: i64 = match unit.to_ascii_lowercase().as_str() {
        "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        other => anyhow::bail!("unknown size unit {other:?}; expected one of b/k/m/g"),
    };

    let value: i64 = digits
        .parse()
        .with_context(|| format!("invalid size value {digits:?}"))?;
    anyhow::ensure!(value > 0, "size must be positive");

    value
        .checked_mul(multiplier)
        .context("size does not fit in 64 bits")
}

/// Formats a byte count as the shortest exact size string, so that
/// `parse_size(&format_size(n)) == n` for any positive `n`.
pub fn format_size(bytes: i64) -> String {
    const KIB: i64 = 1024;
    const MIB: i64 = 1024 * 1024;
    const GIB: i64 = 1024 * 1024 * 1024;

    if bytes % GIB == 0 {
        format!("{}g", bytes / GIB)
    } else if bytes % MIB == 0 {
        format!("{}m", bytes / MIB)
    } else if bytes % KIB == 0 {
        format!("{}k", bytes / KIB)
    } else {
        format!("{bytes}b")
    }
}
