// Sandbox configuration: fixed container policy plus host-side limits
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/sandbox.json";

/// Policy applied to every submission. Not user-tunable per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Host directory under which per-submission workspaces are created.
    /// Must be visible to the container engine at the same path.
    pub workspace_root: PathBuf,
    /// Applied to both memory and memory+swap
    pub memory_limit_mb: u32,
    pub cpu_shares: u32,
    pub pids_limit: u32,
    /// Host-side deadline for the container wait
    pub execution_timeout_ms: u64,
    pub max_source_bytes: usize,
    /// Read limit for each file the container leaves behind
    pub max_output_bytes: u64,
    /// Pull the driver image when it is not cached locally
    pub pull_images: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("crucible"),
            memory_limit_mb: 256,
            cpu_shares: 512,
            pids_limit: 128,
            execution_timeout_ms: 30_000,
            max_source_bytes: 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            pull_images: true,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Sandbox config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `CRUCIBLE_CONFIG` (or `config/sandbox.json`) when present,
    /// fall back to defaults, then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("CRUCIBLE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CRUCIBLE_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("CRUCIBLE_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(value) = lookup("CRUCIBLE_MEMORY_LIMIT_MB") {
            self.memory_limit_mb = value
                .parse()
                .context("CRUCIBLE_MEMORY_LIMIT_MB must be an integer")?;
        }
        if let Some(value) = lookup("CRUCIBLE_CPU_SHARES") {
            self.cpu_shares = value
                .parse()
                .context("CRUCIBLE_CPU_SHARES must be an integer")?;
        }
        if let Some(value) = lookup("CRUCIBLE_PIDS_LIMIT") {
            self.pids_limit = value
                .parse()
                .context("CRUCIBLE_PIDS_LIMIT must be an integer")?;
        }
        if let Some(value) = lookup("CRUCIBLE_TIMEOUT_MS") {
            self.execution_timeout_ms = value
                .parse()
                .context("CRUCIBLE_TIMEOUT_MS must be an integer")?;
        }
        if let Some(value) = lookup("CRUCIBLE_MAX_OUTPUT_BYTES") {
            self.max_output_bytes = value
                .parse()
                .context("CRUCIBLE_MAX_OUTPUT_BYTES must be an integer")?;
        }
        if let Some(value) = lookup("CRUCIBLE_PULL_IMAGES") {
            self.pull_images = value.to_lowercase() == "true";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than zero");
        }
        if self.cpu_shares == 0 {
            bail!("cpu_shares must be greater than zero");
        }
        if self.pids_limit == 0 {
            bail!("pids_limit must be greater than zero");
        }
        if self.execution_timeout_ms == 0 {
            bail!("execution_timeout_ms must be greater than zero");
        }
        if self.max_source_bytes == 0 {
            bail!("max_source_bytes must be greater than zero");
        }
        if self.max_output_bytes == 0 {
            bail!("max_output_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}
