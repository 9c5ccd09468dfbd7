//! Settings loading and the per-run override precedence chain.
//!
//! Settings come from `.colony/colony.toml` in the project, falling back to
//! the user-level config directory, then to built-in defaults. For per-run
//! overrides the precedence is: CLI flag > persisted epic metadata >
//! configuration file > built-in default.

use crate::errors::ColonyError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Accepted complexity hints.
pub const COMPLEXITY_VALUES: [&str; 3] = ["low", "standard", "high"];

const DEFAULT_COMPLEXITY: &str = "standard";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    pub worker: WorkerSettings,
    pub swarm: SwarmSettings,
    pub tracker: TrackerSettings,
    pub telemetry: TelemetrySettings,
    pub git: GitSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Agent CLI command.
    pub agent_cmd: String,
    /// Skip permission prompts in the agent.
    pub skip_permissions: bool,
    /// Per-child maximum runtime in seconds.
    pub timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            agent_cmd: "claude".to_string(),
            skip_permissions: true,
            timeout_secs: 2700,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwarmSettings {
    /// Concurrency ceiling for worker processes.
    pub max_parallel: usize,
    /// Default complexity hint.
    pub complexity: Option<String>,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            complexity: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Issue tracker API base URL. No URL means no swarm decomposition.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Collector endpoint. No endpoint means reporting is a no-op.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Remote used when pushing task branches.
    pub remote: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

impl ColonyConfig {
    /// Load configuration for a project directory.
    ///
    /// Checks the project-level file first, then the user-level one; when
    /// neither exists every setting is its built-in default.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let candidates = [
            Some(project_dir.join(".colony").join("colony.toml")),
            dirs::config_dir().map(|d| d.join("colony").join("colony.toml")),
        ];

        for path in candidates.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!(path = %path.display(), "loading configuration");
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("Invalid config at {}", path.display()))?;
            config.validate()?;
            return Ok(config);
        }

        Ok(Self::default())
    }

    /// Validate values that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<(), ColonyError> {
        crate::workspace::validate_remote_name(&self.git.remote)?;
        if let Some(complexity) = &self.swarm.complexity {
            validate_complexity(complexity)?;
        }
        Ok(())
    }
}

/// Validate a complexity hint.
pub fn validate_complexity(value: &str) -> Result<(), ColonyError> {
    if COMPLEXITY_VALUES.contains(&value) {
        Ok(())
    } else {
        Err(ColonyError::InvalidComplexity {
            value: value.to_string(),
        })
    }
}

/// Resolve the effective complexity hint for a run.
///
/// Precedence: CLI flag > persisted epic metadata > config file > default.
/// The winning value is validated; a malformed override is fatal before any
/// workspace mutation.
pub fn resolve_complexity(
    cli: Option<&str>,
    persisted: Option<&str>,
    config: &ColonyConfig,
) -> Result<String, ColonyError> {
    let value = cli
        .or(persisted)
        .or(config.swarm.complexity.as_deref())
        .unwrap_or(DEFAULT_COMPLEXITY);
    validate_complexity(value)?;
    Ok(value.to_string())
}
