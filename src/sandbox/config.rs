//! Sandbox configuration
//!
//! Host-level settings for the isolation runtime, loaded from an optional TOML
//! file and overridden by environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Argv prefix used to invoke the isolation runtime (default: `isolate`)
    pub runtime: Vec<String>,
    /// Enforce memory through the cgroup controller (`--cg`, `--cg-mem`)
    pub use_cgroups: bool,
    /// Seconds added on top of the runtime's wall-clock cap for the outer timeout
    pub outer_timeout_slack_secs: f64,
    /// Process limit applied to trusted runs
    pub trusted_process_limit: u32,
    /// PATH exported to untrusted programs
    pub sandbox_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: vec!["isolate".to_string()],
            use_cgroups: true,
            outer_timeout_slack_secs: 5.0,
            trusted_process_limit: 256,
            sandbox_path: "/usr/local/bin:/usr/bin:/bin".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration: defaults, then the TOML file (if any), then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sandbox config {:?}", path))?;
        let config: SandboxConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid sandbox config {:?}", path))?;
        info!("Loaded sandbox configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `SANDBOX_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(runtime) = lookup("SANDBOX_RUNTIME") {
            self.runtime = runtime.split_whitespace().map(|s| s.to_string()).collect();
        }
        if let Some(value) = lookup("SANDBOX_USE_CGROUPS") {
            self.use_cgroups = parse_bool(&value)
                .with_context(|| format!("Invalid SANDBOX_USE_CGROUPS: {}", value))?;
        }
        if let Some(value) = lookup("SANDBOX_OUTER_SLACK_SECS") {
            self.outer_timeout_slack_secs = value
                .parse()
                .with_context(|| format!("Invalid SANDBOX_OUTER_SLACK_SECS: {}", value))?;
        }
        if let Some(value) = lookup("SANDBOX_TRUSTED_PROCESSES") {
            self.trusted_process_limit = value
                .parse()
                .with_context(|| format!("Invalid SANDBOX_TRUSTED_PROCESSES: {}", value))?;
        }
        if let Some(value) = lookup("SANDBOX_PATH") {
            self.sandbox_path = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.is_empty() {
            anyhow::bail!("Sandbox runtime command must not be empty");
        }
        if !self.outer_timeout_slack_secs.is_finite() || self.outer_timeout_slack_secs <= 0.0 {
            anyhow::bail!(
                "Outer timeout slack must be positive, got {}",
                self.outer_timeout_slack_secs
            );
        }
        if self.trusted_process_limit == 0 {
            anyhow::bail!("Trusted process limit must be at least 1");
        }
        Ok(())
    }

    /// Runtime program (first element of the argv prefix)
    pub fn runtime_program(&self) -> &str {
        self.runtime.first().map(String::as_str).unwrap_or("isolate")
    }

    /// Arguments that precede the runtime options
    pub fn runtime_prefix_args(&self) -> &[String] {
        self.runtime.get(1..).unwrap_or(&[])
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}

/// Global sandbox configuration
static SANDBOX_CONFIG: OnceLock<SandboxConfig> = OnceLock::new();

/// Install the process-wide sandbox configuration
pub fn init_config(config: SandboxConfig) -> Result<()> {
    SANDBOX_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Sandbox configuration already initialized"))?;

    Ok(())
}

/// Get sandbox configuration
pub fn get_config() -> &'static SandboxConfig {
    SANDBOX_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<SandboxConfig> = OnceLock::new();

        warn!("Sandbox configuration not initialized, using default");
        DEFAULT.get_or_init(SandboxConfig::default)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = SandboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime_program(), "isolate");
        assert!(config.runtime_prefix_args().is_empty());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
runtime = ["sudo", "isolate"]
use_cgroups = false
"#
        )
        .unwrap();

        let config = SandboxConfig::from_file(file.path()).unwrap();
        assert_eq!(config.runtime_program(), "sudo");
        assert_eq!(config.runtime_prefix_args(), ["isolate".to_string()]);
        assert!(!config.use_cgroups);
        assert_eq!(config.outer_timeout_slack_secs, 5.0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SANDBOX_RUNTIME", "/opt/isolate/bin/isolate --verbose"),
            ("SANDBOX_USE_CGROUPS", "no"),
            ("SANDBOX_OUTER_SLACK_SECS", "2.5"),
            ("SANDBOX_TRUSTED_PROCESSES", "64"),
        ]
        .into_iter()
        .collect();

        let mut config = SandboxConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.runtime,
            vec!["/opt/isolate/bin/isolate".to_string(), "--verbose".to_string()]
        );
        assert!(!config.use_cgroups);
        assert_eq!(config.outer_timeout_slack_secs, 2.5);
        assert_eq!(config.trusted_process_limit, 64);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = SandboxConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "SANDBOX_USE_CGROUPS").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_runtime_is_invalid() {
        let config = SandboxConfig {
            runtime: vec![],
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
