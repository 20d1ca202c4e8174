//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::HarnessResult;
use crate::poll::PollOptions;
use crate::registry::{IntegrationSpec, Registry};

/// Environment variable that turns on log relaying from servers and pages
pub const VERBOSE_ENV: &str = "DEBUG";

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding one fixture project per integration
    pub fixtures_root: PathBuf,

    /// Where per-integration workspaces are created
    pub temp_root: PathBuf,

    /// Dependency install command (argv); empty skips installation
    pub install: Vec<String>,

    /// Delays and timeouts
    pub timing: Timing,

    /// Relay server output and browser console to the log
    pub verbose: bool,

    /// Replaces the built-in registry when non-empty
    pub integrations: Vec<IntegrationSpec>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fixtures_root: default_fixtures_root(),
            temp_root: std::env::temp_dir(),
            install: vec!["yarn".to_string()],
            timing: Timing::default(),
            verbose: false,
            integrations: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent.
    /// A truthy `DEBUG` in the environment forces verbose mode.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            debug!("Loaded harness config from {}", path.display());
            config
        } else {
            Self::default()
        };
        config.verbose |= verbose_from_env();
        Ok(config)
    }

    /// Registry described by this config
    pub fn registry(&self) -> HarnessResult<Registry> {
        if self.integrations.is_empty() {
            Registry::builtin()
        } else {
            Registry::from_specs(self.integrations.clone())
        }
    }
}

/// Delays and timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Minimum wait after a mutation before polling
    pub settle_ms: u64,

    /// Minimum wait after mutations that add files or imports
    pub long_settle_ms: u64,

    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,

    /// Budget for the ready line after spawn
    pub ready_timeout_ms: u64,

    /// Budget for the port to answer HTTP after the ready line
    pub http_check_timeout_ms: u64,

    /// Overall budget for one integration (setup plus scenarios)
    pub suite_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL when stopping a server
    pub stop_grace_ms: u64,

    pub install_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 1_000,
            long_settle_ms: 2_000,
            poll_interval_ms: 250,
            poll_timeout_ms: 10_000,
            ready_timeout_ms: 60_000,
            http_check_timeout_ms: 10_000,
            suite_timeout_ms: 300_000,
            stop_grace_ms: 1_000,
            install_timeout_ms: 240_000,
        }
    }
}

impl Timing {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn long_settle(&self) -> Duration {
        Duration::from_millis(self.long_settle_ms)
    }

    pub fn poll(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn http_check_timeout(&self) -> Duration {
        Duration::from_millis(self.http_check_timeout_ms)
    }

    pub fn suite_timeout(&self) -> Duration {
        Duration::from_millis(self.suite_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }
}

/// Fixtures shipped with this crate
pub fn default_fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Whether `DEBUG` is set to something truthy
pub fn verbose_from_env() -> bool {
    std::env::var(VERBOSE_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1", true)]
    #[test_case("true", true)]
    #[test_case("hmr_e2e*", true)]
    #[test_case("", false)]
    #[test_case("0", false)]
    #[test_case("FALSE", false)]
    #[test_case("off", false)]
    fn test_truthy(value: &str, expected: bool) {
        assert_eq!(is_truthy(value), expected);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.install, vec!["yarn"]);
        assert_eq!(config.timing.settle_ms, 1_000);
        assert_eq!(config.registry().unwrap().len(), 5);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(
            &path,
            r#"
install = []

[timing]
settle_ms = 50
poll_timeout_ms = 500

[[integrations]]
id = "vite"
launch_command = "{workspace}/node_modules/.bin/vite"
launch_args = ["--port", "4500", "--strictPort"]
listen_port = 4500
ready_pattern = "ready in"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert!(config.install.is_empty());
        assert_eq!(config.timing.settle(), Duration::from_millis(50));
        assert_eq!(config.timing.poll().timeout, Duration::from_millis(500));
        assert_eq!(config.timing.long_settle_ms, 2_000);

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("vite").unwrap().listen_port, 4500);
    }
}
