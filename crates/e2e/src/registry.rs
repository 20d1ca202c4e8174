//! Integration registry - which dev servers to boot and how to tell they are up

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::{HarnessError, HarnessResult};
use crate::scenarios::ScenarioId;

/// Placeholder in launch commands and args replaced by the workspace path.
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";

/// Serializable registry entry, as written in a harness config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSpec {
    /// Unique identifier (also names the temp workspace)
    pub id: String,

    /// Program to launch; may contain `{workspace}`
    pub launch_command: String,

    /// Arguments; may contain `{workspace}`
    #[serde(default)]
    pub launch_args: Vec<String>,

    /// Port the dev server listens on
    pub listen_port: u16,

    /// Regex matched against stdout lines to detect readiness
    pub ready_pattern: String,

    /// Scenarios known not to work with this integration
    #[serde(default)]
    pub excluded_scenarios: BTreeSet<ScenarioId>,

    /// Fixture directory name (defaults to `id`)
    #[serde(default)]
    pub fixture: Option<String>,

    /// Confirm the port answers HTTP before navigating
    #[serde(default = "default_check_http")]
    pub check_http: bool,
}

fn default_check_http() -> bool {
    true
}

/// Validated, immutable integration configuration
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub id: String,
    pub launch_command: String,
    pub launch_args: Vec<String>,
    pub listen_port: u16,
    pub ready_pattern: Regex,
    pub excluded_scenarios: BTreeSet<ScenarioId>,
    pub fixture: String,
    pub check_http: bool,
}

impl IntegrationConfig {
    /// Compile a spec into a config
    pub fn from_spec(spec: IntegrationSpec) -> HarnessResult<Self> {
        if spec.id.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("integration id must not be empty".into()));
        }
        if spec.id.contains(['/', '\\']) || spec.id.contains("..") {
            return Err(HarnessError::InvalidConfig(format!(
                "integration id {:?} must be a plain name",
                spec.id
            )));
        }
        if spec.launch_command.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(format!(
                "integration {} has no launch command",
                spec.id
            )));
        }
        if spec.listen_port == 0 {
            return Err(HarnessError::InvalidConfig(format!(
                "integration {} needs a fixed listen port",
                spec.id
            )));
        }

        let ready_pattern = Regex::new(&spec.ready_pattern)?;
        let fixture = spec.fixture.unwrap_or_else(|| spec.id.clone());

        Ok(Self {
            id: spec.id,
            launch_command: spec.launch_command,
            launch_args: spec.launch_args,
            listen_port: spec.listen_port,
            ready_pattern,
            excluded_scenarios: spec.excluded_scenarios,
            fixture,
            check_http: spec.check_http,
        })
    }

    /// URL the browser navigates to
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.listen_port)
    }

    /// Whether the scenario runs for this integration
    pub fn runs(&self, scenario: ScenarioId) -> bool {
        !self.excluded_scenarios.contains(&scenario)
    }

    /// Launch command and args with the workspace placeholder substituted
    pub fn command_line(&self, workspace: &Path) -> (String, Vec<String>) {
        let ws = workspace.to_string_lossy();
        let program = self.launch_command.replace(WORKSPACE_PLACEHOLDER, &ws);
        let args = self
            .launch_args
            .iter()
            .map(|a| a.replace(WORKSPACE_PLACEHOLDER, &ws))
            .collect();
        (program, args)
    }
}

/// Ordered set of integrations with unique ids and ports
#[derive(Debug, Clone)]
pub struct Registry {
    integrations: Vec<Arc<IntegrationConfig>>,
}

impl Registry {
    /// Build a registry from specs, rejecting duplicate ids or ports
    pub fn from_specs(specs: Vec<IntegrationSpec>) -> HarnessResult<Self> {
        let mut ids = HashSet::new();
        let mut ports: HashMap<u16, String> = HashMap::new();
        let mut integrations = Vec::with_capacity(specs.len());

        for spec in specs {
            let config = IntegrationConfig::from_spec(spec)?;

            if !ids.insert(config.id.clone()) {
                return Err(HarnessError::InvalidConfig(format!(
                    "duplicate integration id: {}",
                    config.id
                )));
            }
            if let Some(other) = ports.insert(config.listen_port, config.id.clone()) {
                return Err(HarnessError::InvalidConfig(format!(
                    "integrations {} and {} both listen on port {}",
                    other, config.id, config.listen_port
                )));
            }

            integrations.push(Arc::new(config));
        }

        Ok(Self { integrations })
    }

    /// The built-in integrations
    pub fn builtin() -> HarnessResult<Self> {
        Self::from_specs(builtin_specs())
    }

    pub fn get(&self, id: &str) -> Option<Arc<IntegrationConfig>> {
        self.integrations.iter().find(|i| i.id == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IntegrationConfig>> {
        self.integrations.iter()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Narrow the registry to the given ids (all when empty)
    pub fn select(&self, ids: &[String]) -> HarnessResult<Vec<Arc<IntegrationConfig>>> {
        if ids.is_empty() {
            return Ok(self.integrations.clone());
        }
        ids.iter()
            .map(|id| {
                self.get(id).ok_or_else(|| {
                    HarnessError::InvalidConfig(format!("unknown integration: {}", id))
                })
            })
            .collect()
    }
}

fn node_bin(name: &str) -> String {
    format!("{}/node_modules/.bin/{}", WORKSPACE_PLACEHOLDER, name)
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Integrations exercised by default. Ports are distinct so suites can run
/// side by side.
pub fn builtin_specs() -> Vec<IntegrationSpec> {
    // external-jsx is only exercised on webpack and next
    let no_external_jsx: BTreeSet<ScenarioId> = [ScenarioId::ExternalJsx].into();

    vec![
        IntegrationSpec {
            id: "vite".into(),
            launch_command: node_bin("vite"),
            launch_args: args(&["--port", "3011", "--strictPort"]),
            listen_port: 3011,
            ready_pattern: r"(?i)(ready in|local:\s+http)".into(),
            excluded_scenarios: no_external_jsx.clone(),
            fixture: None,
            check_http: true,
        },
        IntegrationSpec {
            id: "webpack".into(),
            launch_command: node_bin("webpack-dev-server"),
            launch_args: args(&["--port", "3012"]),
            listen_port: 3012,
            ready_pattern: r"(?i)compiled successfully".into(),
            excluded_scenarios: BTreeSet::new(),
            fixture: None,
            check_http: true,
        },
        IntegrationSpec {
            id: "next".into(),
            launch_command: node_bin("next"),
            launch_args: args(&["dev", "-p", "3013"]),
            listen_port: 3013,
            ready_pattern: r"(?i)compiled successfully|ready on".into(),
            excluded_scenarios: BTreeSet::new(),
            fixture: None,
            check_http: true,
        },
        IntegrationSpec {
            id: "next-webpack5".into(),
            launch_command: node_bin("next"),
            launch_args: args(&["dev", "-p", "3014"]),
            listen_port: 3014,
            ready_pattern: r"(?i)compiled successfully|ready on".into(),
            excluded_scenarios: [ScenarioId::AddFileAndImport, ScenarioId::ExternalJsx].into(),
            fixture: None,
            check_http: true,
        },
        IntegrationSpec {
            id: "snowpack".into(),
            launch_command: node_bin("snowpack"),
            launch_args: args(&["dev", "--port", "3015"]),
            listen_port: 3015,
            ready_pattern: r"(?i)server started".into(),
            excluded_scenarios: no_external_jsx,
            fixture: None,
            check_http: true,
        },
    ]
}
