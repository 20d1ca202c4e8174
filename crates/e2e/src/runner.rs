//! Runs the suites of several integrations and collects their reports

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::browser::BrowserLauncher;
use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::registry::{IntegrationConfig, Registry};
use crate::suite::{ScenarioStatus, ScenarioSuite, SuiteReport};
use crate::workspace::WorkspaceManager;

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub suites: Vec<SuiteReport>,
}

impl HarnessReport {
    fn from_suites(suites: Vec<SuiteReport>, duration_ms: u64) -> Self {
        let count = |status| suites.iter().map(|s| s.count(status)).sum::<usize>();
        let passed = count(ScenarioStatus::Passed);
        let skipped = count(ScenarioStatus::Skipped);
        let failed = count(ScenarioStatus::Failed) + count(ScenarioStatus::Aborted);

        Self {
            total: passed + skipped + failed,
            passed,
            failed,
            skipped,
            duration_ms,
            suites,
        }
    }

    pub fn success(&self) -> bool {
        self.suites.iter().all(SuiteReport::success)
    }
}

/// Drives one suite per selected integration
pub struct HarnessRunner<L: BrowserLauncher> {
    config: HarnessConfig,
    registry: Registry,
    workspaces: WorkspaceManager,
    launcher: L,
}

impl<L: BrowserLauncher> HarnessRunner<L> {
    pub fn new(config: HarnessConfig, launcher: L) -> HarnessResult<Self> {
        let registry = config.registry()?;
        let workspaces = WorkspaceManager::new(
            &config.fixtures_root,
            &config.temp_root,
            config.install.clone(),
            config.timing.install_timeout(),
        );

        Ok(Self {
            config,
            registry,
            workspaces,
            launcher,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run the given integrations (all when empty). Suites run side by side
    /// unless `serial` is set.
    pub async fn run(&self, ids: &[String], serial: bool) -> HarnessResult<HarnessReport> {
        let selected = self.registry.select(ids)?;
        let start = Instant::now();

        info!(
            "Running {} integration(s){}: {}",
            selected.len(),
            if serial { " serially" } else { "" },
            selected.iter().map(|i| i.id.as_str()).collect::<Vec<_>>().join(", ")
        );

        let suites = if serial {
            let mut reports = Vec::with_capacity(selected.len());
            for integration in selected {
                reports.push(self.suite(integration).run().await);
            }
            reports
        } else {
            join_all(selected.into_iter().map(|i| self.suite(i).run())).await
        };

        let report = HarnessReport::from_suites(suites, start.elapsed().as_millis() as u64);

        info!("");
        for suite in &report.suites {
            if suite.success() {
                info!("✓ {}", suite.integration);
            } else {
                error!("✗ {} - {}", suite.integration, failure_summary(suite));
            }
        }
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            report.passed, report.failed, report.skipped, report.duration_ms
        );

        Ok(report)
    }

    fn suite(&self, integration: Arc<IntegrationConfig>) -> ScenarioSuite<'_, L> {
        ScenarioSuite::new(
            integration,
            &self.workspaces,
            &self.launcher,
            self.config.timing.clone(),
            self.config.verbose,
        )
    }
}

fn failure_summary(suite: &SuiteReport) -> String {
    if let Some(error) = &suite.error {
        return error.clone();
    }
    suite
        .scenarios
        .iter()
        .filter(|s| s.status == ScenarioStatus::Failed)
        .map(|s| s.scenario.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write the report as JSON into `output_dir`
pub fn write_results(report: &HarnessReport, output_dir: &Path) -> HarnessResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
