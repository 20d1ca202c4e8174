//! One integration's suite: setup, the scenario catalogue, teardown

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::browser::{BrowserLauncher, PageDriver};
use crate::config::Timing;
use crate::error::{HarnessError, HarnessResult};
use crate::mutation;
use crate::poll::PollOptions;
use crate::registry::IntegrationConfig;
use crate::scenarios::ScenarioId;
use crate::server::{wait_for_http, ServerProcess};
use crate::workspace::{WorkspaceHandle, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuiteState {
    Uninitialized,
    WorkspaceReady,
    ServerReady,
    PageLoaded,
    ScenarioRunning,
    TornDown,
}

impl SuiteState {
    pub fn can_advance_to(self, next: SuiteState) -> bool {
        use SuiteState::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Uninitialized, WorkspaceReady)
            | (WorkspaceReady, ServerReady)
            | (ServerReady, PageLoaded)
            | (PageLoaded, ScenarioRunning)
            | (ScenarioRunning, ScenarioRunning) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SuiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a suite owns, handed to each scenario
pub struct SuiteContext<D: PageDriver> {
    integration: Arc<IntegrationConfig>,
    timing: Timing,
    state: SuiteState,
    workspace: Option<WorkspaceHandle>,
    server: Option<ServerProcess>,
    page: Option<D>,
}

impl<D: PageDriver> SuiteContext<D> {
    pub fn new(integration: Arc<IntegrationConfig>, timing: Timing) -> Self {
        Self {
            integration,
            timing,
            state: SuiteState::Uninitialized,
            workspace: None,
            server: None,
            page: None,
        }
    }

    pub fn integration(&self) -> &IntegrationConfig {
        &self.integration
    }

    pub fn state(&self) -> SuiteState {
        self.state
    }

    pub fn advance(&mut self, next: SuiteState) -> HarnessResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(HarnessError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    fn ensure_page_loaded(&self) -> HarnessResult<()> {
        match self.state {
            SuiteState::PageLoaded | SuiteState::ScenarioRunning => Ok(()),
            other => Err(HarnessError::InvalidState {
                from: other.to_string(),
                to: SuiteState::ScenarioRunning.to_string(),
            }),
        }
    }

    /// The page, once loaded
    pub fn page(&self) -> HarnessResult<&D> {
        self.ensure_page_loaded()?;
        self.page
            .as_ref()
            .ok_or_else(|| HarnessError::Browser("no page attached".into()))
    }

    pub fn workspace_root(&self) -> HarnessResult<&Path> {
        self.workspace
            .as_ref()
            .map(WorkspaceHandle::path)
            .ok_or_else(|| HarnessError::InvalidState {
                from: self.state.to_string(),
                to: SuiteState::WorkspaceReady.to_string(),
            })
    }

    pub async fn update_file<F>(&self, relative: &str, replacer: F) -> HarnessResult<()>
    where
        F: FnOnce(&str) -> String,
    {
        self.ensure_page_loaded()?;
        mutation::update_file(self.workspace_root()?, relative, replacer).await
    }

    pub async fn write_file(&self, relative: &str, contents: &str) -> HarnessResult<()> {
        self.ensure_page_loaded()?;
        mutation::write_file(self.workspace_root()?, relative, contents).await
    }

    /// Minimum wait after an edit before polling starts
    pub async fn settle(&self) {
        tokio::time::sleep(self.timing.settle()).await;
    }

    /// Settle for edits that add modules to the graph
    pub async fn long_settle(&self) {
        tokio::time::sleep(self.timing.long_settle()).await;
    }

    pub fn poll_options(&self) -> PollOptions {
        self.timing.poll()
    }

    /// False once the dev server has gone away
    pub fn server_alive(&mut self) -> bool {
        self.server.as_mut().is_some_and(|s| !s.has_exited())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: ScenarioId,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub integration: String,
    pub scenarios: Vec<ScenarioReport>,

    /// Why the suite stopped early (setup failure, lost session, timeout)
    pub error: Option<String>,

    /// Cleanup problems; informational only
    pub teardown_warnings: Vec<String>,
    pub duration_ms: u64,
}

impl SuiteReport {
    fn new(integration: &str) -> Self {
        Self {
            integration: integration.to_string(),
            scenarios: Vec::new(),
            error: None,
            teardown_warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn count(&self, status: ScenarioStatus) -> usize {
        self.scenarios.iter().filter(|s| s.status == status).count()
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
            && self
                .scenarios
                .iter()
                .all(|s| matches!(s.status, ScenarioStatus::Passed | ScenarioStatus::Skipped))
    }

    fn record(
        &mut self,
        scenario: ScenarioId,
        status: ScenarioStatus,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.scenarios.push(ScenarioReport {
            scenario,
            status,
            duration_ms,
            error,
        });
    }

    /// Give every scenario without a result one: skipped if the
    /// integration excludes it, aborted otherwise
    fn abort_remaining(&mut self, integration: &IntegrationConfig, reason: &str) {
        for scenario in ScenarioId::ALL {
            if self.scenarios.iter().any(|s| s.scenario == scenario) {
                continue;
            }
            if integration.runs(scenario) {
                self.record(scenario, ScenarioStatus::Aborted, 0, Some(reason.to_string()));
            } else {
                self.record(scenario, ScenarioStatus::Skipped, 0, None);
            }
        }
    }
}

/// Runs the scenario catalogue against one integration
pub struct ScenarioSuite<'a, L: BrowserLauncher> {
    integration: Arc<IntegrationConfig>,
    workspaces: &'a WorkspaceManager,
    launcher: &'a L,
    timing: Timing,
    verbose: bool,
}

impl<'a, L: BrowserLauncher> ScenarioSuite<'a, L> {
    pub fn new(
        integration: Arc<IntegrationConfig>,
        workspaces: &'a WorkspaceManager,
        launcher: &'a L,
        timing: Timing,
        verbose: bool,
    ) -> Self {
        Self {
            integration,
            workspaces,
            launcher,
            timing,
            verbose,
        }
    }

    /// Set up, run every scenario, tear down. Never fails: problems end up
    /// in the report.
    pub async fn run(self) -> SuiteReport {
        let start = Instant::now();
        let id = self.integration.id.clone();
        let mut report = SuiteReport::new(&id);
        let mut ctx = SuiteContext::new(self.integration.clone(), self.timing.clone());

        info!("Suite {}: starting", id);

        let budget = self.timing.suite_timeout();
        let outcome = tokio::time::timeout(budget, self.drive(&mut ctx, &mut report)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(HarnessError::SuiteTimeout {
                seconds: budget.as_secs(),
            }),
        };

        if let Some(e) = failure {
            error!("Suite {} stopped in state {}: {}", id, ctx.state(), e);
            let reason = e.to_string();
            report.abort_remaining(&self.integration, &reason);
            report.error = Some(reason);
        }

        self.teardown(&mut ctx, &mut report).await;

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Suite {}: {} passed, {} failed, {} skipped, {} aborted ({} ms)",
            id,
            report.count(ScenarioStatus::Passed),
            report.count(ScenarioStatus::Failed),
            report.count(ScenarioStatus::Skipped),
            report.count(ScenarioStatus::Aborted),
            report.duration_ms
        );
        report
    }

    async fn drive(
        &self,
        ctx: &mut SuiteContext<L::Driver>,
        report: &mut SuiteReport,
    ) -> HarnessResult<()> {
        let id = self.integration.id.as_str();

        ctx.workspace = Some(self.workspaces.materialize(&self.integration).await?);
        ctx.advance(SuiteState::WorkspaceReady)?;

        let server =
            ServerProcess::start(&self.integration, ctx.workspace_root()?, self.verbose)?;
        let server = ctx.server.insert(server);
        server.wait_ready(self.timing.ready_timeout()).await?;
        if self.integration.check_http {
            wait_for_http(&self.integration.url(), self.timing.http_check_timeout()).await?;
        }
        ctx.advance(SuiteState::ServerReady)?;

        let page = ctx.page.insert(self.launcher.launch(id, self.verbose).await?);
        page.navigate(&self.integration.url()).await?;
        ctx.advance(SuiteState::PageLoaded)?;

        for scenario in ScenarioId::ALL {
            if !self.integration.runs(scenario) {
                info!("  - {} skipped for {}", scenario, id);
                report.record(scenario, ScenarioStatus::Skipped, 0, None);
                continue;
            }

            ctx.advance(SuiteState::ScenarioRunning)?;
            let started = Instant::now();
            let result = scenario.run(ctx).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!("  ✓ {} ({} ms)", scenario, duration_ms);
                    report.record(scenario, ScenarioStatus::Passed, duration_ms, None);
                }
                Err(e) => {
                    error!("  ✗ {} - {}", scenario, e);
                    let fatal = e.breaks_session() || !ctx.server_alive();
                    let error = Some(e.to_string());
                    report.record(scenario, ScenarioStatus::Failed, duration_ms, error);
                    if fatal {
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Release everything the suite acquired. Errors become warnings.
    async fn teardown(&self, ctx: &mut SuiteContext<L::Driver>, report: &mut SuiteReport) {
        let mut warnings = Vec::new();

        if let Some(server) = ctx.server.as_mut() {
            server.detach_listeners();
        }
        if let Some(page) = ctx.page.as_mut() {
            page.detach_listeners();
        }

        if let Some(mut page) = ctx.page.take() {
            if let Err(e) = page.close().await {
                warnings.push(format!("closing browser: {}", e));
            }
        }

        if let Some(mut server) = ctx.server.take() {
            if let Err(e) = server.stop(self.timing.stop_grace()).await {
                warnings.push(format!("stopping dev server: {}", e));
            }
        }

        // A materialize cut short by the suite timeout leaves no handle
        let handle = ctx.workspace.take().unwrap_or_else(|| WorkspaceHandle {
            integration_id: self.integration.id.clone(),
            path: self.workspaces.workspace_path(&self.integration.id),
            source_fixture_path: self.workspaces.fixture_path(&self.integration),
        });
        if !self.workspaces.destroy(&handle).await {
            warnings.push(format!("removing workspace {}", handle.path.display()));
        }

        if let Err(e) = ctx.advance(SuiteState::TornDown) {
            warnings.push(e.to_string());
        }

        for warning in &warnings {
            warn!("Teardown of {}: {}", self.integration.id, warning);
        }
        report.teardown_warnings.extend(warnings);
    }
}
