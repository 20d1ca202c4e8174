//! HMR regression harness
//!
//! For each dev-server integration this crate:
//! - Copies a fixture project into a throwaway workspace and installs it
//! - Spawns the dev server and waits for its ready line
//! - Drives a headless Chromium page against the served app
//! - Edits fixture sources and polls the DOM until the hot update lands
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  HarnessRunner (per run)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioSuite (per integration)                            │
//! │    ├── WorkspaceManager::materialize() -> WorkspaceHandle   │
//! │    ├── ServerProcess::start() + wait_ready()                │
//! │    ├── BrowserLauncher::launch() -> PageDriver              │
//! │    ├── ScenarioId::run(&SuiteContext)                       │
//! │    │     ├── mutation::update_file / write_file             │
//! │    │     ├── settle                                         │
//! │    │     └── poll::expect_eventually(text_of(..))           │
//! │    └── teardown: listeners, browser, server, workspace      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod mutation;
pub mod poll;
pub mod registry;
pub mod runner;
pub mod scenarios;
pub mod server;
pub mod suite;
pub mod workspace;

pub use browser::{BrowserLauncher, ChromiumLauncher, PageDriver, Target};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use poll::{expect_eventually, PollOptions};
pub use registry::{IntegrationConfig, Registry};
pub use runner::{HarnessReport, HarnessRunner};
pub use scenarios::ScenarioId;
pub use server::ServerProcess;
pub use suite::{ScenarioSuite, SuiteReport};
