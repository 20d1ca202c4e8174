//! Fixture workspaces - a disposable, writable copy of a fixture per suite

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};
use crate::registry::IntegrationConfig;

/// Directories never copied: build output and dependency caches are
/// regenerated in the workspace so stale artifacts cannot mask a failure.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", ".next"];

/// Lines of installer stderr kept in an error
const STDERR_TAIL_LINES: usize = 20;

/// A materialized workspace owned by one suite run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    pub integration_id: String,
    pub path: PathBuf,
    pub source_fixture_path: PathBuf,
}

impl WorkspaceHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Held by a fixture copy for as long as it touches the workspace
type CopyLock = Arc<tokio::sync::Mutex<()>>;

/// Creates and removes fixture workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    fixtures_root: PathBuf,
    temp_root: PathBuf,
    install: Vec<String>,
    install_timeout: Duration,
    copies: Arc<Mutex<HashMap<String, CopyLock>>>,
}

/// Cancels a blocking copy once the future that started it is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl WorkspaceManager {
    pub fn new(
        fixtures_root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
        install: Vec<String>,
        install_timeout: Duration,
    ) -> Self {
        Self {
            fixtures_root: fixtures_root.into(),
            temp_root: temp_root.into(),
            install,
            install_timeout,
            copies: Arc::default(),
        }
    }

    fn copy_lock(&self, integration_id: &str) -> CopyLock {
        self.copies
            .lock()
            .entry(integration_id.to_string())
            .or_default()
            .clone()
    }

    /// Source fixture for an integration
    pub fn fixture_path(&self, integration: &IntegrationConfig) -> PathBuf {
        self.fixtures_root.join(&integration.fixture)
    }

    /// Deterministic workspace location, so a rerun finds and clears leftovers
    pub fn workspace_path(&self, integration_id: &str) -> PathBuf {
        self.temp_root.join(format!("hmr-e2e-{}", integration_id))
    }

    /// Copy the fixture into a fresh workspace and install its dependencies
    ///
    /// Dropping the returned future mid-copy (suite timeout) stops the copy
    /// at the next file; `destroy` waits for it before removing the tree.
    pub async fn materialize(
        &self,
        integration: &IntegrationConfig,
    ) -> HarnessResult<WorkspaceHandle> {
        let source = self.fixture_path(integration);
        if !source.is_dir() {
            return Err(HarnessError::FixtureNotFound(source));
        }

        let target = self.workspace_path(&integration.id);
        let copying = self.copy_lock(&integration.id).lock_owned().await;

        if target.exists() {
            info!("Removing leftover workspace {}", target.display());
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|source| HarnessError::StaleWorkspace {
                    path: target.clone(),
                    source,
                })?;
        }

        info!("Copying fixture {} -> {}", source.display(), target.display());
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(cancel.clone());
        let (src, dst) = (source.clone(), target.clone());
        let copied = tokio::task::spawn_blocking(move || {
            let _copying = copying;
            copy_tree(&src, &dst, &cancel)
        })
        .await
        .map_err(|e| HarnessError::Io(std::io::Error::other(e)))??;
        debug!("Copied {} file(s)", copied);

        let handle = WorkspaceHandle {
            integration_id: integration.id.clone(),
            path: target,
            source_fixture_path: source,
        };

        if let Err(e) = self.install(&handle).await {
            // The handle never reaches the suite, so clean up here.
            self.destroy(&handle).await;
            return Err(e);
        }

        Ok(handle)
    }

    /// Run the install command inside the workspace
    async fn install(&self, handle: &WorkspaceHandle) -> HarnessResult<()> {
        let Some((program, args)) = self.install.split_first() else {
            debug!("No install command configured; skipping");
            return Ok(());
        };
        let command = self.install.join(" ");
        info!("Installing dependencies for {} ({})", handle.integration_id, command);

        let output = Command::new(program)
            .args(args)
            .current_dir(&handle.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.install_timeout, output).await {
            Ok(result) => result.map_err(|source| HarnessError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(HarnessError::Install {
                    command,
                    status: format!("timed out after {}s", self.install_timeout.as_secs()),
                    stderr_tail: String::new(),
                })
            }
        };

        if !output.status.success() {
            return Err(HarnessError::Install {
                command,
                status: output.status.to_string(),
                stderr_tail: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
            });
        }

        Ok(())
    }

    /// Remove a workspace. Failures are logged and swallowed; returns whether
    /// the directory is gone.
    pub async fn destroy(&self, handle: &WorkspaceHandle) -> bool {
        // An abandoned copy may still be writing into the tree
        let _copy_done = self.copy_lock(&handle.integration_id).lock_owned().await;

        match tokio::fs::remove_dir_all(&handle.path).await {
            Ok(()) => {
                debug!("Removed workspace {}", handle.path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Failed to remove workspace {}: {}", handle.path.display(), e);
                false
            }
        }
    }
}

/// Recursively copy `src` to `dst`, skipping excluded directories. Stops
/// with `Interrupted` once `cancel` is set.
fn copy_tree(src: &Path, dst: &Path, cancel: &AtomicBool) -> std::io::Result<usize> {
    std::fs::create_dir_all(dst)?;
    let mut files = 0;

    let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.depth() > 0
            && EXCLUDED_DIRS.iter().any(|d| e.file_name() == *d))
    });

    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "fixture copy cancelled",
            ));
        }
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    Ok(files)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
