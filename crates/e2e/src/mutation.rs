//! Fixture file edits - the in-test stand-in for a developer saving a file

use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Resolve `relative` inside `root`, refusing paths that would leave it
pub fn resolve_in(root: &Path, relative: &str) -> HarnessResult<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(HarnessError::InvalidConfig(format!(
            "fixture path {:?} must be relative to the workspace",
            relative
        )));
    }
    Ok(root.join(rel))
}

/// Read a fixture file, transform its text and write it back
pub async fn update_file<F>(root: &Path, relative: &str, replacer: F) -> HarnessResult<()>
where
    F: FnOnce(&str) -> String,
{
    let path = resolve_in(root, relative)?;
    let content = tokio::fs::read_to_string(&path).await?;
    let updated = replacer(&content);

    if updated == content {
        warn!("Edit of {} left the file unchanged", relative);
    } else {
        debug!("Rewriting {} ({} -> {} bytes)", relative, content.len(), updated.len());
    }

    tokio::fs::write(&path, updated).await?;
    Ok(())
}

/// Create or overwrite a fixture file
pub async fn write_file(root: &Path, relative: &str, contents: &str) -> HarnessResult<()> {
    let path = resolve_in(root, relative)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    debug!("Writing {} ({} bytes)", relative, contents.len());
    tokio::fs::write(&path, contents).await?;
    Ok(())
}

/// Replace the first occurrence of `from`
pub fn replace_first(content: &str, from: &str, to: &str) -> String {
    content.replacen(from, to, 1)
}
