//! Build metadata from the surrounding git checkout

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::fs::{find_git_root, FsError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub git_commit: String,
    pub git_branch: String,
    pub git_tag: String,
    pub git_dirty: bool,
    /// Tag if HEAD is tagged, else the commit; `-dirty` appended when needed
    pub git_version: String,
    pub build_time: String,
    pub build_dir: PathBuf,
}

/// Collect build info for `dir`, or for the repository enclosing the
/// working directory.
///
/// Git commands that fail leave their field empty.
pub fn collect(dir: Option<&Path>) -> Result<BuildInfo, FsError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => find_git_root()?,
    };

    let git_commit = git(&dir, &["rev-parse", "HEAD"]).unwrap_or_default();
    let git_branch = git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_default();
    let git_tag = git(&dir, &["tag", "--points-at", "HEAD"]).unwrap_or_default();
    let git_dirty = git(&dir, &["status", "--porcelain"])
        .map(|status| !status.is_empty())
        .unwrap_or(false);

    Ok(BuildInfo {
        git_version: version_string(&git_commit, &git_tag, git_dirty),
        git_commit,
        git_branch,
        git_tag,
        git_dirty,
        build_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        build_dir: dir,
    })
}

fn version_string(commit: &str, tag: &str, dirty: bool) -> String {
    let base = if tag.is_empty() { commit } else { tag };
    if dirty {
        format!("{base}-dirty")
    } else {
        base.to_string()
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        trace!(args = ?args, status = %output.status, "git command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
