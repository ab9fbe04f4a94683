//! Best-effort git auto-commit after a written synthesis run.
//!
//! Missing `git` or a working directory outside a repository is a silent
//! no-op; git failures are logged and never fail the run.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

pub(crate) fn commit_message(axioms: usize) -> String {
    format!("soul: synthesize {axioms} axioms")
}

/// Stage `paths` and commit them.  Returns `true` when a commit was made.
pub(crate) async fn auto_commit(repo_root: &Path, paths: &[PathBuf], axioms: usize) -> Result<bool> {
    let inside = tokio::process::Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(repo_root)
        .output()
        .await;
    match inside {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false), // no git
        Err(e) => return Err(e.into()),
        Ok(o) if !o.status.success() => return Ok(false), // not a repository
        Ok(_) => {}
    }

    let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
    if existing.is_empty() {
        return Ok(false);
    }

    let add = tokio::process::Command::new("git")
        .arg("add")
        .arg("--")
        .args(&existing)
        .current_dir(repo_root)
        .output()
        .await?;
    if !add.status.success() {
        warn!(
            stderr = %String::from_utf8_lossy(&add.stderr),
            "git add failed (non-fatal)"
        );
        return Ok(false);
    }

    // `git diff --cached --quiet` exits 0 when nothing is staged.
    let staged = tokio::process::Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(repo_root)
        .status()
        .await?;
    if staged.success() {
        return Ok(false);
    }

    let msg = commit_message(axioms);
    let commit = tokio::process::Command::new("git")
        .args(["commit", "-m", &msg, "--no-verify"])
        .current_dir(repo_root)
        .output()
        .await?;
    if !commit.status.success() {
        warn!(
            stderr = %String::from_utf8_lossy(&commit.stderr),
            "git commit failed (non-fatal)"
        );
        return Ok(false);
    }

    info!(%msg, "auto-committed synthesis output");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_axiom_count() {
        assert_eq!(commit_message(7), "soul: synthesize 7 axioms");
    }

    #[tokio::test]
    async fn outside_a_repository_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("SOUL.md");
        std::fs::write(&doc, "# SOUL").unwrap();
        let committed = auto_commit(dir.path(), &[doc], 1).await.unwrap();
        assert!(!committed);
    }
}
