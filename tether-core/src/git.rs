//! Thin async wrapper over the `git` binary
//!
//! Used by the work-state serializer (async) and by reconstruction validity
//! checks (blocking).
//! Output parsing lives in free functions so it can be tested without a
//! repository.

use crate::error::{Error, Result};
use crate::types::{ChangeKind, FileChange, VcsStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(args = ?args, stderr = %stderr.trim(), "Git command failed");
        }

        Ok(output)
    }

    /// Run and return stdout, treating a non-zero exit as an error
    pub async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("git {} failed: {}", args.join(" "), stderr.trim()),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Branch, change counts and the changed-file list
    pub async fn status(&self) -> Result<(VcsStatus, Vec<FileChange>)> {
        let stdout = self
            .run_checked(&["status", "--porcelain=v1", "--branch"])
            .await?;
        Ok(parse_porcelain(&stdout))
    }

    /// Per-file line deltas of the working tree against HEAD
    pub async fn numstat(&self) -> Result<HashMap<String, (u32, u32)>> {
        let stdout = self.run_checked(&["diff", "HEAD", "--numstat"]).await?;
        Ok(parse_numstat(&stdout))
    }

    pub async fn commit_count(&self) -> Result<u32> {
        let stdout = self.run_checked(&["rev-list", "--count", "HEAD"]).await?;
        stdout
            .trim()
            .parse()
            .map_err(|e| Error::Internal(format!("unexpected rev-list output: {}", e)))
    }
}

/// Whether `branch` exists locally in the repository at `dir`.
///
/// Blocking. `None` when git cannot answer (not installed, not a repository).
pub fn local_branch_exists(dir: &Path, branch: &str) -> Option<bool> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("refs/heads/{}", branch))
        .current_dir(dir)
        .output()
        .ok()?;
    match output.status.code() {
        Some(0) => Some(true),
        Some(1) => Some(false),
        _ => None,
    }
}

/// Parse `git status --porcelain=v1 --branch`.
pub fn parse_porcelain(output: &str) -> (VcsStatus, Vec<FileChange>) {
    let mut status = VcsStatus::default();
    let mut changes = Vec::new();

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            status.branch = parse_branch_header(header);
            continue;
        }
        if line.len() < 4 {
            continue;
        }

        let mut chars = line.chars();
        let (x, y) = match (chars.next(), chars.next()) {
            (Some(x), Some(y)) => (x, y),
            _ => continue,
        };
        let raw_path = &line[3..];
        let path = raw_path
            .rsplit_once(" -> ")
            .map(|(_, to)| to)
            .unwrap_or(raw_path)
            .trim_matches('"')
            .to_string();

        let change = if x == '?' && y == '?' {
            status.untracked += 1;
            ChangeKind::Untracked
        } else {
            if x != ' ' {
                status.staged += 1;
            }
            if y != ' ' {
                status.unstaged += 1;
            }
            match (x, y) {
                ('A', _) | (_, 'A') => ChangeKind::Added,
                ('D', _) | (_, 'D') => ChangeKind::Deleted,
                ('R', _) | (_, 'R') => ChangeKind::Renamed,
                _ => ChangeKind::Modified,
            }
        };

        changes.push(FileChange {
            path,
            change,
            lines_added: 0,
            lines_removed: 0,
        });
    }

    (status, changes)
}

fn parse_branch_header(header: &str) -> Option<String> {
    if header.starts_with("HEAD (no branch)") {
        return None;
    }
    let header = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
        .unwrap_or(header);
    let branch = header
        .split("...")
        .next()
        .unwrap_or(header)
        .split_whitespace()
        .next()?;
    Some(branch.to_string())
}

/// Parse `git diff --numstat`. Binary files count as zero lines.
pub fn parse_numstat(output: &str) -> HashMap<String, (u32, u32)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?.parse().unwrap_or(0);
            let removed = parts.next()?.parse().unwrap_or(0);
            let path = parts.next()?.to_string();
            Some((path, (added, removed)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain() {
        let output = "## feat/auth...origin/feat/auth [ahead 2]\n M src/lib.rs\nM  src/main.rs\nMM src/both.rs\n?? notes.md\nR  old.rs -> new.rs\n D gone.rs\nA  added.rs\n";
        let (status, changes) = parse_porcelain(output);

        assert_eq!(status.branch.as_deref(), Some("feat/auth"));
        assert_eq!(status.staged, 4);
        assert_eq!(status.unstaged, 3);
        assert_eq!(status.untracked, 1);
        assert_eq!(changes.len(), 7);

        let renamed = changes.iter().find(|c| c.path == "new.rs").unwrap();
        assert_eq!(renamed.change, ChangeKind::Renamed);
        let gone = changes.iter().find(|c| c.path == "gone.rs").unwrap();
        assert_eq!(gone.change, ChangeKind::Deleted);
        let notes = changes.iter().find(|c| c.path == "notes.md").unwrap();
        assert_eq!(notes.change, ChangeKind::Untracked);
    }

    #[test]
    fn test_parse_branch_headers() {
        assert_eq!(parse_branch_header("main"), Some("main".to_string()));
        assert_eq!(
            parse_branch_header("No commits yet on trunk"),
            Some("trunk".to_string())
        );
        assert_eq!(parse_branch_header("HEAD (no branch)"), None);
    }

    #[test]
    fn test_clean_tree() {
        let (status, changes) = parse_porcelain("## main\n");
        assert!(status.is_clean());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_parse_numstat() {
        let stats = parse_numstat("10\t2\tsrc/lib.rs\n-\t-\tlogo.png\n");
        assert_eq!(stats["src/lib.rs"], (10, 2));
        assert_eq!(stats["logo.png"], (0, 0));
    }

    #[test]
    fn test_branch_lookup_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(local_branch_exists(dir.path(), "main"), None);
    }

    #[tokio::test]
    async fn test_status_outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRunner::new(dir.path()).status().await.is_err());
    }
}
