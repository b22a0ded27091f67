//! Branch discovery abstraction
//!
//! CI checkouts frequently leave the work tree on a detached HEAD, so the
//! branch name handed to identifier resolution has to be re-discovered from
//! the refs that point at the current commit. All git access goes through
//! [`ProcessRunner`] so the discovery logic is testable without a repository.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::subprocess::{ProcessCommand, ProcessRunner};
use crate::{Error, Result};

#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Name of the checked-out branch, resolving detached HEAD states
    async fn discover_branch(&self) -> Result<String>;

    /// Full hash of the current commit
    async fn head_commit(&self) -> Result<String>;
}

pub struct GitVcsClient {
    runner: Arc<dyn ProcessRunner>,
    working_dir: Option<PathBuf>,
}

impl GitVcsClient {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn git(&self, args: &[&str], description: &str) -> Result<String> {
        let mut command = ProcessCommand::new("git").args(args.iter().copied());
        if let Some(dir) = &self.working_dir {
            command = command.working_dir(dir.clone());
        }

        let output = self.runner.run(command).await?;
        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "git {} failed: {}",
                description,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout_trimmed().to_string())
    }
}

#[async_trait]
impl VcsClient for GitVcsClient {
    async fn discover_branch(&self) -> Result<String> {
        let branch = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"], "rev-parse")
            .await?;

        if branch != "HEAD" && !branch.is_empty() {
            return Ok(branch);
        }

        // Detached HEAD: fall back to whichever local branch points at it.
        tracing::debug!("Detached HEAD detected, discovering branch from refs");
        let refs = self
            .git(
                &[
                    "for-each-ref",
                    "--points-at",
                    "HEAD",
                    "--format=%(refname:short)",
                    "refs/heads",
                ],
                "for-each-ref",
            )
            .await?;

        refs.lines()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                Error::Vcs("unable to discover a branch for the current commit".to_string())
            })
    }

    async fn head_commit(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"], "rev-parse").await
    }
}

/// Mock VCS client with fixed answers
pub struct MockVcsClient {
    branch: std::result::Result<String, String>,
    commit: std::result::Result<String, String>,
}

impl MockVcsClient {
    pub fn new(branch: &str, commit: &str) -> Self {
        Self {
            branch: Ok(branch.to_string()),
            commit: Ok(commit.to_string()),
        }
    }

    pub fn unavailable(message: &str) -> Self {
        Self {
            branch: Err(message.to_string()),
            commit: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl VcsClient for MockVcsClient {
    async fn discover_branch(&self) -> Result<String> {
        self.branch.clone().map_err(Error::Vcs)
    }

    async fn head_commit(&self) -> Result<String> {
        self.commit.clone().map_err(Error::Vcs)
    }
}
