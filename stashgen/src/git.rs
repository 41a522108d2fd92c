// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Repository synchronization for generated output.
///
/// Drives the git command line through a fixed checkout, rebase, commit and
/// forced push sequence. Failures never abort the program; they are folded
/// into a [`SyncResult`] and logged.
use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use masterror::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{config::SyncSettings, error};

/// Outcome of one command in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct StepOutcome
{
    /// Command line without the program name, e.g. `add .`.
    pub command:   String,
    /// Whether the command ran and exited with status zero.
    pub succeeded: bool,
    /// Exit code when the process ran to completion.
    pub exit_code: Option<i32,>,
    /// Captured stderr, or the spawn error when the process never started.
    pub detail:    String,
}

/// Aggregate result of a synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize,)]
pub struct SyncResult
{
    /// `false` only when some step could not be executed at all.
    pub ok:      bool,
    /// Human-readable summary; carries the captured error text on failure.
    pub message: String,
    /// Per-step outcomes in execution order.
    pub steps:   Vec<StepOutcome,>,
}

/// Publishes the repository's working tree to its remote.
pub trait VersionControl
{
    /// Synchronizes the repository at `repo_path`.
    fn sync(&self, repo_path: &Path,) -> SyncResult;
}

/// [`VersionControl`] backed by the git executable.
#[derive(Debug, Clone,)]
pub struct GitCli
{
    program:        PathBuf,
    remote:         String,
    branch:         String,
    commit_message: String,
}

impl GitCli
{
    /// Builds a driver from sync settings.
    pub fn new(settings: &SyncSettings,) -> Self
    {
        Self {
            program:        settings.program.clone(),
            remote:         settings.remote.clone(),
            branch:         settings.branch.clone(),
            commit_message: settings.commit_message.clone(),
        }
    }

    /// The fixed command sequence.
    ///
    /// The hard reset and the forced push are destructive: uncommitted changes
    /// to tracked files are discarded and the remote branch is overwritten.
    pub fn steps(&self,) -> Vec<Vec<String,>,>
    {
        let remote = self.remote.as_str();
        let branch = self.branch.as_str();
        [
            vec!["checkout", branch],
            vec!["reset", "--hard"],
            vec!["fetch", remote],
            vec!["pull", remote, branch, "--rebase"],
            vec!["add", "."],
            vec!["commit", "-m", self.commit_message.as_str()],
            vec!["push", remote, branch, "--force"],
        ]
        .into_iter()
        .map(|args| args.into_iter().map(str::to_owned,).collect(),)
        .collect()
    }
}

impl Default for GitCli
{
    fn default() -> Self
    {
        Self::new(&SyncSettings::default(),)
    }
}

impl VersionControl for GitCli
{
    fn sync(&self, repo_path: &Path,) -> SyncResult
    {
        info!("Syncing {} to {}/{}", repo_path.display(), self.remote, self.branch);

        let mut steps = Vec::new();
        let mut failures = Vec::new();

        for args in self.steps() {
            let command = args.join(" ",);
            let outcome = match run_git(&self.program, repo_path, &args,) {
                Ok(output,) => {
                    let succeeded = output.status.success();
                    let detail = String::from_utf8_lossy(&output.stderr,).trim().to_owned();
                    if succeeded {
                        debug!("git {command} succeeded");
                    } else {
                        warn!("git {command} exited with {}: {detail}", output.status);
                    }
                    StepOutcome {
                        command,
                        succeeded,
                        exit_code: output.status.code(),
                        detail,
                    }
                }
                Err(error,) => {
                    let detail = error::app_error_message(&error,);
                    warn!("git {command} could not be executed: {detail}");
                    failures.push(detail.clone(),);
                    StepOutcome {
                        command,
                        succeeded: false,
                        exit_code: None,
                        detail,
                    }
                }
            };
            steps.push(outcome,);
        }

        if failures.is_empty() {
            let failed = steps.iter().filter(|step| !step.succeeded,).count();
            let message = if failed == 0 {
                "synced".to_owned()
            } else {
                format!("synced with {failed} step(s) reporting a non-zero exit")
            };
            SyncResult {
                ok: true,
                message,
                steps,
            }
        } else {
            SyncResult {
                ok: false,
                message: failures.join("; ",),
                steps,
            }
        }
    }
}

fn run_git(program: &Path, repo_path: &Path, args: &[String],) -> Result<Output, AppError,>
{
    Command::new(program,)
        .args(args,)
        .current_dir(repo_path,)
        .output()
        .map_err(|e| {
            AppError::service(format!("{} {} failed to start: {e}", program.display(), args.join(" "),),)
        },)
}
