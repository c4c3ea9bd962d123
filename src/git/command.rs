//! Subprocess git invocation

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::BackendError;

/// Commit identity passed to git via `-c user.name=... -c user.email=...`
///
/// Rebasing and committing both create commits, so both need an identity.
/// When unset, git falls back to the user's own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Author and committer name
    pub name: String,
    /// Author and committer email
    pub email: String,
}

/// Handle for running git commands against one working tree
#[derive(Debug, Clone)]
pub struct Git {
    program: Vec<String>,
    workdir: PathBuf,
    identity: Option<Identity>,
}

impl Git {
    /// Run plain `git` in `workdir`
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: vec!["git".to_string()],
            workdir: workdir.into(),
            identity: None,
        }
    }

    /// Use a configured program line instead of plain `git`
    ///
    /// The line is split with shell quoting rules, so
    /// `git -c rerere.enabled=true` works as expected.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is empty or cannot be split
    pub fn with_program(mut self, command_line: &str) -> Result<Self> {
        self.program = split_program(command_line)?;
        Ok(self)
    }

    /// Set the identity used for commits
    #[must_use]
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    /// Working tree the commands run in
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Build a command with the program, identity flags and working directory
    /// applied. Output is forced to the C locale so messages can be matched.
    #[must_use]
    pub fn command(&self) -> Command {
        let (program, prefix) = self
            .program
            .split_first()
            .map_or(("git", &[][..]), |(p, rest)| (p.as_str(), rest));

        let mut cmd = Command::new(program);
        cmd.args(prefix);
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        cmd.current_dir(&self.workdir);
        cmd.env("LC_ALL", "C");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    /// Run a command and capture its output whatever the exit status
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be spawned
    pub fn probe(&self, args: &[&str]) -> Result<Output, BackendError> {
        let line = display_args(args);
        debug!(command = %line, workdir = %self.workdir.display(), "Probing git");
        let output = self.command().args(args).output()?;
        Ok(output)
    }

    /// Run a command that mutates the repository, failing on non-zero exit
    ///
    /// Every mutating command is logged at info level so a run leaves a full
    /// trace of what was attempted.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::CommandFailed`] on a non-zero exit
    pub fn run(&self, args: &[&str]) -> Result<Output, BackendError> {
        let line = display_args(args);
        info!(command = %line, "+ git");
        let output = self.command().args(args).output()?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(BackendError::CommandFailed {
                command: line,
                stderr: combined_output(&output),
            })
        }
    }

    /// Run a read-only command and return its trimmed stdout
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::CommandFailed`] on a non-zero exit
    pub fn stdout(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = self.probe(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(BackendError::CommandFailed {
                command: display_args(args),
                stderr: combined_output(&output),
            })
        }
    }
}

/// Split a program line such as `git -c rerere.enabled=true` into argv
///
/// The result is an executable plus leading arguments, never a shell script.
fn split_program(line: &str) -> Result<Vec<String>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        bail!("Git program line is empty");
    }
    let argv = shell_words::split(trimmed)
        .with_context(|| format!("Failed to parse git program line '{trimmed}'"))?;
    if argv.is_empty() {
        bail!("Git program line '{trimmed}' names no program");
    }
    Ok(argv)
}

fn display_args(args: &[&str]) -> String {
    format!("git {}", shell_words::join(args))
}

/// Stdout and stderr of a finished command, trimmed and joined
///
/// Git reports some failures (e.g. `CONFLICT` lines during a rebase) on
/// stdout, so both streams are kept.
#[must_use]
pub(crate) fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim(), stderr.trim()) {
        ("", "") => "(no output)".to_string(),
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{out}\n{err}"),
    }
}
