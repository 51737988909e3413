// src/exec/shell.rs

//! Runner that executes a shell command.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::OperationStatus;
use crate::engine::RunnerContext;
use crate::exec::runner::{OperationRunner, RunnerFuture};
use crate::watch::{fingerprint_profile, WatchProfile};

/// Runs `cmd` through the platform shell.
///
/// - exit status 0: `Success`;
/// - any other exit status: error, recorded as `Failure`;
/// - cancellation while running: the child is killed, `Cancelled`.
///
/// With a fingerprint configured, the command is skipped (`NoOp`) when the
/// watched files hash the same as they did before the last successful run.
#[derive(Debug)]
pub struct ShellRunner {
    name: String,
    command: String,
    working_dir: Option<PathBuf>,
    silent: bool,
    fingerprint: Option<Fingerprint>,
}

#[derive(Debug)]
struct Fingerprint {
    root: PathBuf,
    profile: WatchProfile,
    last_success: Mutex<Option<String>>,
}

impl ShellRunner {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: None,
            silent: false,
            fingerprint: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Skip the command when files matched by `profile` under `root` are
    /// unchanged since the last successful run.
    pub fn with_fingerprint(mut self, root: impl Into<PathBuf>, profile: WatchProfile) -> Self {
        self.fingerprint = Some(Fingerprint {
            root: root.into(),
            profile,
            last_success: Mutex::new(None),
        });
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn run(&self, context: RunnerContext) -> Result<OperationStatus> {
        let fingerprint = match &self.fingerprint {
            Some(fp) => Some(self.compute_fingerprint(fp).await?),
            None => None,
        };

        if let (Some(fp), Some(hash)) = (&self.fingerprint, &fingerprint) {
            let last = fp.last_success.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(hash.as_str()) {
                info!(operation = %self.name, "watched files unchanged; skipping");
                return Ok(OperationStatus::NoOp);
            }
        }

        let status = self.spawn_and_wait(&context).await?;

        if let (OperationStatus::Success, Some(fp), Some(hash)) =
            (status, &self.fingerprint, fingerprint)
        {
            *fp.last_success.lock().unwrap_or_else(PoisonError::into_inner) = Some(hash);
        }
        Ok(status)
    }

    async fn compute_fingerprint(&self, fp: &Fingerprint) -> Result<String> {
        let root = fp.root.clone();
        let profile = fp.profile.clone();
        tokio::task::spawn_blocking(move || fingerprint_profile(&root, &profile))
            .await
            .with_context(|| format!("hashing watched files for operation '{}'", self.name))?
    }

    async fn spawn_and_wait(&self, context: &RunnerContext) -> Result<OperationStatus> {
        info!(operation = %self.name, cmd = %self.command, first_run = context.is_first_run(), "starting command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for operation '{}'", self.name))?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(self.name.clone(), "stdout", stdout, self.silent);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(self.name.clone(), "stderr", stderr, self.silent);
        }

        tokio::select! {
            exit = child.wait() => {
                let exit = exit.with_context(|| {
                    format!("waiting for process of operation '{}'", self.name)
                })?;
                if exit.success() {
                    debug!(operation = %self.name, "command succeeded");
                    Ok(OperationStatus::Success)
                } else {
                    match exit.code() {
                        Some(code) => bail!("command `{}` exited with status {code}", self.command),
                        None => bail!("command `{}` was terminated by a signal", self.command),
                    }
                }
            }
            _ = context.cancellation_token().cancelled() => {
                info!(operation = %self.name, "cancellation requested; killing process");
                if let Err(err) = child.kill().await {
                    warn!(operation = %self.name, error = %err, "failed to kill child process on cancellation");
                }
                Ok(OperationStatus::Cancelled)
            }
        }
    }
}

impl OperationRunner for ShellRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn silent(&self) -> bool {
        self.silent
    }

    fn execute(&self, context: RunnerContext) -> RunnerFuture<'_> {
        Box::pin(self.run(context))
    }
}

/// Drain a child pipe into the log so the buffer never fills.
fn forward_lines<R>(operation: String, stream: &'static str, pipe: R, silent: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if silent {
                debug!(operation = %operation, stream, "{line}");
            } else {
                info!(operation = %operation, stream, "{line}");
            }
        }
    });
}
