//! Session executors.
//!
//! The driver does not know how session content is produced. It hands an
//! executor the session, its available inputs and a private staging
//! directory, and gets back success or failure. Whatever the executor writes
//! to the staging directory is promoted into the artifact store only on
//! success.
//!
//! # Command executor environment
//! - `CASCADE_SESSION`, `CASCADE_SESSION_TITLE`
//! - `CASCADE_ARTIFACTS_DIR`: the artifact store root (read inputs here)
//! - `CASCADE_STAGING_DIR`: where outputs must be written
//! - `CASCADE_INPUTS`: newline-separated absolute paths of present inputs
//! - `CASCADE_OUTPUTS`: newline-separated output patterns

use crate::error::{CascadeError, Result};
use crate::session::SessionDefinition;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 20;

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

pub struct ExecutionRequest<'a> {
    pub session: &'a SessionDefinition,
    pub artifacts_dir: &'a Path,
    /// Absolute paths of required and optional inputs that exist right now.
    pub available_inputs: Vec<PathBuf>,
    pub staging_dir: &'a Path,
    /// Set when the user asks the run to stop. Long-running executors should
    /// poll it and give up early.
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorOutcome {
    Succeeded,
    Failed(String),
}

impl ExecutorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutorOutcome::Succeeded)
    }
}

pub trait SessionExecutor: Send + Sync {
    fn execute(&self, request: &ExecutionRequest<'_>) -> ExecutorOutcome;
}

// ---------------------------------------------------------------------------
// CommandExecutor
// ---------------------------------------------------------------------------

/// Runs a shell command per session. `{session}` in the command is replaced
/// with the session id.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: PathBuf,
    command: String,
    working_dir: PathBuf,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(
        shell: &str,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let shell = which::which(shell).map_err(|_| CascadeError::ShellNotFound(shell.to_string()))?;
        Ok(Self {
            shell,
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
        })
    }

    pub fn render_command(&self, session: &SessionDefinition) -> String {
        self.command.replace("{session}", session.id())
    }

    fn spawn(&self, request: &ExecutionRequest<'_>) -> std::io::Result<std::process::Child> {
        let session = request.session;
        let join_lines = |items: Vec<String>| items.join("\n");

        Command::new(&self.shell)
            .arg("-c")
            .arg(self.render_command(session))
            .current_dir(&self.working_dir)
            .env("CASCADE_SESSION", session.id())
            .env("CASCADE_SESSION_TITLE", session.title())
            .env("CASCADE_ARTIFACTS_DIR", request.artifacts_dir)
            .env("CASCADE_STAGING_DIR", request.staging_dir)
            .env(
                "CASCADE_INPUTS",
                join_lines(
                    request
                        .available_inputs
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                ),
            )
            .env(
                "CASCADE_OUTPUTS",
                join_lines(session.outputs().iter().map(|o| o.to_string()).collect()),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl SessionExecutor for CommandExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> ExecutorOutcome {
        let id = request.session.id();
        let mut child = match self.spawn(request) {
            Ok(child) => child,
            Err(e) => return ExecutorOutcome::Failed(format!("failed to spawn command: {e}")),
        };
        debug!(session = id, pid = child.id(), "executor command started");

        // Both pipes are drained on threads so the child never blocks on a
        // full pipe while the main loop polls for exit. Everything the command
        // prints goes to our stderr; stdout belongs to the caller's own output.
        // Only stderr is kept for the failure message.
        let stdout_fwd = child.stdout.take().map(|pipe| forward_lines(pipe, 0));
        let stderr_tail = child.stderr.take().map(|pipe| forward_lines(pipe, STDERR_TAIL_LINES));
        let collect_tail = |handle: Option<std::thread::JoinHandle<String>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return ExecutorOutcome::Failed(format!("failed to wait for command: {e}")),
            }
            let reason = if request.cancel.is_cancelled() {
                Some("cancelled".to_string())
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                Some(format!(
                    "timed out after {}s",
                    self.timeout.unwrap_or_default().as_secs()
                ))
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(session = id, %reason, "killing executor command");
                let _ = child.kill();
                let _ = child.wait();
                // The pipe readers are left to finish on their own: a
                // grandchild of the shell may still hold the pipes open.
                return ExecutorOutcome::Failed(reason);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        collect_tail(stdout_fwd);
        let tail = collect_tail(stderr_tail);
        if status.success() {
            ExecutorOutcome::Succeeded
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            if tail.is_empty() {
                ExecutorOutcome::Failed(format!("command exited with {code}"))
            } else {
                ExecutorOutcome::Failed(format!("command exited with {code}: {tail}"))
            }
        }
    }
}

/// Copy lines from `pipe` to stderr on a background thread, returning the
/// last `keep` lines joined when the pipe closes.
fn forward_lines<R: Read + Send + 'static>(pipe: R, keep: usize) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(keep);
        for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
            eprintln!("{line}");
            if keep == 0 {
                continue;
            }
            if tail.len() == keep {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session() -> SessionDefinition {
        SessionDefinition::new("user-journey", 1)
            .title("User Journey")
            .outputs(["journey.md"])
            .build()
            .unwrap()
    }

    fn run(cmd: &str, timeout: Option<Duration>, cancel: &CancellationToken) -> (ExecutorOutcome, TempDir) {
        let project = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let exec = CommandExecutor::new("sh", cmd, project.path(), timeout).unwrap();
        let s = session();
        let req = ExecutionRequest {
            session: &s,
            artifacts_dir: project.path(),
            available_inputs: Vec::new(),
            staging_dir: staging.path(),
            cancel,
        };
        (exec.execute(&req), staging)
    }

    #[test]
    fn command_writes_into_staging() {
        let cancel = CancellationToken::new();
        let (outcome, staging) = run(
            r##"echo "# $CASCADE_SESSION_TITLE" > "$CASCADE_STAGING_DIR/$CASCADE_OUTPUTS""##,
            None,
            &cancel,
        );
        assert_eq!(outcome, ExecutorOutcome::Succeeded);
        let body = std::fs::read_to_string(staging.path().join("journey.md")).unwrap();
        assert_eq!(body.trim(), "# User Journey");
    }

    #[test]
    fn chatty_stdout_does_not_block_or_fail() {
        let cancel = CancellationToken::new();
        let (outcome, staging) = run(
            r##"i=0; while [ $i -lt 5000 ]; do echo "progress line $i"; i=$((i+1)); done; echo done > "$CASCADE_STAGING_DIR/journey.md""##,
            Some(Duration::from_secs(30)),
            &cancel,
        );
        assert_eq!(outcome, ExecutorOutcome::Succeeded);
        assert!(staging.path().join("journey.md").is_file());
    }

    #[test]
    fn stdout_is_not_part_of_the_failure_message() {
        let cancel = CancellationToken::new();
        let (outcome, _staging) = run("echo chatter; echo broken >&2; exit 1", None, &cancel);
        match outcome {
            ExecutorOutcome::Failed(msg) => {
                assert!(msg.contains("broken"), "{msg}");
                assert!(!msg.contains("chatter"), "{msg}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn session_placeholder_is_substituted() {
        let exec = CommandExecutor::new("sh", "run-{session}.sh", ".", None).unwrap();
        assert_eq!(exec.render_command(&session()), "run-user-journey.sh");
    }

    #[test]
    fn non_zero_exit_reports_stderr_tail() {
        let cancel = CancellationToken::new();
        let (outcome, _staging) = run("echo 'model unavailable' >&2; exit 3", None, &cancel);
        match outcome {
            ExecutorOutcome::Failed(msg) => {
                assert!(msg.contains("exited with 3"), "{msg}");
                assert!(msg.contains("model unavailable"), "{msg}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_the_command() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let (outcome, _staging) = run("sleep 5", Some(Duration::from_millis(200)), &cancel);
        assert!(matches!(outcome, ExecutorOutcome::Failed(ref m) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cancellation_kills_the_command() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (outcome, _staging) = run("sleep 5", None, &cancel);
        assert_eq!(outcome, ExecutorOutcome::Failed("cancelled".to_string()));
    }

    #[test]
    fn missing_shell_is_a_configuration_error() {
        let err = CommandExecutor::new("definitely-not-a-shell-xyz", "true", ".", None).unwrap_err();
        assert!(err.is_configuration());
    }
}
