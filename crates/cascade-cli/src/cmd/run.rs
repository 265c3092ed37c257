use super::Project;
use crate::output::print_json;
use anyhow::Context;
use cascade_core::{
    driver::{RunOutcome, RunRequest, RunTarget},
    paths,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes (no std::process::exit in command code)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    SessionFailed { session: String, error: String },
    Blocked { session: String, missing: Vec<String> },
    /// `resume` is the command that picks the run up again.
    Cancelled { resume: Option<String> },
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::SessionFailed { .. } => 1,
            RunExit::Blocked { .. } => 2,
            RunExit::Cancelled { .. } => 130,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::SessionFailed { session, error } => {
                write!(f, "session '{session}' failed: {error}")
            }
            RunExit::Blocked { session, missing } => {
                write!(f, "session '{session}' is blocked; missing {}", missing.join(", "))
            }
            RunExit::Cancelled { resume: Some(resume) } => {
                write!(f, "cancelled; resume with `{resume}`")
            }
            RunExit::Cancelled { resume: None } => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RunExit {}

impl RunExit {
    fn from_outcome(outcome: RunOutcome, args: &RunArgs) -> Option<Self> {
        match outcome {
            RunOutcome::Completed => None,
            RunOutcome::Failed { session, error, .. } => {
                Some(RunExit::SessionFailed { session, error })
            }
            RunOutcome::Blocked { session, missing } => Some(RunExit::Blocked { session, missing }),
            RunOutcome::Cancelled { next } => Some(RunExit::Cancelled {
                resume: next.map(|next| args.resume_command(&next)),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub struct RunArgs {
    pub session: Option<String>,
    pub force: bool,
    pub cascade: bool,
    pub dry_run: bool,
}

impl RunArgs {
    fn request(&self) -> RunRequest {
        match &self.session {
            Some(id) => RunRequest::session(id.clone())
                .force(self.force)
                .cascade(self.cascade),
            None => RunRequest::auto().force(self.force),
        }
    }

    /// Re-issue the interrupted command. Sessions that already finished are
    /// complete by then and get skipped, so only a session that never got to
    /// finish keeps its `--force`.
    fn resume_command(&self, next: &str) -> String {
        let Some(id) = &self.session else {
            return "cascade run --auto".to_string();
        };
        let mut cmd = format!("cascade run --session {id}");
        if self.force && id == next {
            cmd.push_str(" --force");
        }
        if self.cascade {
            cmd.push_str(" --cascade");
        }
        cmd
    }
}

pub fn run(project: &Project, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let loaded = project.load()?;
    let driver = &loaded.driver;
    let request = args.request();
    if let RunTarget::Session(id) = &request.target {
        driver.registry().require(id)?;
    }

    if args.dry_run {
        let plan = driver.plan(&request)?;
        if json {
            print_json(&plan)?;
        } else if plan.sessions.is_empty() && plan.blocked.is_none() {
            println!("Nothing to run.");
        } else {
            for (i, id) in plan.sessions.iter().enumerate() {
                println!("{:>2}. {id}", i + 1);
            }
        }
        if let Some(blocked) = plan.blocked {
            return Err(RunExit::Blocked {
                session: blocked.session,
                missing: blocked.missing_inputs,
            }
            .into());
        }
        return Ok(());
    }

    let executor = loaded
        .config
        .executor
        .build(project.root())
        .context("failed to set up executor")?
        .with_context(|| {
            format!(
                "no executor command configured; set executor.command in {}",
                paths::CONFIG_FILE
            )
        })?;

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let report = driver.run(&executor, &request, &cancel)?;

    if json {
        print_json(&report)?;
    } else {
        for r in &report.results {
            let secs = (r.finished_at - r.started_at).num_milliseconds() as f64 / 1000.0;
            if r.success {
                println!("  \u{2713} {} ({secs:.1}s)", r.session_id);
                for path in &r.written_artifacts {
                    println!("      {path}");
                }
            } else {
                println!("  \u{2717} {} ({secs:.1}s)", r.session_id);
            }
        }
        if report.is_success() {
            if report.results.is_empty() {
                println!("Nothing to run.");
            } else {
                println!("Ran {} session(s).", report.results.len());
            }
        }
    }

    match RunExit::from_outcome(report.outcome, &args) {
        None => Ok(()),
        Some(exit) => Err(exit.into()),
    }
}

/// Cancel the token on Ctrl-C. The driver stops before the next session and
/// the command executor kills the running child.
fn watch_ctrl_c(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!("ctrl-c handler unavailable: {e}");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted; stopping");
                cancel.cancel();
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(session: Option<&str>, force: bool, cascade: bool) -> RunArgs {
        RunArgs {
            session: session.map(str::to_string),
            force,
            cascade,
            dry_run: false,
        }
    }

    fn cancelled_at(next: &str, args: &RunArgs) -> String {
        RunExit::from_outcome(
            RunOutcome::Cancelled {
                next: Some(next.into()),
            },
            args,
        )
        .unwrap()
        .to_string()
    }

    #[test]
    fn exit_codes_follow_outcome() {
        let auto = args(None, false, false);
        assert!(RunExit::from_outcome(RunOutcome::Completed, &auto).is_none());
        let blocked = RunExit::from_outcome(
            RunOutcome::Blocked {
                session: "tech-stack".into(),
                missing: vec!["journey.md".into()],
            },
            &auto,
        )
        .unwrap();
        assert_eq!(blocked.exit_code(), 2);
        assert!(blocked.to_string().contains("journey.md"));
        let cancelled = RunExit::from_outcome(
            RunOutcome::Cancelled {
                next: Some("screens".into()),
            },
            &auto,
        )
        .unwrap();
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn resume_hint_repeats_the_original_command() {
        assert!(cancelled_at("screens", &args(None, false, false))
            .ends_with("resume with `cascade run --auto`"));
        assert!(cancelled_at("screens", &args(Some("architecture"), false, true))
            .ends_with("`cascade run --session architecture --cascade`"));
        assert!(cancelled_at("user-journey", &args(Some("user-journey"), true, false))
            .ends_with("`cascade run --session user-journey --force`"));
        assert!(cancelled_at("screens", &args(Some("user-journey"), true, true))
            .ends_with("`cascade run --session user-journey --cascade`"));
        let none = RunExit::from_outcome(RunOutcome::Cancelled { next: None }, &args(None, false, false))
            .unwrap();
        assert_eq!(none.to_string(), "cancelled");
    }

    #[test]
    fn auto_always_cascades() {
        let req = args(None, false, false).request();
        assert_eq!(req.target, RunTarget::Auto);
        assert!(req.cascade);
    }
}
