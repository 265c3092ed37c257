//! Cascade driver.
//!
//! Runs sessions one at a time in dependency order. Each run:
//!
//! 1. resolves state for every session,
//! 2. picks the frontier (an explicit session, or the first runnable/stale
//!    session in topological order),
//! 3. hands the session to the executor with a fresh staging directory,
//! 4. on success, checks every declared output was staged and promotes the
//!    staging directory into the store,
//! 5. re-resolves and, in cascade mode, moves to the next session.
//!
//! A failed session halts the run and nothing from its staging directory
//! reaches the store. Cancellation is checked before each session; a session
//! that fails because the token fired mid-run is reported as cancelled, not
//! failed.

use crate::error::Result;
use crate::executor::{ExecutionRequest, ExecutorOutcome, SessionExecutor};
use crate::graph::DependencyGraph;
use crate::pattern::{ArtifactPattern, PatternKind};
use crate::registry::SessionRegistry;
use crate::resolver::{Resolution, SessionState, StateResolver, DEFAULT_WORKERS};
use crate::session::SessionDefinition;
use crate::store::ArtifactStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Session(String),
    /// Resume from the first session that is runnable or stale.
    Auto,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: RunTarget,
    /// Re-run an explicit session even when it is complete.
    pub force: bool,
    /// Keep going with downstream sessions after the first one.
    pub cascade: bool,
}

impl RunRequest {
    /// Run exactly one session.
    pub fn session(id: impl Into<String>) -> Self {
        Self {
            target: RunTarget::Session(id.into()),
            force: false,
            cascade: false,
        }
    }

    /// Run every runnable or stale session until nothing is left.
    pub fn auto() -> Self {
        Self {
            target: RunTarget::Auto,
            force: false,
            cascade: true,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub session_id: String,
    pub written_artifacts: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// The session was complete and re-ran because it was forced.
    pub forced: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executor reported failure, or claimed success without producing
    /// every declared output.
    Executor,
    /// Staging or promoting artifacts failed.
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed {
        session: String,
        kind: FailureKind,
        error: String,
    },
    Blocked {
        session: String,
        missing: Vec<String>,
    },
    Cancelled {
        next: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub results: Vec<ExecutionResult>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// What a run would execute, computed without executing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub sessions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<Resolution>,
}

// ---------------------------------------------------------------------------
// CascadeDriver
// ---------------------------------------------------------------------------

pub struct CascadeDriver {
    registry: SessionRegistry,
    graph: DependencyGraph,
    store: ArtifactStore,
    workers: usize,
}

impl CascadeDriver {
    /// Build the dependency graph. Fails on configuration errors such as a
    /// dependency cycle.
    pub fn new(registry: SessionRegistry, store: ArtifactStore) -> Result<Self> {
        let graph = DependencyGraph::build(&registry)?;
        Ok(Self {
            registry,
            graph,
            store,
            workers: DEFAULT_WORKERS,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn resolver(&self) -> StateResolver<'_> {
        StateResolver::new(&self.registry, &self.graph, &self.store).with_workers(self.workers)
    }

    /// Every session with its current state, in topological order.
    pub fn status_report(&self) -> Vec<Resolution> {
        self.resolver().resolve_all()
    }

    /// Sessions that could run right now.
    pub fn frontier(&self) -> Vec<Resolution> {
        self.status_report()
            .into_iter()
            .filter(|r| r.state.needs_run())
            .collect()
    }

    /// The session `RunTarget::Auto` would start with.
    pub fn next(&self) -> Option<Resolution> {
        self.status_report().into_iter().find(|r| r.state.needs_run())
    }

    /// Work out which sessions a run would execute, assuming every planned
    /// session succeeds.
    pub fn plan(&self, request: &RunRequest) -> Result<RunPlan> {
        let states: HashMap<String, Resolution> = self
            .status_report()
            .into_iter()
            .map(|r| (r.session.clone(), r))
            .collect();
        let start = match &request.target {
            RunTarget::Session(id) => Some(self.registry.require(id)?.id()),
            RunTarget::Auto => None,
        };
        let scope = self.scope(start)?;

        let mut planned: Vec<String> = Vec::new();
        for id in self.graph.topological_order() {
            if scope.as_ref().is_some_and(|s| !s.contains(id)) {
                continue;
            }
            if !request.cascade && start.is_some_and(|s| s != id) {
                continue;
            }
            let Some(r) = states.get(id) else { continue };
            let deps = self.graph.dependencies(id)?;
            let refreshed_upstream = deps.iter().any(|d| planned.iter().any(|p| p == *d));
            let wants = if start == Some(id) {
                r.state != SessionState::Complete || request.force
            } else {
                r.state.needs_run() || refreshed_upstream
            };
            if !wants {
                continue;
            }

            let still_missing = self.unsatisfied_inputs(id, r, &planned);
            if !still_missing.is_empty() {
                if start == Some(id) {
                    return Ok(RunPlan {
                        sessions: Vec::new(),
                        blocked: Some(r.clone()),
                    });
                }
                continue;
            }
            planned.push(id.to_string());
            if !request.cascade {
                break;
            }
        }

        Ok(RunPlan {
            sessions: planned,
            blocked: None,
        })
    }

    /// Inputs still missing once the `planned` sessions have produced their
    /// outputs.
    fn unsatisfied_inputs(&self, id: &str, r: &Resolution, planned: &[String]) -> Vec<String> {
        let Some(session) = self.registry.get(id) else {
            return Vec::new();
        };
        session
            .inputs()
            .iter()
            .filter(|input| r.missing_inputs.contains(&input.to_string()))
            .filter(|input| {
                !planned.iter().any(|p| {
                    self.registry
                        .get(p)
                        .is_some_and(|ps| ps.outputs().iter().any(|o| o.overlaps(input)))
                })
            })
            .map(|input| input.to_string())
            .collect()
    }

    /// The sessions a cascade started at `start` may touch: the session and
    /// everything downstream of it. `None` means no restriction.
    fn scope(&self, start: Option<&str>) -> Result<Option<HashSet<String>>> {
        let Some(start) = start else {
            return Ok(None);
        };
        let mut scope: HashSet<String> = self
            .graph
            .downstream_closure(start)?
            .into_iter()
            .map(str::to_string)
            .collect();
        scope.insert(start.to_string());
        Ok(Some(scope))
    }

    /// Execute a run. Unknown session ids are the only error; everything that
    /// goes wrong while executing is reported in the returned `RunReport`.
    pub fn run(
        &self,
        executor: &dyn SessionExecutor,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let mut results: Vec<ExecutionResult> = Vec::new();
        let mut executed: HashSet<String> = HashSet::new();

        let report = |results: Vec<ExecutionResult>, outcome: RunOutcome| {
            match &outcome {
                RunOutcome::Completed => {
                    info!(%run_id, executed = results.len(), "run completed")
                }
                other => warn!(%run_id, executed = results.len(), outcome = ?other, "run stopped"),
            }
            RunReport {
                run_id,
                results,
                outcome,
            }
        };

        let (mut current, scope, explicit) = match &request.target {
            RunTarget::Session(id) => {
                let session = self.registry.require(id)?;
                let resolution = self.resolver().resolve(id)?;
                let scope = if request.cascade {
                    self.scope(Some(session.id()))?
                } else {
                    None
                };
                match resolution.state {
                    SessionState::Blocked => {
                        let missing = if resolution.missing_inputs.is_empty() {
                            resolution.error.into_iter().collect()
                        } else {
                            resolution.missing_inputs
                        };
                        return Ok(report(
                            results,
                            RunOutcome::Blocked {
                                session: id.clone(),
                                missing,
                            },
                        ));
                    }
                    SessionState::Complete if !request.force => {
                        info!(session = %id, "session already complete");
                        if !request.cascade {
                            return Ok(report(results, RunOutcome::Completed));
                        }
                        executed.insert(id.clone());
                        (self.pick_next(scope.as_ref(), &executed), scope, None)
                    }
                    _ => (Some(id.clone()), scope, Some(id.clone())),
                }
            }
            RunTarget::Auto => (self.pick_next(None, &executed), None, None),
        };

        while let Some(id) = current {
            if cancel.is_cancelled() {
                return Ok(report(results, RunOutcome::Cancelled { next: Some(id) }));
            }
            let session = self.registry.require(&id)?;
            let forced = explicit.as_deref() == Some(id.as_str())
                && request.force
                && self.resolver().resolve(&id)?.state == SessionState::Complete;

            let (result, failure) = self.execute_one(executor, session, cancel, forced);
            results.push(result);
            if let Some((kind, error)) = failure {
                if cancel.is_cancelled() {
                    info!(session = %id, "run cancelled during session");
                    return Ok(report(results, RunOutcome::Cancelled { next: Some(id) }));
                }
                return Ok(report(
                    results,
                    RunOutcome::Failed {
                        session: id,
                        kind,
                        error,
                    },
                ));
            }
            executed.insert(id);

            if !request.cascade {
                break;
            }
            current = self.pick_next(scope.as_ref(), &executed);
        }

        Ok(report(results, RunOutcome::Completed))
    }

    /// Re-resolve everything and take the first runnable or stale session in
    /// topological order that is in scope and has not run yet.
    fn pick_next(&self, scope: Option<&HashSet<String>>, executed: &HashSet<String>) -> Option<String> {
        self.status_report()
            .into_iter()
            .filter(|r| r.state.needs_run())
            .filter(|r| scope.map_or(true, |s| s.contains(&r.session)))
            .find(|r| !executed.contains(&r.session))
            .map(|r| r.session)
    }

    fn execute_one(
        &self,
        executor: &dyn SessionExecutor,
        session: &SessionDefinition,
        cancel: &CancellationToken,
        forced: bool,
    ) -> (ExecutionResult, Option<(FailureKind, String)>) {
        let started_at = Utc::now();
        info!(session = session.id(), forced, "session started");

        let outcome = self.stage_and_promote(executor, session, cancel);
        let finished_at = Utc::now();

        match outcome {
            Ok(written) => {
                info!(session = session.id(), artifacts = written.len(), "session succeeded");
                (
                    ExecutionResult {
                        session_id: session.id().to_string(),
                        written_artifacts: written,
                        success: true,
                        error_detail: None,
                        forced,
                        started_at,
                        finished_at,
                    },
                    None,
                )
            }
            Err((kind, error)) => {
                warn!(session = session.id(), ?kind, %error, "session failed");
                (
                    ExecutionResult {
                        session_id: session.id().to_string(),
                        written_artifacts: Vec::new(),
                        success: false,
                        error_detail: Some(error.clone()),
                        forced,
                        started_at,
                        finished_at,
                    },
                    Some((kind, error)),
                )
            }
        }
    }

    fn stage_and_promote(
        &self,
        executor: &dyn SessionExecutor,
        session: &SessionDefinition,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<String>, (FailureKind, String)> {
        let storage = |e: &dyn std::fmt::Display| (FailureKind::Storage, e.to_string());

        let staging = tempfile::Builder::new()
            .prefix("cascade-staging-")
            .tempdir()
            .map_err(|e| storage(&e))?;
        debug!(session = session.id(), staging = %staging.path().display(), "staging directory ready");

        let request = ExecutionRequest {
            session,
            artifacts_dir: self.store.root(),
            available_inputs: self.available_inputs(session).map_err(|e| storage(&e))?,
            staging_dir: staging.path(),
            cancel,
        };

        if let ExecutorOutcome::Failed(detail) = executor.execute(&request) {
            return Err((FailureKind::Executor, detail));
        }

        let staged = ArtifactStore::new(staging.path());
        let mut missing = Vec::new();
        for output in session.outputs() {
            if !staged.exists(output).map_err(|e| storage(&e))? {
                missing.push(output.to_string());
            }
        }
        if !missing.is_empty() {
            return Err((
                FailureKind::Executor,
                format!(
                    "executor reported success but did not produce: {}",
                    missing.join(", ")
                ),
            ));
        }

        self.store
            .promote(staging.path(), session.outputs())
            .map_err(|e| storage(&e))
    }

    fn available_inputs(&self, session: &SessionDefinition) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for pattern in session.inputs().iter().chain(session.optional_inputs()) {
            if self.store.exists(pattern)? {
                found.push(self.input_location(pattern));
            }
        }
        Ok(found)
    }

    fn input_location(&self, pattern: &ArtifactPattern) -> PathBuf {
        match pattern.kind() {
            PatternKind::Glob => self.store.root().join(pattern.literal_prefix()),
            _ => self.store.locate(pattern),
        }
    }
}
