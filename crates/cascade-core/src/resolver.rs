//! Session state resolution.
//!
//! State is never stored. Every call looks at the artifact store afresh and
//! derives, per session, whether it is blocked, runnable, complete or stale.

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::pattern::ArtifactPattern;
use crate::registry::SessionRegistry;
use crate::session::SessionDefinition;
use crate::store::{Artifact, ArtifactStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// A required input artifact is missing.
    Blocked,
    /// Inputs present, at least one output missing.
    Runnable,
    /// All outputs present and at least as fresh as everything upstream.
    Complete,
    /// All outputs present, but something upstream is newer.
    Stale,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Blocked => "blocked",
            SessionState::Runnable => "runnable",
            SessionState::Complete => "complete",
            SessionState::Stale => "stale",
        }
    }

    /// Runnable and stale sessions are the ones a cascade should execute.
    pub fn needs_run(&self) -> bool {
        matches!(self, SessionState::Runnable | SessionState::Stale)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub session: String,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_outputs: Vec<String>,
    /// Upstream sessions with an output newer than this session's oldest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale_because: Vec<String>,
    /// Storage error hit while looking at this session's artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Resolution {
    fn new(session: &str, state: SessionState) -> Self {
        Self {
            session: session.to_string(),
            state,
            missing_inputs: Vec::new(),
            missing_outputs: Vec::new(),
            stale_because: Vec::new(),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Artifact lookups taken once per resolution pass, so every session in a
/// `resolve_all` sees the same view of the store.
struct Snapshot {
    artifacts: HashMap<ArtifactPattern, std::result::Result<Artifact, String>>,
}

impl Snapshot {
    fn get(&self, pattern: &ArtifactPattern) -> std::result::Result<&Artifact, &str> {
        match self.artifacts.get(pattern) {
            Some(Ok(a)) => Ok(a),
            Some(Err(e)) => Err(e.as_str()),
            None => Err("artifact not captured in snapshot"),
        }
    }
}

// ---------------------------------------------------------------------------
// StateResolver
// ---------------------------------------------------------------------------

pub struct StateResolver<'a> {
    registry: &'a SessionRegistry,
    graph: &'a DependencyGraph,
    store: &'a ArtifactStore,
    workers: usize,
}

impl<'a> StateResolver<'a> {
    pub fn new(
        registry: &'a SessionRegistry,
        graph: &'a DependencyGraph,
        store: &'a ArtifactStore,
    ) -> Self {
        Self {
            registry,
            graph,
            store,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Number of threads used for artifact lookups, clamped to `1..=8`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    /// Resolve one session. Fails only for an unknown session id.
    pub fn resolve(&self, id: &str) -> Result<Resolution> {
        let session = self.registry.require(id)?;
        let upstream = self.graph.upstream_closure(id)?;

        let mut patterns: Vec<&ArtifactPattern> = session_patterns(session).collect();
        for up in &upstream {
            if let Some(u) = self.registry.get(up) {
                patterns.extend(u.outputs());
            }
        }
        let snapshot = self.snapshot(patterns);
        Ok(self.evaluate(session, &upstream, &snapshot))
    }

    /// Resolve every session, in topological order.
    pub fn resolve_all(&self) -> Vec<Resolution> {
        let patterns: Vec<&ArtifactPattern> =
            self.registry.iter().flat_map(session_patterns).collect();
        let snapshot = self.snapshot(patterns);

        self.graph
            .topological_order()
            .into_iter()
            .filter_map(|id| {
                let session = self.registry.get(id)?;
                let upstream = self.graph.upstream_closure(id).ok()?;
                Some(self.evaluate(session, &upstream, &snapshot))
            })
            .collect()
    }

    fn snapshot(&self, mut patterns: Vec<&ArtifactPattern>) -> Snapshot {
        patterns.sort_by(|a, b| a.path().cmp(b.path()));
        patterns.dedup();

        let lookup = |p: &&ArtifactPattern| {
            let found = self.store.artifact(p).map_err(|e| e.to_string());
            ((*p).clone(), found)
        };

        let artifacts: HashMap<_, _> = if self.workers <= 1 || patterns.len() <= 1 {
            patterns.iter().map(lookup).collect()
        } else {
            let chunk = patterns.len().div_ceil(self.workers);
            std::thread::scope(|scope| {
                let handles: Vec<_> = patterns
                    .chunks(chunk)
                    .map(|part| scope.spawn(move || part.iter().map(lookup).collect::<Vec<_>>()))
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        };

        Snapshot { artifacts }
    }

    fn evaluate(
        &self,
        session: &SessionDefinition,
        upstream: &[&str],
        snapshot: &Snapshot,
    ) -> Resolution {
        let id = session.id();
        let mut missing_inputs = Vec::new();
        let mut missing_outputs = Vec::new();
        let mut output_times: Vec<DateTime<Utc>> = Vec::new();

        let storage_error = |e: &str| {
            let mut r = Resolution::new(id, SessionState::Blocked);
            r.error = Some(e.to_string());
            r
        };

        for input in session.inputs() {
            match snapshot.get(input) {
                Ok(a) if a.exists => {}
                Ok(_) => missing_inputs.push(input.to_string()),
                Err(e) => return storage_error(e),
            }
        }
        for output in session.outputs() {
            match snapshot.get(output) {
                Ok(a) if a.exists => output_times.extend(a.last_modified),
                Ok(_) => missing_outputs.push(output.to_string()),
                Err(e) => return storage_error(e),
            }
        }

        if !missing_inputs.is_empty() {
            let mut r = Resolution::new(id, SessionState::Blocked);
            r.missing_inputs = missing_inputs;
            r.missing_outputs = missing_outputs;
            return r;
        }
        if !missing_outputs.is_empty() {
            let mut r = Resolution::new(id, SessionState::Runnable);
            r.missing_outputs = missing_outputs;
            return r;
        }

        // Outputs without a timestamp count as maximally fresh, so they never
        // lower this session's freshness.
        let Some(self_fresh) = output_times.into_iter().min() else {
            return Resolution::new(id, SessionState::Complete);
        };

        let mut stale_because = Vec::new();
        for up in upstream {
            let Some(u) = self.registry.get(up) else {
                continue;
            };
            let newer = u.outputs().iter().any(|o| {
                matches!(
                    snapshot.get(o),
                    Ok(Artifact { exists: true, last_modified: Some(t), .. }) if *t > self_fresh
                )
            });
            if newer {
                stale_because.push(up.to_string());
            }
        }

        if stale_because.is_empty() {
            Resolution::new(id, SessionState::Complete)
        } else {
            debug!(session = id, upstream = ?stale_because, "session is stale");
            let mut r = Resolution::new(id, SessionState::Stale);
            r.stale_because = stale_because;
            r
        }
    }
}

fn session_patterns(s: &SessionDefinition) -> impl Iterator<Item = &ArtifactPattern> {
    s.inputs()
        .iter()
        .chain(s.optional_inputs())
        .chain(s.outputs())
}
