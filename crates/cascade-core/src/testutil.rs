//! Shared fixtures for unit tests.

use crate::executor::{ExecutionRequest, ExecutorOutcome, SessionExecutor};
use crate::io;
use crate::registry::SessionRegistry;
use crate::session::SessionDefinition;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed reference instant, so two files backdated by the same amount carry
/// identical timestamps.
const BASE_SECS: u64 = 1_700_000_000;

pub fn backdate(path: &Path, secs_before_base: u64) {
    let when = UNIX_EPOCH + Duration::from_secs(BASE_SECS - secs_before_base);
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(when).unwrap();
}

/// journey → strategy → stack, the smallest cascade with fan-out.
pub fn jst_registry() -> SessionRegistry {
    SessionRegistry::new(vec![
        SessionDefinition::new("j", 1)
            .outputs(["journey.md"])
            .build()
            .unwrap(),
        SessionDefinition::new("s", 2)
            .inputs(["journey.md"])
            .outputs(["strategy.md"])
            .build()
            .unwrap(),
        SessionDefinition::new("t", 3)
            .inputs(["journey.md", "strategy.md"])
            .outputs(["stack.md"])
            .build()
            .unwrap(),
    ])
    .unwrap()
}

/// Writes every declared output into the staging area, unless told to fail
/// or to leave outputs out. Records the order of calls.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub calls: Mutex<Vec<String>>,
    fail: HashSet<String>,
    /// Sessions that report success without writing anything.
    lazy: HashSet<String>,
    /// Sessions that write their outputs and then report failure.
    write_then_fail: HashSet<String>,
    /// Cancel the request's token after running this session.
    cancel_after: Option<String>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.fail.insert(id.to_string());
        self
    }

    pub fn lazy(mut self, id: &str) -> Self {
        self.lazy.insert(id.to_string());
        self
    }

    pub fn write_then_fail(mut self, id: &str) -> Self {
        self.write_then_fail.insert(id.to_string());
        self
    }

    pub fn cancel_after(mut self, id: &str) -> Self {
        self.cancel_after = Some(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SessionExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> ExecutorOutcome {
        let id = request.session.id();
        self.calls.lock().unwrap().push(id.to_string());

        if self.cancel_after.as_deref() == Some(id) {
            request.cancel.cancel();
        }
        if self.fail.contains(id) {
            return ExecutorOutcome::Failed(format!("{id} exploded"));
        }
        if self.lazy.contains(id) {
            return ExecutorOutcome::Succeeded;
        }
        for out in request.session.outputs() {
            let target = match out.kind() {
                crate::pattern::PatternKind::File => request.staging_dir.join(out.path()),
                _ => request.staging_dir.join(out.literal_prefix()).join("item-1.md"),
            };
            io::atomic_write(&target, format!("# {id}\n").as_bytes()).unwrap();
        }
        if self.write_then_fail.contains(id) {
            return ExecutorOutcome::Failed(format!("{id} wrote then failed"));
        }
        ExecutorOutcome::Succeeded
    }
}
