use crate::error::{CascadeError, Result};
use crate::session::SessionDefinition;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Built-in session table
// ---------------------------------------------------------------------------

struct SessionEntry {
    id: &'static str,
    order: u32,
    title: &'static str,
    inputs: &'static [&'static str],
    outputs: &'static [&'static str],
    optional_inputs: &'static [&'static str],
    extension: bool,
}

macro_rules! session {
    (
        $order:expr, $id:expr, $title:expr,
        inputs: [$($i:expr),* $(,)?],
        outputs: [$($o:expr),* $(,)?]
        $(, optional: [$($opt:expr),* $(,)?])?
        $(, extension: $ext:expr)?
    ) => {
        SessionEntry {
            id: $id,
            order: $order,
            title: $title,
            inputs: &[$($i),*],
            outputs: &[$($o),*],
            optional_inputs: &[$($($opt),*)?],
            extension: {
                #[allow(unused_assignments, unused_mut)]
                let mut v = false;
                $(v = $ext;)?
                v
            },
        }
    };
}

const CORE_SESSIONS: &[SessionEntry] = &[
    session!(1, "user-journey", "User Journey",
        inputs: [],
        outputs: ["journey.md"]),
    session!(2, "product-strategy", "Product Strategy",
        inputs: ["journey.md"],
        outputs: ["strategy.md"]),
    session!(3, "tech-stack", "Tech Stack",
        inputs: ["journey.md", "strategy.md"],
        outputs: ["tech-stack.md"]),
    session!(4, "design-system", "Design System",
        inputs: ["journey.md", "strategy.md"],
        outputs: ["design-system.md"]),
    session!(5, "data-schema", "Data Schema",
        inputs: ["journey.md", "tech-stack.md"],
        outputs: ["schema.md"]),
    session!(6, "api-design", "API Design",
        inputs: ["journey.md", "tech-stack.md", "schema.md"],
        outputs: ["api.md"]),
    session!(7, "architecture", "Architecture",
        inputs: ["tech-stack.md", "schema.md", "api.md"],
        outputs: ["architecture.md"]),
    session!(8, "screens", "Screens & Flows",
        inputs: ["journey.md", "design-system.md", "api.md"],
        outputs: ["screens.md"]),
    session!(9, "security", "Security Review",
        inputs: ["architecture.md", "schema.md"],
        outputs: ["security.md"],
        optional: ["api.md"]),
    session!(10, "testing-strategy", "Testing Strategy",
        inputs: ["architecture.md", "tech-stack.md"],
        outputs: ["testing.md"]),
    session!(11, "infrastructure", "Infrastructure",
        inputs: ["architecture.md", "tech-stack.md"],
        outputs: ["infrastructure.md"],
        optional: ["security.md"]),
    session!(12, "roadmap", "Roadmap",
        inputs: ["journey.md", "architecture.md", "screens.md"],
        outputs: ["roadmap.md"],
        optional: ["strategy.md"]),
    session!(13, "backlog", "Backlog",
        inputs: ["roadmap.md", "screens.md", "api.md", "schema.md"],
        outputs: ["backlog/"]),
    session!(14, "launch-checklist", "Launch Checklist",
        inputs: ["backlog/", "infrastructure.md", "security.md", "testing.md"],
        outputs: ["launch.md"]),
];

const EXTENSION_SESSIONS: &[SessionEntry] = &[
    session!(101, "naming", "Naming",
        inputs: ["journey.md", "strategy.md"],
        outputs: ["extensions/naming.md"],
        optional: ["design-system.md"],
        extension: true),
    session!(102, "messaging", "Messaging",
        inputs: ["journey.md", "strategy.md"],
        outputs: ["extensions/messaging.md"],
        optional: ["extensions/naming.md", "screens.md"],
        extension: true),
];

impl SessionEntry {
    fn to_definition(&self) -> Result<SessionDefinition> {
        SessionDefinition::new(self.id, self.order)
            .title(self.title)
            .inputs(self.inputs.iter().copied())
            .outputs(self.outputs.iter().copied())
            .optional_inputs(self.optional_inputs.iter().copied())
            .extension(self.extension)
            .build()
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Catalog of session definitions, held in `(order, id)` order.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Vec<SessionDefinition>,
    index: HashMap<String, usize>,
}

impl SessionRegistry {
    /// Build a registry, rejecting duplicate ids and outputs claimed by more
    /// than one session.
    pub fn new(mut sessions: Vec<SessionDefinition>) -> Result<Self> {
        sessions.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut index = HashMap::with_capacity(sessions.len());
        for (i, s) in sessions.iter().enumerate() {
            if index.insert(s.id().to_string(), i).is_some() {
                return Err(CascadeError::DuplicateSession(s.id().to_string()));
            }
        }

        for (i, a) in sessions.iter().enumerate() {
            for b in &sessions[i + 1..] {
                for out_a in a.outputs() {
                    if let Some(out_b) = b.outputs().iter().find(|o| o.overlaps(out_a)) {
                        return Err(CascadeError::DuplicateOutput {
                            pattern: if out_a == out_b {
                                out_a.to_string()
                            } else {
                                format!("{out_a} / {out_b}")
                            },
                            first: a.id().to_string(),
                            second: b.id().to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self { sessions, index })
    }

    /// The built-in planning sessions, optionally with the extension sessions.
    pub fn builtin(extensions: bool) -> Result<Self> {
        let entries = CORE_SESSIONS
            .iter()
            .chain(EXTENSION_SESSIONS.iter().filter(|_| extensions));
        let defs = entries.map(SessionEntry::to_definition).collect::<Result<Vec<_>>>()?;
        Self::new(defs)
    }

    pub fn get(&self, id: &str) -> Option<&SessionDefinition> {
        self.index.get(id).map(|&i| &self.sessions[i])
    }

    pub fn require(&self, id: &str) -> Result<&SessionDefinition> {
        self.get(id)
            .ok_or_else(|| CascadeError::SessionNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionDefinition> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
