use crate::error::{CascadeError, Result};
use crate::pattern::ArtifactPattern;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// SessionDefinition
// ---------------------------------------------------------------------------

/// One unit of work in the cascade: what it reads and what it is responsible
/// for producing. Built once at startup and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDefinition {
    id: String,
    order: u32,
    title: String,
    inputs: Vec<ArtifactPattern>,
    outputs: Vec<ArtifactPattern>,
    optional_inputs: Vec<ArtifactPattern>,
    extension: bool,
}

impl SessionDefinition {
    pub fn new(id: impl Into<String>, order: u32) -> SessionBuilder {
        let id = id.into();
        SessionBuilder {
            title: id.clone(),
            id,
            order,
            inputs: Vec::new(),
            outputs: Vec::new(),
            optional_inputs: Vec::new(),
            extension: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn inputs(&self) -> &[ArtifactPattern] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArtifactPattern] {
        &self.outputs
    }

    pub fn optional_inputs(&self) -> &[ArtifactPattern] {
        &self.optional_inputs
    }

    /// Post-cascade sessions that read core outputs but feed nothing back.
    pub fn is_extension(&self) -> bool {
        self.extension
    }

    /// Sort key used wherever the graph leaves the order open.
    pub fn sort_key(&self) -> (u32, &str) {
        (self.order, &self.id)
    }
}

// ---------------------------------------------------------------------------
// SessionBuilder
// ---------------------------------------------------------------------------

pub struct SessionBuilder {
    id: String,
    order: u32,
    title: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    optional_inputs: Vec<String>,
    extension: bool,
}

impl SessionBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn inputs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn outputs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn optional_inputs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_inputs
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn extension(mut self, extension: bool) -> Self {
        self.extension = extension;
        self
    }

    pub fn build(self) -> Result<SessionDefinition> {
        validate_session_id(&self.id)?;
        if self.outputs.is_empty() {
            return Err(CascadeError::NoOutputs(self.id));
        }
        Ok(SessionDefinition {
            inputs: parse_all(&self.inputs)?,
            outputs: parse_all(&self.outputs)?,
            optional_inputs: parse_all(&self.optional_inputs)?,
            id: self.id,
            order: self.order,
            title: self.title,
            extension: self.extension,
        })
    }
}

/// Parse patterns, dropping duplicates while keeping declaration order.
fn parse_all(raw: &[String]) -> Result<Vec<ArtifactPattern>> {
    let mut out: Vec<ArtifactPattern> = Vec::with_capacity(raw.len());
    for r in raw {
        let pattern = ArtifactPattern::parse(r)?;
        if !out.contains(&pattern) {
            out.push(pattern);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Id validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(CascadeError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
