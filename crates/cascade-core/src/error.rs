use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("cyclic dependency between sessions: {}", members.join(", "))]
    CyclicDependency { members: Vec<String> },

    #[error("output '{pattern}' is declared by both '{first}' and '{second}'")]
    DuplicateOutput {
        pattern: String,
        first: String,
        second: String,
    },

    #[error("session already registered: {0}")]
    DuplicateSession(String),

    #[error("invalid session id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSessionId(String),

    #[error("session '{0}' declares no outputs")]
    NoOutputs(String),

    #[error("invalid artifact pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("shell not found: {0}")]
    ShellNotFound(String),

    #[error(transparent)]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CascadeError {
    /// True for errors detected while building the registry or graph. These
    /// mean the session table itself is wrong and the process must not start.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CascadeError::CyclicDependency { .. }
                | CascadeError::DuplicateOutput { .. }
                | CascadeError::DuplicateSession(_)
                | CascadeError::InvalidSessionId(_)
                | CascadeError::NoOutputs(_)
                | CascadeError::InvalidPattern { .. }
                | CascadeError::ShellNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
