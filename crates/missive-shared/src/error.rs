use thiserror::Error;

/// Errors surfaced by the messaging core.
///
/// Every fallible operation in the workspace returns one of these classes;
/// the payload carries the human-readable detail.
#[derive(Error, Debug)]
pub enum MissiveError {
    /// An operation that needs a signed-in user ran without one.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A referenced user, conversation or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected input: blank message text, blank group name, too few
    /// participants, a conversation with oneself.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation does not apply to its target, e.g. renaming a direct
    /// conversation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The backing store or an external service failed.
    #[error("Remote failure: {0}")]
    Remote(String),
}

impl From<serde_json::Error> for MissiveError {
    fn from(err: serde_json::Error) -> Self {
        MissiveError::Remote(format!("document codec: {err}"))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MissiveError>;
