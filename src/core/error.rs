use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The agent endpoint was unreachable, answered non-2xx, or returned a malformed body.
    Invocation(String),
    /// The LLM driving the simulated user failed.
    SimulatedUser(String),
    /// The test cannot run as configured (missing flow, empty question set, ...).
    Configuration(String),
    /// A persistence layer error (database, serialization of stored rows).
    Persistence(String),
    /// The requested operation is invalid in the current state.
    InvalidState(String),
    /// A referenced entity does not exist.
    NotFound(String),
    /// An error occurred while rendering a template.
    TemplateRendering(String),
    /// Webhook preparation or delivery failed.
    Webhook(String),
    /// A generic system or unknown error.
    System(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Invocation(msg) => write!(f, "Agent invocation failed: {msg}"),
            Error::SimulatedUser(msg) => write!(f, "Simulated user failed: {msg}"),
            Error::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Error::Persistence(msg) => write!(f, "Persistence error: {msg}"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Error::NotFound(msg) => write!(f, "Not found: {msg}"),
            Error::TemplateRendering(msg) => write!(f, "Template error: {msg}"),
            Error::Webhook(msg) => write!(f, "Webhook error: {msg}"),
            Error::System(msg) => write!(f, "System error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
