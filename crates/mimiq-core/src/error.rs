//! Error types and result alias for mimiq.
//!
//! The variants mirror the google.rpc status codes the Cloud Tasks v2 API
//! surfaces to clients. Dispatch-time failures never use these; they are
//! recorded on the task's attempt descriptors instead.

/// The result type used throughout mimiq.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to API clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed name, payload, or contradictory configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A queue or task name is already in use (including tombstoned task names).
    #[error("{resource} already exists: {name}")]
    AlreadyExists {
        /// The kind of resource ("queue" or "task").
        resource: &'static str,
        /// The fully qualified name that collided.
        name: String,
    },

    /// An operation referenced a missing queue or task.
    #[error("{resource} not found: {name}")]
    NotFound {
        /// The kind of resource ("queue" or "task").
        resource: &'static str,
        /// The fully qualified name that was looked up.
        name: String,
    },

    /// An operation hit a queue or task in an incompatible state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The operation is not implemented by the emulator.
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a new already-exists error.
    #[must_use]
    pub fn already_exists(resource: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource,
            name: name.into(),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Creates a new failed-precondition error.
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the google.rpc status name for this error.
    #[must_use]
    pub const fn status_name(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::FailedPrecondition(_) => "FAILED_PRECONDITION",
            Self::Unimplemented(_) => "UNIMPLEMENTED",
            Self::Internal { .. } => "INTERNAL",
        }
    }
}
