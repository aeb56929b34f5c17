//! Error types for the Parley core.
//!
//! Each concern carries its own error enum so callers can match on the failure
//! they actually care about. [`DialogError`] is the umbrella type returned by
//! dialog lifecycle operations; the narrower errors convert into it with `?`.

use thiserror::Error;

// =============================================================================
// Memory
// =============================================================================

/// Errors raised while resolving or writing a memory path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// The path text could not be parsed.
    #[error("invalid memory path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The first segment does not name a known scope.
    #[error(
        "unknown memory scope '{0}' (expected settings, user, conversation, turn, dialog, $ or ^)"
    )]
    UnknownScope(String),

    /// A write targeted a read-only scope.
    #[error("memory scope '{0}' is read-only")]
    ReadOnlyScope(String),

    /// A `dialog` path was written while no dialog frame is active.
    #[error("no active dialog for path '{0}'")]
    NoDialogScope(String),

    /// A `^name` write found no enclosing dialog that defines `name`.
    #[error("'^{0}' is not defined by any enclosing dialog")]
    UnboundReference(String),
}

impl MemoryError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

// =============================================================================
// Expressions
// =============================================================================

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    /// The expression text is malformed.
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset of the failure.
        offset: usize,
        /// Description of the failure.
        message: String,
    },

    /// An operator or function received operands it cannot handle.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A call names a function the evaluator does not provide.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        name: String,
        /// Human readable expected count.
        expected: String,
        /// Actual count.
        got: usize,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A path inside the expression could not be resolved.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl ExpressionError {
    /// Creates a parse error.
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }
}

/// Result type for expression operations.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

// =============================================================================
// Storage
// =============================================================================

/// Errors raised by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored blob could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// The key cannot be mapped onto the backend.
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Dialogs
// =============================================================================

/// Errors raised by dialog lifecycle operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DialogError {
    /// No dialog with this id is reachable from the current context.
    #[error("dialog '{0}' not found")]
    DialogNotFound(String),

    /// A different dialog was already registered under this id.
    #[error("a different dialog is already registered with id '{0}'")]
    DuplicateDialogId(String),

    /// A step that edits its hosting sequence ran outside of one.
    #[error("step '{step}' must run inside an adaptive dialog's step sequence")]
    NotInSequence {
        /// Id of the offending step.
        step: String,
    },

    /// A begin-dialog step was configured without a target.
    #[error("step '{step}' has no target dialog")]
    MissingTarget {
        /// Id of the offending step.
        step: String,
    },

    /// The frame this context points at no longer exists.
    #[error("dialog context '{0}' is stale")]
    StaleContext(String),

    /// Persisted dialog state has an unexpected shape.
    #[error("invalid dialog state: {0}")]
    InvalidState(String),

    /// A dialog or collaborator was configured incorrectly.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A recognizer failed.
    #[error("recognizer failed: {0}")]
    Recognizer(String),

    /// The turn's cancellation token fired.
    #[error("turn cancelled")]
    Cancelled,

    /// The turn re-entered the root dialog more often than allowed.
    #[error("turn exceeded the limit of {0} step continuations")]
    StepLimitExceeded(usize),

    /// Memory failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Expression failure.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DialogError {
    /// Creates an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Returns `true` if the error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for dialog operations.
pub type DialogResult<T> = Result<T, DialogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_error_converts_into_dialog_error() {
        let err: DialogError = MemoryError::UnknownScope("foo".into()).into();
        assert!(matches!(err, DialogError::Memory(MemoryError::UnknownScope(_))));
        assert_eq!(
            err.to_string(),
            "unknown memory scope 'foo' (expected settings, user, conversation, turn, dialog, $ or ^)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(ref msg) if msg.contains("missing")));
    }
}
