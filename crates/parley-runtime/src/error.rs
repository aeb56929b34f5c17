//! Runtime error types.

use parley_core::{DialogError, StorageError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while running turns.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A dialog failed; the turn's state was not saved.
    #[error(transparent)]
    Dialog(#[from] DialogError),

    /// Loading or saving turn state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
