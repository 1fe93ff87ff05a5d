//! Error types for session operations

use thiserror::Error;

/// Error type for simulation session operations
#[derive(Debug, Error)]
pub enum SimError {
    /// A command was issued before any circuit was loaded
    #[error("no circuit loaded")]
    NoCircuit,

    /// A command was issued while a previous run is still running or undrained
    #[error("simulation busy: previous run has not finished")]
    Busy,

    /// The engine terminated unrecoverably; the session cannot be used again
    #[error("engine exited with status {status}")]
    EngineExited { status: i32 },

    /// The session backing a result handle was torn down
    #[error("session closed")]
    SessionClosed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// The engine rejected a command string
    #[error("engine command {command:?} failed with code {code}")]
    CommandFailed { command: String, code: i32 },

    /// The engine library could not be loaded or initialized
    #[error("engine load error: {0}")]
    EngineLoad(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Whether the session that produced this error is permanently unusable
    pub fn is_terminal(&self) -> bool {
        matches!(self, SimError::EngineExited { .. } | SimError::SessionClosed)
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
