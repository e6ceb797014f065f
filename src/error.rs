//! Error types for the runtime dispatch layer

use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dispatching or executing JavaScript
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (empty runtime set, malformed driver scripts, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The runtime's executable is missing or failed its version probe
    #[error("{0} is not available")]
    Unavailable(String),

    /// Subprocess launch failure or non-zero exit
    #[error("Script execution failed: {0}")]
    Execution(String),

    /// The subprocess exceeded the configured timeout and was killed
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    /// The runtime produced output the wrapper could not decode
    #[error("Malformed runtime output: {0}")]
    Parse(String),

    /// Every ranked candidate failed or was unavailable
    #[error("{0}")]
    AllFailed(String),

    /// I/O error while exchanging scratch files with a subprocess
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the dispatch loop may recover by falling back to the next
    /// ranked candidate. Configuration errors indicate caller misuse and
    /// never trigger fallback.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::AllFailed(_))
    }
}
