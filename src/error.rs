/// Error types for the omgmatch library
use std::fmt;

/// Result type alias for matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;

/// Main error type for compile, load, and scan operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// Structural problems in a compiled store: magic mismatch, version
    /// mismatch, section size mismatch
    InvalidFormat(String),

    /// Pattern rejected at compile time (empty, or empty after normalization)
    InvalidPattern(String),

    /// Scan configuration out of range (thread count, chunk size)
    InvalidConfig(String),

    /// I/O errors from the backing sink or source
    Io(String),

    /// Memory mapping errors
    Mmap(String),

    /// Allocation failure
    Oom(String),
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            MatchError::InvalidPattern(msg) => write!(f, "Invalid pattern: {}", msg),
            MatchError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            MatchError::Io(msg) => write!(f, "I/O error: {}", msg),
            MatchError::Mmap(msg) => write!(f, "Memory mapping error: {}", msg),
            MatchError::Oom(msg) => write!(f, "Out of memory: {}", msg),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<std::io::Error> for MatchError {
    fn from(err: std::io::Error) -> Self {
        MatchError::Io(err.to_string())
    }
}
