use thiserror::Error;

/// Result type for ring pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that end an operation for good: bad configuration, failed
/// allocation, or a broken pipeline lifecycle
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Buffer capacity must be at least one sample
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    /// Storage for the buffer could not be reserved
    #[error("Could not allocate storage for {capacity} samples")]
    Allocation { capacity: usize },

    /// Lock retry policy is unusable
    #[error("Invalid lock policy: {0}")]
    InvalidLockPolicy(String),

    /// Pacing would starve the lock retry window
    #[error("Invalid pacing: {0}")]
    InvalidPacing(String),

    /// No buffers in pipeline
    #[error("Cannot start pipeline with no buffers")]
    NoStages,

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Sample source produced something it could not decode
    #[error("Sample source error: {0}")]
    Source(String),

    /// Underlying I/O failure in a sample source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
