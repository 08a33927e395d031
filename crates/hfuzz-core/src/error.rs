use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while validating configuration, before the worker pool starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input path {0:?} does not exist")]
    InputMissing(PathBuf),
    #[error("workspace {0:?} does not exist")]
    WorkspaceMissing(PathBuf),
    #[error("flip rate must be within [0, 1], got {0}")]
    FlipRateOutOfRange(f64),
    #[error("thread count must be greater than zero")]
    ZeroThreads,
    #[error("extension must not contain a path separator: {0:?}")]
    ExtensionContainsSeparator(String),
    #[error(
        "target arguments contain neither the file placeholder {placeholder:?} nor is \
         stdin_input set"
    )]
    NoFileDeliveryMechanism { placeholder: String },
    #[error("sanitizer-coverage and perf-event feedback cannot both be enabled")]
    ConflictingFeedbackDimensions,
    #[error("timeout must be at least {min}s when sanitizer-coverage feedback is enabled")]
    TimeoutTooShortForSancov { min: u64 },
    #[error("max_file_size must be greater than zero")]
    ZeroMaxFileSize,
    #[error("invalid size value {0:?}")]
    InvalidSize(String),
}

/// Errors that fail a single iteration; the worker logs and continues.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to read seed: {0}")]
    SeedRead(#[source] std::io::Error),
    #[error("seed file is empty")]
    EmptySeed,
    #[error("failed to materialize candidate at {path:?}: {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("candidate path already existed (collision), retry next iteration")]
    PathCollision,
    #[error("external mutator exited with failure: {0}")]
    ExternalMutatorFailed(String),
    #[error("dynamic preparation mode requires a feedback store")]
    MissingFeedbackStore,
}

/// Errors raised by an [`crate::backend::ExecutionBackend`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to initialize execution backend: {0}")]
    Init(String),
    #[error("failed to launch child process: {0}")]
    Launch(String),
    #[error("failed to wait for child process: {0}")]
    Reap(String),
}

/// Errors raised by the feedback store.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("candidate size {0} exceeds max_file_size {1}")]
    CandidateTooLarge(usize, usize),
    #[error("lock on the feedback store was poisoned")]
    Poisoned,
}

/// Catch-all error for contexts that don't fit the kinds above.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
