/// Errors surfaced by the public engine API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An API call arrived before `start` (or after `shutdown`).
    #[error("engine is not started")]
    NotStarted,
    /// `start` was called on an engine that is already running.
    #[error("engine is already started")]
    AlreadyStarted,
    /// The admission gate reported CRITICAL host pressure; retry later.
    #[error("system overloaded, submission refused")]
    AdmissionRefused,
    /// The bounded input queue is full; retry or shed load.
    #[error("input queue is full")]
    QueueFull,
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A coordinator thread could not be spawned at startup.
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}
