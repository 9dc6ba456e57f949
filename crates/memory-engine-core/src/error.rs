//! Error taxonomy shared by every Memory Engine component.

/// Errors surfaced by the memory engine.
///
/// The first six variants are the caller-facing taxonomy; the remaining ones
/// wrap lower-level failures that a caller usually only logs.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Bad configuration or arguments (overlap ≥ size, weights not summing
    /// to 1, score outside `[0, 1]`).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown file or chunk id, or a missing path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Oversized file, disallowed extension, or undecodable content.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The entire embedding fallback chain was exhausted.
    #[error("no embedding provider available: {0}")]
    ProviderUnavailable(String),

    /// Foreign-key violation or orphaned row detected.
    #[error("storage consistency violation: {0}")]
    StorageConsistency(String),

    /// A directory-wide sync was requested while another one is running.
    #[error("sync already in progress")]
    SyncInProgress,

    /// A single embedding provider call failed.
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// The storage backend failed for a reason other than consistency.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn provider(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
