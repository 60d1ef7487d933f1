/*!
 * Error types for the bookling pipeline.
 *
 * Every error that crosses a stage boundary is classified as either
 * retryable or fatal. The orchestrator only enforces the retry budget
 * and the terminal transition; it never re-classifies.
 */

use thiserror::Error;

/// Errors reported by a translation client adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Error when making an API request fails at the transport level
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The language pair cannot be served by this backend
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The request itself is malformed and would fail again unchanged
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The response did not match the request shape (count or markers)
    #[error("Response shape mismatch: expected {expected} texts, got {actual}")]
    ShapeMismatch {
        /// Number of texts sent
        expected: usize,
        /// Number of texts received
        actual: usize,
    },
}

impl ProviderError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_)
            | ProviderError::ConnectionError(_)
            | ProviderError::Timeout(_)
            | ProviderError::RateLimitExceeded(_)
            | ProviderError::ParseError(_)
            | ProviderError::ShapeMismatch { .. } => true,
            ProviderError::ApiError { status_code, .. } => {
                *status_code == 408 || *status_code == 429 || *status_code >= 500
            }
            ProviderError::AuthenticationError(_)
            | ProviderError::UnsupportedLanguage(_)
            | ProviderError::MalformedRequest(_) => false,
        }
    }
}

/// Classified failure of a single pipeline stage
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Transient failure; the orchestrator may run the stage again
    #[error("retryable: {0}")]
    Retryable(String),

    /// Input or configuration defect; the job fails
    #[error("fatal: {0}")]
    Fatal(String),

    /// The job was cancelled while the stage was running
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    /// Build a retryable error from any displayable cause
    pub fn retryable(message: impl std::fmt::Display) -> Self {
        StageError::Retryable(message.to_string())
    }

    /// Build a fatal error from any displayable cause
    pub fn fatal(message: impl std::fmt::Display) -> Self {
        StageError::Fatal(message.to_string())
    }

    /// Whether the orchestrator should spend retry budget on this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Retryable(_))
    }

    /// Human-readable message without the classification prefix
    pub fn message(&self) -> String {
        match self {
            StageError::Retryable(m) | StageError::Fatal(m) => m.clone(),
            StageError::Cancelled => "job cancelled".to_string(),
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(error: ProviderError) -> Self {
        if error.is_retryable() {
            StageError::Retryable(error.to_string())
        } else {
            StageError::Fatal(error.to_string())
        }
    }
}

/// Storage failures surface as retryable: the database or file system
/// may recover, and the retry budget bounds the damage.
impl From<anyhow::Error> for StageError {
    fn from(error: anyhow::Error) -> Self {
        StageError::Retryable(format!("{:#}", error))
    }
}

/// Errors raised by the dedup cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// An entry exists for the key with different text
    #[error("cache conflict for {fingerprint}/{language}: existing translation differs")]
    Conflict {
        /// Content fingerprint of the key
        fingerprint: String,
        /// Target language of the key
        language: String,
        /// Text already stored under the key
        existing: String,
    },

    /// Underlying storage failed
    #[error("cache storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from a pipeline stage
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// Error from the dedup cache
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Requested job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(format!("{:#}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
