//! Error types for the SonarQube provider.

use thiserror::Error;

/// Errors that can occur while reconciling SonarQube resources.
///
/// Every error aborts the current lifecycle operation. Nothing is retried
/// and nothing already applied on the server is rolled back.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// An input value was rejected before any request was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider or a resource is configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a status other than the expected one.
    #[error("{caller}: expected status {expected}, got {status}: {body}")]
    UnexpectedStatus {
        /// Tag of the operation that issued the request.
        caller: String,
        /// Status code the operation was waiting for.
        expected: u16,
        /// Status code the server returned.
        status: u16,
        /// Raw response body, kept for diagnostics.
        body: String,
    },

    /// A response body was not the JSON the operation expected.
    #[error("{caller}: failed to decode json response: {source}")]
    Decode {
        /// Tag of the operation that issued the request.
        caller: String,
        /// The underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Host state could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Build an [`ProviderError::UnexpectedStatus`] error.
    pub fn unexpected_status(
        caller: impl Into<String>,
        expected: u16,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::UnexpectedStatus {
            caller: caller.into(),
            expected,
            status,
            body: body.into(),
        }
    }

    /// Get the error message as a string.
    ///
    /// Returns a reference to the error message for any variant.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Network(_err) => "network error (see Debug output)",
            Self::UnexpectedStatus { body, .. } => body,
            Self::Decode { .. } => "decode error (see Debug output)",
            Self::Serialization(_err) => "serialization error (see Debug output)",
        }
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::UnexpectedStatus { status, .. } => *status == 404,
            _ => false,
        }
    }
}
