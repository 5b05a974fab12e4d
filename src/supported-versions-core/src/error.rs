//! Error types for supported-versions operations.

use thiserror::Error;

use crate::jwt::JwtError;

/// Errors that can occur while fetching, verifying or storing policy data.
#[derive(Debug, Error)]
pub enum SupportedVersionsError {
    /// A request to a server or to the vendor cloud failed.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// A policy token failed signature verification or could not be decoded.
    #[error("Policy verification failed: {reason}")]
    Verification {
        /// Reason the token was rejected.
        reason: String,
    },

    /// A response was well-formed but lacked a required value.
    #[error("Missing data: {what}")]
    DataMissing {
        /// Description of the missing value.
        what: String,
    },

    /// No source produced a freshly verified policy document.
    #[error("No policy source available for {url}")]
    ExhaustedSources {
        /// Server URL the cascade ran for.
        url: String,
    },

    /// Cache persistence error.
    #[error("Cache error: {message}")]
    Cache {
        /// Error message.
        message: String,
    },

    /// The bundled policy could not be read or verified.
    #[error("Builtin policy error: {message}")]
    Builtin {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl SupportedVersionsError {
    /// Whether the failure is transient and worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the data involved must be discarded as untrustworthy.
    #[must_use]
    pub fn is_untrusted(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

impl From<JwtError> for SupportedVersionsError {
    fn from(err: JwtError) -> Self {
        Self::Verification {
            reason: err.to_string(),
        }
    }
}
