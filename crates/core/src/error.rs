//! Error types for the Operative domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Operative operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the provider transport.
///
/// Every variant is caught at the streaming boundary of the sampling loop and
/// reported through the exchange observer; none of them escape the loop.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider{}", retry_after_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

fn retry_after_suffix(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry after {s}s"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Whether the transport may retry the exchange.
    ///
    /// 529 is Anthropic's "overloaded" status.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 409 | 500..=599)
            }
            _ => false,
        }
    }

    /// The provider-supplied retry delay, if this is a rate-limit failure.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// HTTP status associated with this failure, when one is known.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 400,
            message: "messages: field required".into(),
        });
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("field required"));
    }

    #[test]
    fn rate_limit_is_distinguishable() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(12),
        };
        assert_eq!(err.retry_after_secs(), Some(12));
        assert_eq!(err.status_code(), Some(429));
        assert!(err.to_string().contains("retry after 12s"));

        let bare = ProviderError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(bare.to_string(), "Rate limited by provider");
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(
            ProviderError::ApiError {
                status_code: 529,
                message: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::AuthenticationFailed("nope".into()).is_retryable());
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason: "broken pipe".into(),
        });
        assert!(err.to_string().contains("bash"));
        assert!(err.to_string().contains("broken pipe"));
    }
}
