//! LLM layer errors and retryability classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("API error: status={status}, message='{message}'")]
    Api { status: u16, message: String },

    #[error("network error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("capability '{capability}' is not supported by this model")]
    UnsupportedCapability { capability: String },

    #[error("provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<LlmError>,
    },
}

impl LlmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            capability: capability.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Default retryability: transient HTTP statuses and network timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => {
                matches!(status, 408 | 409 | 429 | 500 | 502 | 503 | 504)
            }
            LlmError::Network { source } => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        for status in [408u16, 409, 429, 500, 502, 503, 504] {
            assert!(LlmError::api(status, "boom").is_retryable(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400u16, 401, 403, 404, 422] {
            assert!(!LlmError::api(status, "no").is_retryable(), "{status}");
        }
        assert!(!LlmError::configuration("missing key").is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }
}
