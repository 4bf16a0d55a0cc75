//! Error taxonomy shared by the API and realtime clients

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure: connection refused, DNS, TLS, timeout
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response whose body is not a decodable envelope
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    /// Envelope decoded with `success=false`
    #[error("API error: {0}")]
    Api(String),

    /// Malformed JSON, or `data` that does not match the expected type
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Request could not be built (body serialization, bad header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_)
                | ClientError::Http { .. }
                | ClientError::Api(_)
                | ClientError::Parse(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::Config(err.to_string())
    }
}
