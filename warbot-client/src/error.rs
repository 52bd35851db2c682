//! Client error types.

use thiserror::Error;

/// Errors on the game connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] warbot_protocol::ProtocolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether reconnecting later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::WebSocket(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::TlsHandshake(_)
        )
    }
}

/// Failures of a plain request/reply call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status error: {code} {reason}")]
    BadStatus { code: u16, reason: String },

    #[error("API response error: {0}")]
    BadApiResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("request error")]
    Unspecified,
}

impl RequestError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        RequestError::Network(err.to_string())
    }

    pub fn api(detail: impl Into<String>) -> Self {
        RequestError::BadApiResponse(detail.into())
    }

    /// Returns whether the call should simply be re-issued after a short delay.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout)
    }
}
