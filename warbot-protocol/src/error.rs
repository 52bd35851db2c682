//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame length: {0}")]
    InvalidLength(i32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength(-7);
        assert!(err.to_string().contains("-7"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }
}
