use http::StatusCode;
use thiserror::Error;

/// Why a pipe request did not complete.
///
/// Every variant is terminal for its own request only, the registry entry for the key is gone
/// by the time the error is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// No peer arrived before the wait was cancelled.
    #[error("request timeout")]
    PeerTimeout,

    /// The stream was handed off but the consumer never acknowledged the copy.
    #[error("ack timeout")]
    AckTimeout,

    /// The key already has a waiting party of the same role, or a transfer in progress.
    #[error("conflict, the key is busy")]
    Conflict,

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl PipeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipeError::PeerTimeout | PipeError::AckTimeout => StatusCode::REQUEST_TIMEOUT,
            PipeError::Conflict => StatusCode::CONFLICT,
            PipeError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(PipeError::PeerTimeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(PipeError::AckTimeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(PipeError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(PipeError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn timeouts_log_differently() {
        assert_eq!(PipeError::PeerTimeout.to_string(), "request timeout");
        assert_eq!(PipeError::AckTimeout.to_string(), "ack timeout");
    }
}
