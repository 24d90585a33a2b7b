//! Error types for bridge operations

use thiserror::Error;
use tracing::error;

/// Errors that can occur while talking to a bridged socket or its context.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("context is terminated")]
    ContextTerminated,
    #[error("socket is closed")]
    SocketClosed,
    #[error("invalid endpoint '{0}': expected '@addr' to bind or '>addr' to connect")]
    InvalidEndpoint(String),
    #[error("socket command panicked: {0}")]
    CommandPanicked(String),
    #[error("socket command reply has unexpected type")]
    CommandType,
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// An invariant breach in the bridge core is unrecoverable. A plain panic
/// would unwind one thread and strand the context with the other still
/// alive, so abort the whole process instead.
pub(crate) fn invariant_breach(msg: &str) -> ! {
    error!("[BRIDGE] invariant breach: {msg}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zmq_error_conversion() {
        let err: BridgeError = zmq::Error::EAGAIN.into();
        assert!(matches!(err, BridgeError::Zmq(zmq::Error::EAGAIN)));
    }

    #[test]
    fn test_display_names_endpoint_prefixes() {
        let err = BridgeError::InvalidEndpoint("tcp://x".to_string());
        let text = err.to_string();
        assert!(text.contains("'@addr'"));
        assert!(text.contains("'>addr'"));
    }
}
