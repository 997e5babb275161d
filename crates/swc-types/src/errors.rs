//! Error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    /// A login attempt is already running; it must resolve before another
    /// one can start.
    #[error("authorisation already in progress, must explicitly abort current login")]
    AlreadyInProgress,

    /// This platform cannot host a loopback HTTP listener.
    #[error("platform does not support a loopback HTTP listener")]
    PlatformUnsupported,

    /// The loopback listener could not bind its port.
    #[error("failed to bind authorisation listener on port {port}: {source}")]
    PortBindFailure {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The authorization server rejected the request.
    #[error("server error (HTTP {status}: {status_text}): {error}")]
    Remote {
        /// The `error` field of the server's JSON error body.
        error: String,
        status: u16,
        status_text: String,
    },

    /// Transport-level failure before any response was available.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// A response body could not be decoded.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Persistent storage failed in a way that is not recoverable as
    /// "no prior session".
    #[error("persistence I/O failure: {0}")]
    PersistenceIo(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SdkResult<T> = Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display_includes_status_and_body() {
        let err = SdkError::Remote {
            error: "invalid_grant".to_string(),
            status: 400,
            status_text: "Bad Request".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("invalid_grant"));
        assert!(msg.contains("400"));
    }

    #[test]
    fn io_error_converts_to_persistence_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SdkError = io.into();
        assert!(matches!(err, SdkError::PersistenceIo(_)));
    }
}
