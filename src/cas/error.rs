//! Error types for the CAS flow.

use std::time::Duration;
use thiserror::Error;

/// Boxed error raised by a user-supplied verify function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that terminate a CAS authentication attempt with `AuthOutcome::Error`.
///
/// Protocol-level rejections (`authenticationFailure`) are not errors; they
/// surface as `AuthOutcome::Fail`.
#[derive(Debug, Error)]
pub enum CasError {
    /// The strategy configuration is unusable.
    #[error("invalid CAS configuration: {0}")]
    Config(String),

    /// A login or validation URL could not be built.
    #[error("failed to build CAS URL: {0}")]
    Url(String),

    /// Connect, TLS or I/O failure while talking to the CAS server.
    #[error("CAS validation request failed: {0}")]
    Network(String),

    /// The CAS server did not answer within the configured bound.
    #[error("CAS validation request timed out after {0:?}")]
    Timeout(Duration),

    /// The validation response was not a usable CAS 2.0 document.
    #[error("malformed CAS validation response: {0}")]
    MalformedResponse(String),

    /// The verify function reported an error.
    #[error("verify callback failed: {0}")]
    Verify(#[source] BoxError),

    /// The verify function returned without resolving its completion handle.
    #[error("verify callback finished without resolving the authentication attempt")]
    Unresolved,
}

impl CasError {
    /// Short machine-readable kind, used in logs and the CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            CasError::Config(_) => "config",
            CasError::Url(_) => "url",
            CasError::Network(_) => "network",
            CasError::Timeout(_) => "timeout",
            CasError::MalformedResponse(_) => "malformed_response",
            CasError::Verify(_) => "verify",
            CasError::Unresolved => "unresolved",
        }
    }
}
