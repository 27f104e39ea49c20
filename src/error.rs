// Engine error types. Per-transfer failures are not errors here; they are
// reported as text on the drained snapshot.

use std::io;

use curl::{FormError, MultiError};
use thiserror::Error;

use crate::engine::registry::TransferId;

/// Returned by every operation other than `initialize` while the engine is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation failed: the engine has not been initialized")]
pub struct NotInitialized;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("engine is already initialized")]
    AlreadyInitialized,
    #[error("transfer library global init failed with code {0}")]
    GlobalInit(i32),
    #[error("reactor event base could not be constructed: {0}")]
    Reactor(#[source] io::Error),
    #[error("transfer driver setup failed: {0}")]
    Driver(#[from] MultiError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    NotInitialized(#[from] NotInitialized),
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
    #[error("invalid form field {index}: {reason}")]
    InvalidForm { index: usize, reason: &'static str },
    #[error("multipart form rejected: {0}")]
    Form(#[from] FormError),
    #[error("transfer option rejected: {0}")]
    Configure(#[from] curl::Error),
    #[error("transfer driver rejected the request: {0}")]
    Driver(#[from] MultiError),
    #[error("transfer {0} is already registered")]
    DuplicateTransfer(TransferId),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    NotInitialized(#[from] NotInitialized),
    #[error("reactor poll failed: {0}")]
    Reactor(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_errors_convert() {
        let err: SubmitError = MultiError::new(curl_sys::CURLM_BAD_HANDLE).into();
        assert!(matches!(err, SubmitError::Driver(_)));
        assert!(err.to_string().starts_with("transfer driver rejected the request"));

        let err: InitError = MultiError::new(curl_sys::CURLM_OUT_OF_MEMORY).into();
        assert!(matches!(err, InitError::Driver(_)));
    }

    #[test]
    fn test_not_initialized_is_transparent() {
        let err = PollError::from(NotInitialized);
        assert_eq!(err.to_string(), NotInitialized.to_string());
    }
}
