//! Error types shared across the session runtime.
//!
//! Errors that originate from a caller-initiated request travel back through
//! the request's reply channel; errors raised by background work (artwork
//! fetches, focus requests) are logged and degrade state instead of failing
//! any call.

use thiserror::Error;

/// Rejected input, detected before any state mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("value must be finite: {0}")]
    NonFiniteValue(&'static str),
    #[error("playback position must not be negative (got {0})")]
    NegativePosition(i64),
    #[error("playback rate must not be negative (got {0})")]
    NegativeRate(f32),
    #[error("rating {value} is outside the {scale} scale")]
    RatingOutOfRange { scale: &'static str, value: f32 },
    #[error("status `none` is reserved for reset/disable and cannot be set directly")]
    ReservedStatus,
    #[error("artwork url must not be empty")]
    EmptyArtworkUrl,
}

/// Background service failed to start, bind, or was torn down mid-request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("execution context host is unavailable")]
    HostUnavailable,
    #[error("service failed to start: {0}")]
    StartFailed(String),
    #[error("service channel failed to bind: {0}")]
    BindFailed(String),
    #[error("coordinator is shutting down")]
    ShuttingDown,
}

/// Artwork could not be fetched or decoded. Never surfaces to callers; the
/// notification is simply built without a large icon.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("artwork fetch returned HTTP {status}")]
    Http { status: u16 },
    #[error("artwork fetch failed: {0}")]
    Network(String),
    #[error("artwork could not be decoded: {0}")]
    Decode(String),
    #[error("bundled artwork resource `{0}` not found")]
    MissingResource(String),
    #[error("local artwork `{0}` could not be read")]
    Unreadable(String),
}

/// Audio focus request was denied or the platform backend failed.
///
/// Focus is advisory: a denied request is recorded and playback proceeds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FocusError {
    #[error("audio focus request denied by the platform")]
    Denied,
    #[error("focus backend failure: {0}")]
    Backend(String),
}

/// Umbrella error returned by the application call surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The coordinator thread has exited; no further calls can be served.
    #[error("coordinator mailbox is disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_converts_into_coordinator_error() {
        let err: CoordinatorError = ValidationError::NegativePosition(-5).into();
        assert!(matches!(
            err,
            CoordinatorError::Validation(ValidationError::NegativePosition(-5))
        ));
    }

    #[test]
    fn test_error_messages_name_the_offending_value() {
        let err = ValidationError::RatingOutOfRange {
            scale: "out-of-five",
            value: 7.5,
        };
        assert!(err.to_string().contains("7.5"));
        assert!(err.to_string().contains("out-of-five"));
    }
}
