use std::fmt;

use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("local tracks unavailable: {0}")]
    TracksUnavailable(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("teardown incomplete: {0}")]
    Teardown(TeardownReport),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Failure reported by the conferencing backend or the capture platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Outcome of the two teardown steps performed by `leave()`.
///
/// `None` means the step either succeeded or had nothing to tear down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub dispose: Option<BackendError>,
    pub disconnect: Option<BackendError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.dispose.is_none() && self.disconnect.is_none()
    }

    pub(crate) fn into_result(self) -> Result<(), HuddleError> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(HuddleError::Teardown(self))
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.dispose, &self.disconnect) {
            (None, None) => write!(f, "no failures"),
            (Some(d), None) => write!(f, "conference dispose failed ({d})"),
            (None, Some(c)) => write!(f, "disconnect failed ({c})"),
            (Some(d), Some(c)) => {
                write!(f, "conference dispose failed ({d}); disconnect failed ({c})")
            }
        }
    }
}
