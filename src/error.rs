//! Kind-tagged error type shared by every component in the crate.
//!
//! Mirrors spec §7: setup failures abort after cleanup, per-turn failures
//! are handled locally by callers matching on [`CoreError`]'s variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("broken pipe: {0}")]
    BrokenPipe(String),

    #[error("interrupted")]
    Interrupted,

    #[error("policy gave up: {0}")]
    PolicyGaveUp(String),
}

impl CoreError {
    /// True for the one retryable condition (`EINTR`-style waits): callers
    /// loop on this rather than propagating it.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CoreError::Interrupted)
    }

    pub fn from_errno(context: &str) -> Self {
        let errno = nix::errno::Errno::last();
        if errno == nix::errno::Errno::EINTR {
            CoreError::Interrupted
        } else {
            CoreError::IoFailure(std::io::Error::from(errno))
        }
        .with_context(context)
    }

    fn with_context(self, context: &str) -> Self {
        match self {
            CoreError::IoFailure(e) => {
                CoreError::IoFailure(std::io::Error::new(e.kind(), format!("{context}: {e}")))
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
