use std::io;

/// Errors produced by the pacing adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleError {
    /// The adapter's cancellation token fired.
    ///
    /// Surfaced when a transfer reaches a chunk boundary after the token
    /// fired, or while a chunk is waiting for bandwidth. Bytes moved by
    /// chunks that completed earlier have already been reported to the
    /// caller.
    #[error("transfer cancelled while waiting for bandwidth")]
    Cancelled,
}

impl From<ThrottleError> for io::Error {
    fn from(err: ThrottleError) -> Self {
        io::Error::other(err)
    }
}
