use alloc::collections::TryReserveError;

/// Failures a bucket table operation can report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// No further bucket could be allocated. The table is left as it was
    /// before the failing operation.
    #[error("bucket allocation failed: capacity exceeded")]
    CapacityExceeded,
    /// The table's internal state is inconsistent. This is a bug in the
    /// table, not a recoverable condition.
    #[error("invariant violated in bucket {bucket}: {reason}")]
    InvariantViolation {
        /// Arena index of the offending bucket.
        bucket: usize,
        /// What was found.
        reason: &'static str,
    },
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::CapacityExceeded
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
