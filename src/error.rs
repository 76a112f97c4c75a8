//! Error types for ivfpq.

use thiserror::Error;

/// Errors that can occur while training, extending or searching an index.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IvfPqError {
    /// Index parameters cannot describe a valid index (zero clusters,
    /// non-divisible dimensionality, unsupported bit width, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Call arguments are inconsistent (mismatched lengths, wrong dimension,
    /// out-of-range search parameters).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Zero rows were supplied to train or build on.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Parts of an index come from different training generations.
    #[error("stale index: expected generation {expected}, found {actual}")]
    StaleIndex { expected: u64, actual: u64 },

    /// The memory resource could not satisfy an allocation.
    #[error("resource exhausted: could not allocate {requested} bytes")]
    ResourceExhausted { requested: usize },

    /// The operation observed a cancellation request and was aborted.
    #[error("operation cancelled")]
    Cancelled,
}

impl IvfPqError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IvfPqError>;

/// Status code reported by the side-channel entry points
/// ([`build_into`](crate::ivf_pq::build_into),
/// [`extend_into`](crate::ivf_pq::extend_into)).
///
/// These mirror [`IvfPqError`] one-to-one for callers that cannot receive a
/// `Result` next to a filled output structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[must_use]
pub enum Status {
    Success = 0,
    InvalidConfiguration = 1,
    InvalidArgument = 2,
    EmptyDataset = 3,
    StaleIndex = 4,
    ResourceExhausted = 5,
    Cancelled = 6,
}

impl Status {
    /// Collapse a result into a status, logging the error it replaces.
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => {
                tracing::warn!(error = %e, "operation failed");
                Status::from(e)
            }
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Numeric code (`0` on success).
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&IvfPqError> for Status {
    fn from(e: &IvfPqError) -> Self {
        match e {
            IvfPqError::InvalidConfiguration(_) => Status::InvalidConfiguration,
            IvfPqError::InvalidArgument(_) => Status::InvalidArgument,
            IvfPqError::EmptyDataset => Status::EmptyDataset,
            IvfPqError::StaleIndex { .. } => Status::StaleIndex,
            IvfPqError::ResourceExhausted { .. } => Status::ResourceExhausted,
            IvfPqError::Cancelled => Status::Cancelled,
        }
    }
}
