//! Error types for the batch accumulator.

use largebatch_types::ArgumentError;
use thiserror::Error;

/// Errors surfaced by [`LargeBatch`](crate::LargeBatch).
///
/// `E` is the error type of the injected client's batches. Client errors
/// are never retried or rewrapped beyond the `Client` variant, so callers
/// can always get the original error back with [`Error::into_client`].
#[derive(Error, Debug)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    /// The batch sequence was empty while the accumulator was open.
    #[error("internal invariant violated: no open batch to stage into")]
    EmptyBatchSequence,

    /// A previous commit failed; the accumulator no longer knows which
    /// batches reached the database.
    #[error("accumulator is unusable after a failed commit")]
    Poisoned,

    #[error("database client error: {0}")]
    Client(#[source] E),

    #[error("document data could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("document data must serialize to an object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid update arguments: {0}")]
    InvalidArgument(#[from] ArgumentError),
}

impl<E> Error<E>
where
    E: std::error::Error + 'static,
{
    /// The client error, if this error came from the client.
    pub fn client(&self) -> Option<&E> {
        match self {
            Self::Client(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_client(self) -> Option<E> {
        match self {
            Self::Client(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}

/// Result type for accumulator operations.
pub type Result<T, E> = std::result::Result<T, Error<E>>;

/// Errors raised when validating a [`Config`](crate::Config).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch capacity must be greater than zero")]
    ZeroCapacity,
    #[error("batch capacity of {capacity} exceeds the database limit of {max} writes per batch")]
    CapacityAboveLimit { capacity: usize, max: usize },
}
