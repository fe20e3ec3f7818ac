use std::io;

use thiserror::Error;

/// Errors returned by [`SecureCell`](crate::SecureCell).
///
/// None of the variants carry serializer messages, since those can quote
/// the value that was being encoded or decoded.
#[derive(Debug, Error)]
pub enum Error {
    /// The value could not be encoded. Nothing was allocated.
    #[error("secret value could not be serialized")]
    SerializationFailed,

    /// Protected memory could not be allocated, sealed or released.
    #[error("secret memory could not be protected: {0}")]
    ProtectionFailed(#[from] io::Error),

    /// The cell is in a state where its secret cannot be read back.
    #[error("invalid access to secret: {0}")]
    InvalidAccess(#[from] InvalidAccess),
}

/// Reason for an [`Error::InvalidAccess`].
///
/// Both cases point to a lifecycle bug in the calling code or to memory
/// corruption, never to a transient condition.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum InvalidAccess {
    #[error("the secret has been destroyed")]
    Destroyed,

    #[error("the protected bytes do not decode to the expected type")]
    Corrupted,
}

impl Error {
    /// Returns `true` for errors that indicate a broken cell rather than a
    /// failed construction.
    pub fn is_invalid_access(&self) -> bool {
        matches!(self, Self::InvalidAccess(_))
    }
}
