//! The error type shared by every spillway crate.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{BlobAddress, RowKey};

/// Coarse classification of a [`SpillError`], for callers that branch on
/// what went wrong rather than on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A broken internal assumption.
    Internal,
    /// Caller passed a value the operation cannot use.
    InvalidArgument,
    /// Operation called in the wrong lifecycle phase.
    IllegalState,
    /// Operating system I/O failure.
    Io,
    /// Bytes on disk or in an archive are not what was written.
    Corruption,
    /// Encoding of metadata or rows failed.
    Serialization,
    /// Failure raised by a background write.
    AsyncWrite,
    /// Row rejected by the table schema.
    SchemaMismatch,
    /// Row key already present.
    DuplicateKey,
    /// Blob reference into a cleared buffer.
    StaleBlobAddress,
    /// Settings that cannot be used together.
    InvalidConfig,
}

impl ErrorCode {
    /// The layer the code belongs to.
    #[must_use]
    pub const fn category(self) -> &'static str {
        match self {
            Self::Internal | Self::InvalidArgument | Self::IllegalState => "General",
            Self::Io | Self::Corruption | Self::Serialization | Self::AsyncWrite => "I/O",
            Self::SchemaMismatch | Self::DuplicateKey => "Table",
            Self::StaleBlobAddress => "Blob",
            Self::InvalidConfig => "Config",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failure of a spillway operation.
///
/// ```rust
/// use spillway_common::error::{SpillError, SpillResult};
///
/// fn get_table(closed: bool) -> SpillResult<()> {
///     if !closed {
///         return Err(SpillError::illegal_state("container has not been closed"));
///     }
///     Ok(())
/// }
/// assert!(get_table(false).is_err());
/// ```
#[derive(Debug, Error)]
pub enum SpillError {
    /// A broken internal assumption.
    #[error("internal: {message}")]
    Internal {
        /// What broke.
        message: String,
    },

    /// Unusable argument.
    #[error("bad argument: {message}")]
    InvalidArgument {
        /// What was wrong with it.
        message: String,
    },

    /// Reading before close, writing after close, or using a cleared buffer.
    #[error("illegal state: {message}")]
    IllegalState {
        /// The operation and the phase it met.
        message: String,
    },

    /// Operating system I/O failure.
    #[error("io: {source}")]
    Io {
        /// Raw failure.
        #[from]
        source: std::io::Error,
    },

    /// Stored bytes are not what was written.
    #[error("corrupt data: {message}")]
    Corruption {
        /// Where the damage was found.
        message: String,
    },

    /// Stored checksum differs from the recomputed one.
    #[error("crc {actual:#010x} does not match stored {expected:#010x}")]
    ChecksumMismatch {
        /// Stored value.
        expected: u32,
        /// Recomputed value.
        actual: u32,
    },

    /// Encoding or decoding failed.
    #[error("encoding: {message}")]
    Serialization {
        /// Codec message.
        message: String,
    },

    /// A background write failed; the failure is shared so it can be re-raised.
    #[error("{message}: {source}")]
    AsyncWrite {
        /// Context of the failed write.
        message: String,
        /// The captured failure.
        #[source]
        source: Arc<SpillError>,
    },

    /// Row does not match the declared schema.
    #[error("row '{key}' does not match the table schema: {reason}")]
    SchemaMismatch {
        /// Key of the offending row.
        key: RowKey,
        /// What was wrong.
        reason: String,
    },

    /// Row key collision.
    #[error("duplicate row key '{key}'")]
    DuplicateKey {
        /// The duplicated key.
        key: RowKey,
    },

    /// Blob owner has been cleared.
    #[error("blob address {address} is stale, its owning buffer has been cleared")]
    StaleBlobAddress {
        /// The address that could not be resolved.
        address: BlobAddress,
    },

    /// Settings that cannot be used together.
    #[error("bad settings: {message}")]
    InvalidConfig {
        /// Which setting and why.
        message: String,
    },
}

impl SpillError {
    /// Classification of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        use ErrorCode as C;
        match self {
            Self::Internal { .. } => C::Internal,
            Self::InvalidArgument { .. } => C::InvalidArgument,
            Self::IllegalState { .. } => C::IllegalState,
            Self::Io { .. } => C::Io,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } => C::Corruption,
            Self::Serialization { .. } => C::Serialization,
            Self::AsyncWrite { .. } => C::AsyncWrite,
            Self::SchemaMismatch { .. } => C::SchemaMismatch,
            Self::DuplicateKey { .. } => C::DuplicateKey,
            Self::StaleBlobAddress { .. } => C::StaleBlobAddress,
            Self::InvalidConfig { .. } => C::InvalidConfig,
        }
    }

    /// Returns true if the failing call leaves its container usable.
    ///
    /// Only per-row validation failures are recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. } | Self::DuplicateKey { .. })
    }

    /// Returns true if this error originated in the disk layer.
    #[must_use]
    pub fn is_io(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Corruption { .. } | Self::ChecksumMismatch { .. } => true,
            Self::AsyncWrite { source, .. } => source.is_io(),
            _ => false,
        }
    }

    /// Shorthand for [`SpillError::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for [`SpillError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`SpillError::IllegalState`].
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Shorthand for [`SpillError::Corruption`].
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Shorthand for [`SpillError::Serialization`].
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Rejects the row keyed `key`.
    #[must_use]
    pub fn schema_mismatch(key: &RowKey, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Rejects a repeated row key.
    #[must_use]
    pub fn duplicate_key(key: &RowKey) -> Self {
        Self::DuplicateKey { key: key.clone() }
    }

    /// Shorthand for [`SpillError::InvalidConfig`].
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wraps a shared background failure so it can be raised again.
    #[must_use]
    pub fn async_write(message: impl Into<String>, source: Arc<SpillError>) -> Self {
        Self::AsyncWrite {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferId;

    #[test]
    fn test_codes_and_categories() {
        let err = SpillError::duplicate_key(&RowKey::new("Row1"));
        assert_eq!(err.code(), ErrorCode::DuplicateKey);
        assert_eq!(err.code().category(), "Table");
        assert_eq!(
            SpillError::ChecksumMismatch { expected: 1, actual: 2 }.code(),
            ErrorCode::Corruption
        );
        assert_eq!(SpillError::invalid_config("x").code().category(), "Config");
    }

    #[test]
    fn test_messages() {
        let err = SpillError::duplicate_key(&RowKey::new("Row1"));
        assert_eq!(err.to_string(), "duplicate row key 'Row1'");

        let err = SpillError::StaleBlobAddress {
            address: BlobAddress::new(BufferId::new(3), 7),
        };
        assert_eq!(
            err.to_string(),
            "blob address 3:7 is stale, its owning buffer has been cleared"
        );

        let err = SpillError::ChecksumMismatch {
            expected: 0xAB,
            actual: 0x10,
        };
        assert_eq!(
            err.to_string(),
            "crc 0x00000010 does not match stored 0x000000ab"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(SpillError::duplicate_key(&RowKey::new("a")).is_recoverable());
        assert!(SpillError::schema_mismatch(&RowKey::new("a"), "bad").is_recoverable());
        assert!(!SpillError::illegal_state("closed").is_recoverable());
    }

    #[test]
    fn test_async_write_keeps_source() {
        let shared = Arc::new(SpillError::from(std::io::Error::other("disk full")));
        let err = SpillError::async_write("writing buffer 4 failed", Arc::clone(&shared));
        assert_eq!(err.code(), ErrorCode::AsyncWrite);
        assert!(err.is_io());
        assert!(err.to_string().contains("disk full"));
        assert!(!SpillError::async_write("x", Arc::new(SpillError::internal("y"))).is_io());
    }
}
