//! Demuxer status codes as errors.
//!
//! `Ok(())` corresponds to success. Everything else, including the
//! internal "read again" signal, is a `DemuxError` variant.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DemuxError>;

/// Various demuxing related read/parse errors.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// End of stream reached.
    #[error("End of stream")]
    Eos,
    /// Probe rejected the stream. The host tries the next reader module.
    #[error("Format not supported")]
    FormatNotSupported,
    /// Structural error in a committed container.
    #[error("Invalid format: {0}")]
    FormatInvalid(String),
    /// Bad marker bits, impossible field values.
    #[error("Corrupted data: {0}")]
    Corrupted(String),
    #[error("Unsupported operation")]
    UnsupportedOperation,
    /// E.g. no index entry at or after the requested seek time.
    #[error("Not found")]
    NotFound,
    /// Failed to reserve a buffer of the given size.
    #[error("Out of memory: failed to allocate {0} bytes")]
    OutOfMemory(usize),
    /// A chunk was consumed for bookkeeping only. Read again.
    #[error("Continue")]
    Continue,
    /// Track index out of range.
    #[error("No such track {0}")]
    InvalidTrack(usize),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Converted `BinResult` error.
    #[error("{0}")]
    BinRead(#[from] binrw::Error),
}

impl DemuxError {
    /// Returns `true` for errors after which the container
    /// should not be read any further.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FormatInvalid(_)
                | Self::Corrupted(_)
                | Self::OutOfMemory(_)
                | Self::Io(_)
                | Self::BinRead(_)
        )
    }

    /// Returns `true` if the operation should simply be repeated.
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Continue)
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Self::Eos)
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::FormatInvalid(msg.into())
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DemuxError::Continue.is_retry());
        assert!(!DemuxError::Continue.is_fatal());
        assert!(DemuxError::invalid("no movi").is_fatal());
        assert!(DemuxError::corrupted("marker").is_fatal());
        assert!(!DemuxError::FormatNotSupported.is_fatal());
        assert!(DemuxError::Eos.is_eos());
    }

    #[test]
    fn io_conversion() {
        let err: DemuxError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, DemuxError::Io(_)));
        assert_eq!(err.to_string(), "IO error: boom");
    }
}
