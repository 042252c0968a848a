//! Byte-stream contract consumed by every reader module.

mod io;

pub use io::IoStream;

use crate::Result;

/// Stream condition after the last operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    #[default]
    Ok,
    /// A read or skip came up short.
    Eos,
    /// The backend reported an error.
    Failed,
}

/// Random-access (or forward-only) byte source.
///
/// Short reads and skips set the status to `StreamStatus::Eos`.
/// A successful `seek` clears it again.
pub trait ByteStream {
    /// Copies up to `buf.len()` bytes from the current position without
    /// advancing. Returns the number of bytes copied.
    fn peek(&mut self, buf: &mut [u8]) -> usize;

    /// Reads up to `buf.len()` bytes. Returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Advances `n` bytes. Returns the number of bytes actually skipped.
    fn skip(&mut self, n: u64) -> u64;

    /// Moves to absolute position `pos`.
    /// Fails with `DemuxError::UnsupportedOperation` on non-seekable streams.
    fn seek(&mut self, pos: u64) -> Result<()>;

    fn position(&self) -> u64;

    fn status(&self) -> StreamStatus;

    fn is_seekable(&self) -> bool;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;
}
