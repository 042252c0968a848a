//! Field readers on top of `ByteStream`, and optional field tracing.

use std::{fmt, io::Cursor};

use binrw::{BinRead, Endian};
use tracing::trace;

use crate::{
    stream::{ByteStream, StreamStatus},
    DemuxError, FourCC, Result,
};

/// Binary layouts with a fixed on-disk size.
pub(crate) trait FixedSize {
    const SIZE: usize;
}

/// Fallible little/big endian field reads.
///
/// Short reads map to `DemuxError::Eos`, backend failures to
/// `DemuxError::Io`.
pub(crate) trait ByteStreamExt: ByteStream {
    fn short_read(&self) -> DemuxError {
        match self.status() {
            StreamStatus::Failed => DemuxError::Io(std::io::Error::other("byte stream failure")),
            _ => DemuxError::Eos,
        }
    }

    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.read(buf) == buf.len() {
            true => Ok(()),
            false => Err(self.short_read()),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0_u8; N];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    fn peek_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut buf = [0_u8; N];
        match self.peek(&mut buf) == N {
            true => Some(buf),
            false => None,
        }
    }

    /// Reads `n` bytes into a newly allocated buffer.
    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(n)
            .map_err(|_| DemuxError::OutOfMemory(n))?;
        buf.resize(n, 0);
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    fn skip_exact(&mut self, n: u64) -> Result<()> {
        match self.skip(n) == n {
            true => Ok(()),
            false => Err(self.short_read()),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_fourcc(&mut self) -> Result<FourCC> {
        Ok(FourCC(self.read_array()?))
    }

    fn peek_fourcc(&mut self) -> Option<FourCC> {
        self.peek_array().map(FourCC)
    }

    /// Reads a fixed-size binary layout `T`.
    fn read_struct<T>(&mut self, endian: Endian) -> Result<T>
    where
        T: for<'a> BinRead<Args<'a> = ()> + FixedSize,
    {
        let buf = self.read_vec(T::SIZE)?;
        parse_struct(&buf, endian)
    }
}

impl<S: ByteStream + ?Sized> ByteStreamExt for S {}

/// Parses `T` from the start of `buf`.
/// Missing trailing bytes read as zero (short `strh`, `WAVEFORMAT`).
pub(crate) fn parse_struct<T>(buf: &[u8], endian: Endian) -> Result<T>
where
    T: for<'a> BinRead<Args<'a> = ()> + FixedSize,
{
    let mut padded = buf[..buf.len().min(T::SIZE)].to_vec();
    padded.resize(T::SIZE, 0);
    let mut cursor = Cursor::new(padded);
    Ok(T::read_options(&mut cursor, endian, ())?)
}

/// Verbose field dumping through `tracing` at `TRACE` level,
/// off by default. Nested structures are indented by `level`.
#[derive(Debug, Clone, Default)]
pub struct FieldTrace {
    enabled: bool,
    level: usize,
}

impl FieldTrace {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, level: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn field(&self, name: &str, value: impl fmt::Display) {
        if self.enabled {
            let pad = " ".repeat(self.level * 2);
            trace!(target: "vcdemux::fields", "{pad}{name}: {value}");
        }
    }

    pub fn fourcc(&self, name: &str, value: FourCC) {
        self.field(name, format_args!("'{}'", value.to_str().escape_default()));
    }

    /// Logs `name` and indents subsequent fields one level.
    pub fn enter(&mut self, name: &str) {
        self.field(name, "{");
        self.level += 1;
    }

    pub fn leave(&mut self) {
        self.level = self.level.saturating_sub(1);
        self.field("", "}");
    }
}
