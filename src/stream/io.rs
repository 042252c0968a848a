//! `ByteStream` adapter over `std::io::Read + Seek`.

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom},
    path::Path,
};

use super::{ByteStream, StreamStatus};
use crate::{DemuxError, Result};

const SCRATCH_SIZE: usize = 4096;

/// Wraps any `Read + Seek` source, with a look-ahead buffer
/// backing `peek()`.
///
/// The inner reader is always positioned at
/// `pos + lookahead.len()`.
#[derive(Debug)]
pub struct IoStream<R> {
    inner: R,
    pos: u64,
    size: Option<u64>,
    lookahead: Vec<u8>,
    status: StreamStatus,
    seekable: bool,
}

impl IoStream<BufReader<File>> {
    /// Opens file at `path` with a default capacity (8KiB)
    /// `BufReader`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_capacity(path, None)
    }

    /// Opens file at `path` using a custom buffer size.
    pub fn with_capacity(path: impl AsRef<Path>, capacity: Option<usize>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = match capacity {
            Some(cap) => BufReader::with_capacity(cap, file),
            None => BufReader::new(file),
        };
        Self::new(reader)
    }
}

impl<R: Read + Seek> IoStream<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let pos = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(pos))?;
        Ok(Self {
            inner,
            pos,
            size: Some(end),
            lookahead: Vec::new(),
            status: StreamStatus::Ok,
            seekable: true,
        })
    }

    /// Turns this into a forward-only stream of unknown size,
    /// the way a pipe or socket would behave.
    pub fn forward_only(mut self) -> Self {
        self.seekable = false;
        self.size = None;
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads from the inner source until `buf` is full or the source
    /// is exhausted.
    fn read_inner(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.inner.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.status = StreamStatus::Failed;
                    break;
                }
            }
        }
        n
    }

    /// Makes sure up to `n` bytes are buffered. Returns buffered length.
    fn fill(&mut self, n: usize) -> usize {
        if self.lookahead.len() < n {
            let mut extra = vec![0_u8; n - self.lookahead.len()];
            let got = self.read_inner(&mut extra);
            self.lookahead.extend_from_slice(&extra[..got]);
        }
        self.lookahead.len().min(n)
    }

    fn mark_short(&mut self) {
        if self.status == StreamStatus::Ok {
            self.status = StreamStatus::Eos;
        }
    }
}

impl<R: Read + Seek> ByteStream for IoStream<R> {
    fn peek(&mut self, buf: &mut [u8]) -> usize {
        let n = self.fill(buf.len());
        buf[..n].copy_from_slice(&self.lookahead[..n]);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let buffered = buf.len().min(self.lookahead.len());
        buf[..buffered].copy_from_slice(&self.lookahead[..buffered]);
        self.lookahead.drain(..buffered);

        let n = buffered + self.read_inner(&mut buf[buffered..]);
        self.pos += n as u64;
        if n < buf.len() {
            self.mark_short();
        }
        n
    }

    fn skip(&mut self, n: u64) -> u64 {
        let buffered = n.min(self.lookahead.len() as u64);
        self.lookahead.drain(..buffered as usize);
        let mut done = buffered;

        if done < n {
            if self.seekable {
                let from = self.pos + done;
                let target = self.size.map_or(self.pos + n, |s| (self.pos + n).min(s.max(from)));
                match self.inner.seek(SeekFrom::Start(target)) {
                    Ok(_) => done = target - self.pos,
                    Err(_) => self.status = StreamStatus::Failed,
                }
            } else {
                let mut scratch = [0_u8; SCRATCH_SIZE];
                while done < n {
                    let want = (n - done).min(SCRATCH_SIZE as u64) as usize;
                    let got = self.read_inner(&mut scratch[..want]);
                    done += got as u64;
                    if got < want {
                        break;
                    }
                }
            }
        }

        self.pos += done;
        if done < n {
            self.mark_short();
        }
        done
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if !self.seekable {
            return Err(DemuxError::UnsupportedOperation);
        }
        let ahead = pos.checked_sub(self.pos);
        match ahead {
            Some(d) if d <= self.lookahead.len() as u64 => {
                self.lookahead.drain(..d as usize);
            }
            _ => {
                self.inner.seek(SeekFrom::Start(pos))?;
                self.lookahead.clear();
            }
        }
        self.pos = pos;
        self.status = StreamStatus::Ok;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn status(&self) -> StreamStatus {
        self.status
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn stream(len: u8) -> IoStream<Cursor<Vec<u8>>> {
        IoStream::new(Cursor::new((0..len).collect())).unwrap()
    }

    #[test]
    fn peek_does_not_advance() {
        let mut s = stream(16);
        let mut buf = [0_u8; 4];
        assert_eq!(s.peek(&mut buf), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(s.position(), 0);
        assert_eq!(s.read(&mut buf), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(s.position(), 4);
    }

    #[test]
    fn short_read_sets_eos_and_seek_clears_it() {
        let mut s = stream(6);
        let mut buf = [0_u8; 8];
        assert_eq!(s.read(&mut buf), 6);
        assert_eq!(s.status(), StreamStatus::Eos);
        s.seek(2).unwrap();
        assert_eq!(s.status(), StreamStatus::Ok);
        assert_eq!(s.read(&mut buf[..2]), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn skip_through_lookahead_and_past_end() {
        let mut s = stream(10);
        let mut buf = [0_u8; 3];
        s.peek(&mut buf);
        assert_eq!(s.skip(5), 5);
        assert_eq!(s.position(), 5);
        assert_eq!(s.read(&mut buf), 3);
        assert_eq!(buf, [5, 6, 7]);
        assert_eq!(s.skip(10), 2);
        assert_eq!(s.status(), StreamStatus::Eos);
    }

    #[test]
    fn forward_only_rejects_seek() {
        let mut s = stream(10).forward_only();
        assert!(matches!(s.seek(0), Err(DemuxError::UnsupportedOperation)));
        assert_eq!(s.skip(4), 4);
        let mut b = [0_u8; 1];
        s.read(&mut b);
        assert_eq!(b[0], 4);
        assert_eq!(s.size(), None);
    }

    #[test]
    fn open_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"RIFF").unwrap();
        tmp.flush().unwrap();
        let mut s = IoStream::open(tmp.path()).unwrap();
        assert_eq!(s.size(), Some(4));
        let mut buf = [0_u8; 4];
        assert_eq!(s.read(&mut buf), 4);
        assert_eq!(&buf, b"RIFF");
    }
}
